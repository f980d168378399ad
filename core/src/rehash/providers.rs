//! Runtime artifact providers: the collaborators rehashers read through,
//! kept as a trait so the re-hash engine's tests never touch a real
//! filesystem or UEFI runtime (§4.3, "out of scope: file I/O primitives").

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use goblin::pe::PE;
use sha2::{Digest as Sha2Digest, Sha256, Sha384, Sha512};

use crate::hashalg::{HashAlg, TPM_ALG_SHA256, TPM_ALG_SHA384, TPM_ALG_SHA512};

/// Everything a rehasher needs to read from the running system: EFI runtime
/// variables and files on either the system root or the EFI system
/// partition.
pub trait ArtifactProvider {
    fn read_efi_variable(&self, name: &str) -> io::Result<Vec<u8>>;
    fn read_system_file(&self, path: &Path) -> io::Result<Vec<u8>>;
    fn read_efi_file(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// PE/COFF Authenticode digest of the image at `path` (resolved through
    /// the EFI partition, as boot-services applications always are) under
    /// `alg` (§4.2 EFI_BOOT_SERVICES_*, glossary "Authenticode digest").
    fn authenticode_digest(&self, path: &Path, alg: HashAlg) -> io::Result<Vec<u8>> {
        let buffer = self.read_efi_file(path)?;
        authenticode_digest_of(&buffer, alg)
    }
}

/// Computes the Authenticode digest of an in-memory PE image: every byte
/// range goblin reports as covered, which already excludes the checksum
/// field and the certificate table (glossary "Authenticode digest").
pub fn authenticode_digest_of(buffer: &[u8], alg: HashAlg) -> io::Result<Vec<u8>> {
    let pe = PE::parse(buffer).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    match alg.id {
        TPM_ALG_SHA256 => {
            let mut h = Sha256::new();
            for slice in pe.authenticode_ranges() {
                h.update(slice);
            }
            Ok(h.finalize().to_vec())
        }
        TPM_ALG_SHA384 => {
            let mut h = Sha384::new();
            for slice in pe.authenticode_ranges() {
                h.update(slice);
            }
            Ok(h.finalize().to_vec())
        }
        TPM_ALG_SHA512 => {
            let mut h = Sha512::new();
            for slice in pe.authenticode_ranges() {
                h.update(slice);
            }
            Ok(h.finalize().to_vec())
        }
        other => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("Authenticode digest not supported for algorithm id {other:#06x}"),
        )),
    }
}

/// The real provider used outside tests: EFI variables through sysfs,
/// files rooted at `/` and at the EFI system partition mountpoint.
pub struct FilesystemProvider {
    pub system_root: PathBuf,
    pub efi_root: PathBuf,
}

impl FilesystemProvider {
    pub fn new(system_root: impl Into<PathBuf>, efi_root: impl Into<PathBuf>) -> Self {
        Self { system_root: system_root.into(), efi_root: efi_root.into() }
    }

    fn efivarfs_path(name: &str) -> PathBuf {
        // Kernel exposes EFI variables as <name>-<vendor-guid>; callers pass
        // the already-qualified file name.
        PathBuf::from("/sys/firmware/efi/efivars").join(name)
    }
}

impl ArtifactProvider for FilesystemProvider {
    fn read_efi_variable(&self, name: &str) -> io::Result<Vec<u8>> {
        fs::read(Self::efivarfs_path(name))
    }

    fn read_system_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(join_rooted(&self.system_root, path))
    }

    fn read_efi_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(join_rooted(&self.efi_root, path))
    }
}

fn join_rooted(root: &Path, path: &Path) -> PathBuf {
    match path.strip_prefix("/") {
        Ok(rel) => root.join(rel),
        Err(_) => root.join(path),
    }
}
