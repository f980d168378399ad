//! Rehash context (§3 "Rehash context").

use std::path::PathBuf;

use crate::hashalg::HashAlg;

/// The next boot's kernel entry: the artifacts a rehasher substitutes for
/// whatever the firmware actually measured last boot.
#[derive(Debug, Clone)]
pub struct BootEntry {
    pub image_path: String,
    pub initrd_path: String,
    pub options: String,
}

/// Read-only input consumed by every rehasher (§3, §4.3).
#[derive(Debug, Clone, Default)]
pub struct RehashContext {
    pub target_alg: Option<HashAlg>,
    pub boot_entry: Option<BootEntry>,
    pub efi_partition_path: Option<PathBuf>,
    pub boot_entry_path: Option<PathBuf>,
}

impl RehashContext {
    pub fn new(target_alg: HashAlg) -> Self {
        Self { target_alg: Some(target_alg), ..Default::default() }
    }

    pub fn with_boot_entry(mut self, entry: BootEntry) -> Self {
        self.boot_entry = Some(entry);
        self
    }

    pub fn with_efi_partition_path(mut self, path: PathBuf) -> Self {
        self.efi_partition_path = Some(path);
        self
    }

    pub fn with_boot_entry_path(mut self, path: PathBuf) -> Self {
        self.boot_entry_path = Some(path);
        self
    }

    pub fn alg(&self) -> HashAlg {
        self.target_alg.expect("RehashContext used before target_alg was set")
    }
}
