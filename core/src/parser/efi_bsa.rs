//! `EFI_BOOT_SERVICES_{APPLICATION,DRIVER}` decoder (§4.2, §4.3).
//!
//! Wire shape is `EFI_IMAGE_LOAD_EVENT`: three `u64` fields (physical load
//! address, image size, link-time address) followed by a `u64` device path
//! length and the UEFI device path itself. We don't model the full device
//! path node grammar — only enough to pull a human file path out of its
//! `MEDIA_FILEPATH_DP` nodes, which is all the rehasher needs to locate the
//! image on the EFI system partition.

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::ParseError;
use crate::rehash::providers::ArtifactProvider;
use crate::rehash::RehashContext;

const MEDIA_DEVICE_PATH_TYPE: u8 = 0x04;
const MEDIA_FILEPATH_SUBTYPE: u8 = 0x04;
const END_DEVICE_PATH_TYPE: u8 = 0x7f;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EfiBootServicesApp {
    pub load_address: u64,
    pub length: u64,
    pub device_path: Vec<u8>,
    pub file_path: Option<String>,
}

pub fn parse(raw: &[u8]) -> Result<EfiBootServicesApp, ParseError> {
    let mut cursor = Cursor::new(raw);
    let load_address = cursor
        .read_u64::<LittleEndian>()
        .map_err(|_| ParseError::Truncated(0))?;
    let length = cursor
        .read_u64::<LittleEndian>()
        .map_err(|_| ParseError::Truncated(0))?;
    let _link_time_address = cursor
        .read_u64::<LittleEndian>()
        .map_err(|_| ParseError::Truncated(0))?;
    let device_path_len = cursor
        .read_u64::<LittleEndian>()
        .map_err(|_| ParseError::Truncated(0))?;

    let mut device_path = vec![0u8; device_path_len as usize];
    cursor
        .read_exact(&mut device_path)
        .map_err(|_| ParseError::Truncated(0))?;

    let file_path = extract_file_path(&device_path);

    Ok(EfiBootServicesApp { load_address, length, device_path, file_path })
}

/// Walks the device path node list, concatenating text from every
/// `MEDIA_FILEPATH_DP` node (each one is NUL-terminated UTF-16LE).
fn extract_file_path(device_path: &[u8]) -> Option<String> {
    let mut offset = 0usize;
    let mut segments = Vec::new();

    while offset + 4 <= device_path.len() {
        let node_type = device_path[offset];
        let node_subtype = device_path[offset + 1];
        let node_len = u16::from_le_bytes([device_path[offset + 2], device_path[offset + 3]]) as usize;

        if node_type == END_DEVICE_PATH_TYPE || node_len < 4 {
            break;
        }
        if offset + node_len > device_path.len() {
            break;
        }

        if node_type == MEDIA_DEVICE_PATH_TYPE && node_subtype == MEDIA_FILEPATH_SUBTYPE {
            let text_bytes = &device_path[offset + 4..offset + node_len];
            let units: Vec<u16> = text_bytes
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .take_while(|&u| u != 0)
                .collect();
            if let Ok(text) = String::from_utf16(&units) {
                segments.push(text);
            }
        }

        offset += node_len;
    }

    if segments.is_empty() {
        None
    } else {
        Some(segments.join("\\"))
    }
}

impl EfiBootServicesApp {
    pub fn describe(&self) -> String {
        match &self.file_path {
            Some(p) => format!("EFI boot-services image at {p} ({} bytes)", self.length),
            None => format!("EFI boot-services image ({} bytes, unresolved device path)", self.length),
        }
    }

    /// PE/COFF Authenticode digest of the image the device path resolves to
    /// (§4.3). Boot-services applications are shim/grub binaries that live on
    /// the EFI system partition and are not expected to differ between the
    /// current and predicted boot, so this always reads the image in place
    /// rather than consulting the rehash context's next-boot entry.
    pub fn rehash(&self, ctx: &RehashContext, provider: &dyn ArtifactProvider) -> Option<Vec<u8>> {
        let file_path = self.file_path.as_ref()?;
        let path: PathBuf = file_path.replace('\\', "/").into();
        provider.authenticode_digest(Path::new(&path), ctx.alg()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    fn filepath_node(text: &str) -> Vec<u8> {
        let mut units: Vec<u16> = text.encode_utf16().collect();
        units.push(0);
        let mut node = vec![MEDIA_DEVICE_PATH_TYPE, MEDIA_FILEPATH_SUBTYPE];
        let len = 4 + units.len() * 2;
        node.write_u16::<LittleEndian>(len as u16).unwrap();
        for u in units {
            node.write_u16::<LittleEndian>(u).unwrap();
        }
        node
    }

    fn end_node() -> Vec<u8> {
        vec![END_DEVICE_PATH_TYPE, 0xff, 0x04, 0x00]
    }

    #[test]
    fn extracts_file_path_from_device_path() {
        let mut dp = filepath_node("\\EFI\\BOOT\\BOOTX64.EFI");
        dp.extend(end_node());
        assert_eq!(extract_file_path(&dp), Some("\\EFI\\BOOT\\BOOTX64.EFI".to_string()));
    }

    #[test]
    fn parses_header_fields() {
        let mut dp = filepath_node("\\EFI\\grub.efi");
        dp.extend(end_node());

        let mut raw = Vec::new();
        raw.write_u64::<LittleEndian>(0x1000).unwrap();
        raw.write_u64::<LittleEndian>(4096).unwrap();
        raw.write_u64::<LittleEndian>(0x1000).unwrap();
        raw.write_u64::<LittleEndian>(dp.len() as u64).unwrap();
        raw.extend_from_slice(&dp);

        let parsed = parse(&raw).unwrap();
        assert_eq!(parsed.load_address, 0x1000);
        assert_eq!(parsed.length, 4096);
        assert_eq!(parsed.file_path.as_deref(), Some("\\EFI\\grub.efi"));
    }
}
