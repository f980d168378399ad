//! systemd-boot IPL event decoder, pcr 12 (§4.2, §4.3).

use crate::hash::hash_one;
use crate::rehash::RehashContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemdEvent {
    pub raw: Vec<u8>,
}

pub fn parse(raw: &[u8]) -> SystemdEvent {
    SystemdEvent { raw: raw.to_vec() }
}

impl SystemdEvent {
    pub fn describe(&self) -> String {
        let text = decode_utf16le(&self.raw);
        format!("systemd event {text:?}")
    }

    /// Recomputes as UTF-16LE of `initrd=<dos-path> <options>` when a next
    /// boot entry exists; otherwise the firmware digest is reused (§4.3).
    pub fn rehash(&self, ctx: &RehashContext) -> Option<Vec<u8>> {
        let entry = ctx.boot_entry.as_ref()?;
        let text = format!("initrd={} {}", dos_path(&entry.initrd_path), entry.options);
        Some(hash_one(ctx.alg(), &encode_utf16le(&text)))
    }
}

pub(crate) fn dos_path(path: &str) -> String {
    path.replace('/', "\\")
}

pub(crate) fn encode_utf16le(text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(text.len() * 2 + 2);
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    bytes.extend_from_slice(&[0, 0]);
    bytes
}

fn decode_utf16le(raw: &[u8]) -> String {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashalg::SHA256;
    use crate::rehash::context::BootEntry;

    #[test]
    fn rehash_needs_boot_entry() {
        let event = parse(&encode_utf16le("initrd=\\old\\initrd.img"));
        let ctx = RehashContext::new(SHA256);
        assert!(event.rehash(&ctx).is_none());
    }

    #[test]
    fn rehash_rebuilds_with_next_initrd() {
        let event = parse(&encode_utf16le("initrd=\\old\\initrd.img"));
        let ctx = RehashContext::new(SHA256).with_boot_entry(BootEntry {
            image_path: "/EFI/Linux/vmlinuz".to_string(),
            initrd_path: "/EFI/Linux/initrd.img".to_string(),
            options: "quiet splash".to_string(),
        });
        let digest = event.rehash(&ctx).unwrap();
        assert_eq!(digest.len(), 32);
    }
}
