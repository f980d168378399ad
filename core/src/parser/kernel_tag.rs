//! `EVENT_TAG` decoder: `tag_event { u32 event_id, u32 data_len, data bytes }` (§4.2).

use std::io::Cursor;
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::ParseError;
use crate::eventlog::event::tag_id;
use crate::hash::hash_one;
use crate::rehash::providers::ArtifactProvider;
use crate::rehash::RehashContext;

use super::systemd::{dos_path, encode_utf16le};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelTag {
    LoadOptions(String),
    Initrd(Vec<u8>),
    Other { event_id: u32, data: Vec<u8> },
}

pub fn parse(raw: &[u8]) -> Result<KernelTag, ParseError> {
    let mut cursor = Cursor::new(raw);
    let event_id = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| ParseError::Truncated(0))?;
    let data_len = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| ParseError::Truncated(0))?;

    let start = cursor.position() as usize;
    let end = start + data_len as usize;
    let data = raw.get(start..end).ok_or(ParseError::Truncated(event_id))?.to_vec();

    match event_id {
        tag_id::LOAD_OPTIONS_EVENT_TAG_ID => {
            let units: Vec<u16> = data
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .take_while(|&u| u != 0)
                .collect();
            let text = String::from_utf16(&units).map_err(|_| ParseError::InvalidUtf16)?;
            Ok(KernelTag::LoadOptions(text))
        }
        tag_id::INITRD_EVENT_TAG_ID => Ok(KernelTag::Initrd(data)),
        other => Ok(KernelTag::Other { event_id: other, data }),
    }
}

impl KernelTag {
    pub fn describe(&self) -> String {
        match self {
            KernelTag::LoadOptions(s) => format!("kernel tag load-options {s:?}"),
            KernelTag::Initrd(d) => format!("kernel tag initrd ({} bytes)", d.len()),
            KernelTag::Other { event_id, data } => {
                format!("kernel tag {event_id:#x} ({} bytes)", data.len())
            }
        }
    }

    /// Same rebuild rule as the systemd IPL event for `LOAD_OPTIONS`; hashes
    /// the next boot's initrd file for `INITRD` (§4.3).
    pub fn rehash(&self, ctx: &RehashContext, provider: &dyn ArtifactProvider) -> Option<Vec<u8>> {
        let entry = ctx.boot_entry.as_ref()?;
        match self {
            KernelTag::LoadOptions(_) => {
                let text = format!("initrd={} {}", dos_path(&entry.initrd_path), entry.options);
                Some(hash_one(ctx.alg(), &encode_utf16le(&text)))
            }
            KernelTag::Initrd(_) => {
                let contents = provider.read_efi_file(Path::new(&entry.initrd_path)).ok()?;
                Some(hash_one(ctx.alg(), &contents))
            }
            KernelTag::Other { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    fn tagged(event_id: u32, data: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>(event_id).unwrap();
        buf.write_u32::<LittleEndian>(data.len() as u32).unwrap();
        buf.extend_from_slice(data);
        buf
    }

    #[test]
    fn parses_load_options() {
        let data = encode_utf16le("root=/dev/sda1");
        let raw = tagged(tag_id::LOAD_OPTIONS_EVENT_TAG_ID, &data);
        let parsed = parse(&raw).unwrap();
        assert_eq!(parsed, KernelTag::LoadOptions("root=/dev/sda1".to_string()));
    }

    #[test]
    fn parses_initrd_tag_opaquely() {
        let raw = tagged(tag_id::INITRD_EVENT_TAG_ID, &[1, 2, 3]);
        let parsed = parse(&raw).unwrap();
        assert_eq!(parsed, KernelTag::Initrd(vec![1, 2, 3]));
    }
}
