//! `EFI_VARIABLE_{AUTHORITY,BOOT,DRIVER_CONFIG}` decoder (§4.2).
//!
//! Wire shape is the standard `EFI_VARIABLE_DATA` structure: a 16-byte GUID,
//! a `u64` name length (UTF-16 code units), a `u64` data length, the name in
//! UTF-16LE, then the raw variable value.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::ParseError;
use crate::hash::hash_one;
use crate::rehash::providers::ArtifactProvider;
use crate::rehash::RehashContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EfiVariable {
    pub guid: [u8; 16],
    pub name: String,
    pub value: Vec<u8>,
}

pub fn parse(raw: &[u8]) -> Result<EfiVariable, ParseError> {
    let mut cursor = Cursor::new(raw);
    let mut guid = [0u8; 16];
    cursor
        .read_exact(&mut guid)
        .map_err(|_| ParseError::Truncated(0))?;
    let name_len = cursor
        .read_u64::<LittleEndian>()
        .map_err(|_| ParseError::Truncated(0))?;
    let data_len = cursor
        .read_u64::<LittleEndian>()
        .map_err(|_| ParseError::Truncated(0))?;

    let mut name_units = vec![0u16; name_len as usize];
    for unit in name_units.iter_mut() {
        *unit = cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| ParseError::Truncated(0))?;
    }
    let name = String::from_utf16(&name_units).map_err(|_| ParseError::InvalidUtf16)?;

    let mut value = vec![0u8; data_len as usize];
    cursor.read_exact(&mut value).map_err(|_| ParseError::Truncated(0))?;

    Ok(EfiVariable { guid, name, value })
}

impl EfiVariable {
    pub fn describe(&self) -> String {
        format!("EFI variable {:?} ({} bytes)", self.name, self.value.len())
    }

    /// Reads the named variable from the runtime provider and hashes its
    /// current contents under the target algorithm (§4.3).
    pub fn rehash(&self, ctx: &RehashContext, provider: &dyn ArtifactProvider) -> Option<Vec<u8>> {
        let contents = provider.read_efi_variable(&self.name).ok()?;
        Some(hash_one(ctx.alg(), &contents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    fn sample_bytes(name: &str, value: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&[0u8; 16]);
        let units: Vec<u16> = name.encode_utf16().collect();
        buf.write_u64::<LittleEndian>(units.len() as u64).unwrap();
        buf.write_u64::<LittleEndian>(value.len() as u64).unwrap();
        for u in units {
            buf.write_u16::<LittleEndian>(u).unwrap();
        }
        buf.extend_from_slice(value);
        buf
    }

    #[test]
    fn parses_name_and_value() {
        let raw = sample_bytes("SecureBoot", &[0x01]);
        let parsed = parse(&raw).unwrap();
        assert_eq!(parsed.name, "SecureBoot");
        assert_eq!(parsed.value, vec![0x01]);
    }
}
