//! `EFI_GPT_EVENT` decoder (§4.2).
//!
//! The body is the marshalled `UEFI_GPT_DATA` structure (partition header
//! plus partition entry array). Byte-level GPT layout is out of scope here;
//! the event carries the marshalled bytes opaquely, and its rehash strategy
//! is always "copy" — the partition table is not expected to change between
//! the current boot and the one being predicted.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EfiGpt {
    pub marshalled: Vec<u8>,
}

pub fn parse(raw: &[u8]) -> EfiGpt {
    EfiGpt { marshalled: raw.to_vec() }
}

impl EfiGpt {
    pub fn describe(&self) -> String {
        format!("EFI GPT event ({} bytes)", self.marshalled.len())
    }
}
