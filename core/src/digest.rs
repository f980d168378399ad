//! Digests (§3 "Digest").

use crate::hashalg::HashAlg;

/// A digest for one algorithm. Raw bytes are capped at 64 (SHA-512's length);
/// the algorithm's own `digest_size` governs how many of `bytes` are valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    pub alg: HashAlg,
    bytes: Vec<u8>,
}

impl Digest {
    pub fn new(alg: HashAlg, bytes: Vec<u8>) -> Self {
        Self { alg, bytes }
    }

    pub fn zeroed(alg: HashAlg) -> Self {
        Self { alg, bytes: vec![0u8; alg.digest_size] }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// A digest of length 0, or of all-zero/all-0xff bytes over its
    /// algorithm's length, is considered invalid and must never enter a PCR
    /// bank (§3).
    pub fn is_valid(&self) -> bool {
        if self.bytes.is_empty() {
            return false;
        }
        if self.bytes.len() != self.alg.digest_size {
            return false;
        }
        let all_zero = self.bytes.iter().all(|&b| b == 0x00);
        let all_ff = self.bytes.iter().all(|&b| b == 0xff);
        !all_zero && !all_ff
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub fn from_hex(alg: HashAlg, hex_str: &str) -> Option<Self> {
        let bytes = hex::decode(hex_str).ok()?;
        Some(Self { alg, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashalg::SHA256;

    #[test]
    fn zero_digest_is_invalid() {
        let d = Digest::zeroed(SHA256);
        assert!(!d.is_valid());
    }

    #[test]
    fn all_ff_digest_is_invalid() {
        let d = Digest::new(SHA256, vec![0xff; 32]);
        assert!(!d.is_valid());
    }

    #[test]
    fn wrong_length_digest_is_invalid() {
        let d = Digest::new(SHA256, vec![0x11; 10]);
        assert!(!d.is_valid());
    }

    #[test]
    fn ordinary_digest_is_valid() {
        let mut bytes = vec![0x11; 32];
        bytes[0] = 0x01;
        let d = Digest::new(SHA256, bytes);
        assert!(d.is_valid());
    }

    #[test]
    fn hex_round_trip() {
        let d = Digest::new(SHA256, vec![0xab; 32]);
        let hex_str = d.to_hex();
        let back = Digest::from_hex(SHA256, &hex_str).unwrap();
        assert_eq!(d, back);
    }
}
