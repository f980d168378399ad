//! Hash algorithm descriptors (§3 "Hash algorithm descriptor").
//!
//! The process-wide table covers the algorithms the TCG PC Client spec
//! assigns well-known ids to; a log can declare additional (id, size) pairs
//! in its Spec ID Event03 header, which callers fold into the per-log
//! supplement via [`HashAlgTable::learn`].

use std::fmt;

/// TCG `TPM_ALG_ID` values relevant to event logs and PCR banks.
pub const TPM_ALG_SHA1: u16 = 0x0004;
pub const TPM_ALG_SHA256: u16 = 0x000b;
pub const TPM_ALG_SHA384: u16 = 0x000c;
pub const TPM_ALG_SHA512: u16 = 0x000d;
pub const TPM_ALG_SM3_256: u16 = 0x0012;

/// A single hash algorithm: its TCG numeric id, canonical name and digest length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashAlg {
    pub id: u16,
    pub name: &'static str,
    pub digest_size: usize,
}

impl fmt::Display for HashAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl HashAlg {
    /// The `tss_esapi` algorithm this descriptor corresponds to, for TPM
    /// commands that take a `TPMI_ALG_HASH` (PCR reads, policy sessions).
    /// SM3_256 has no ESAPI counterpart the TPM2 policy/PCR path accepts in
    /// this crate's supported TCTIs, so it is rejected here even though it
    /// is a valid event-log digest algorithm.
    pub fn to_hashing_algorithm(self) -> Result<tss_esapi::interface_types::algorithm::HashingAlgorithm, String> {
        use tss_esapi::interface_types::algorithm::HashingAlgorithm;
        match self.id {
            TPM_ALG_SHA1 => Ok(HashingAlgorithm::Sha1),
            TPM_ALG_SHA256 => Ok(HashingAlgorithm::Sha256),
            TPM_ALG_SHA384 => Ok(HashingAlgorithm::Sha384),
            TPM_ALG_SHA512 => Ok(HashingAlgorithm::Sha512),
            other => Err(format!("algorithm id {other:#06x} has no TPM2 session/PCR counterpart")),
        }
    }
}

pub const SHA1: HashAlg = HashAlg { id: TPM_ALG_SHA1, name: "sha1", digest_size: 20 };
pub const SHA256: HashAlg = HashAlg { id: TPM_ALG_SHA256, name: "sha256", digest_size: 32 };
pub const SHA384: HashAlg = HashAlg { id: TPM_ALG_SHA384, name: "sha384", digest_size: 48 };
pub const SHA512: HashAlg = HashAlg { id: TPM_ALG_SHA512, name: "sha512", digest_size: 64 };
pub const SM3_256: HashAlg = HashAlg { id: TPM_ALG_SM3_256, name: "sm3_256", digest_size: 32 };

/// The process-wide, read-only-after-init table of well-known algorithms.
const WELL_KNOWN: &[HashAlg] = &[SHA1, SHA256, SHA384, SHA512, SM3_256];

/// Looks up a well-known algorithm by its TCG numeric id.
pub fn by_id(id: u16) -> Option<HashAlg> {
    WELL_KNOWN.iter().copied().find(|a| a.id == id)
}

/// Looks up a well-known algorithm by its canonical textual name, as accepted
/// on the command line (§6: sha1, sha256, sha384, sha512, sm3_256).
pub fn by_name(name: &str) -> Option<HashAlg> {
    WELL_KNOWN.iter().copied().find(|a| a.name == name)
}

/// Per-log supplement of (id, size) pairs declared by a Spec ID Event03
/// header, for algorithms the log uses that aren't in the well-known table,
/// or to override the well-known digest size for this particular log.
///
/// The log's own declaration always wins over the static table, since it is
/// what the firmware that produced the log actually used.
#[derive(Debug, Clone, Default)]
pub struct HashAlgTable {
    learned: Vec<HashAlg>,
}

impl HashAlgTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an (id, size) pair declared by the log header. `name` is
    /// resolved from the well-known table when possible, falling back to a
    /// synthesized placeholder so unknown-but-declared algorithms still
    /// round-trip through digest processing.
    pub fn learn(&mut self, id: u16, size: usize) {
        if let Some(existing) = self.learned.iter_mut().find(|a| a.id == id) {
            existing.digest_size = size;
            return;
        }
        let name = by_id(id).map(|a| a.name).unwrap_or("unknown");
        self.learned.push(HashAlg { id, name, digest_size: size });
    }

    /// Resolves an algorithm id, preferring what this log declared, then the
    /// process-wide static table.
    pub fn resolve(&self, id: u16) -> Option<HashAlg> {
        self.learned
            .iter()
            .copied()
            .find(|a| a.id == id)
            .or_else(|| by_id(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_lookup_by_name_and_id() {
        assert_eq!(by_name("sha256"), Some(SHA256));
        assert_eq!(by_id(TPM_ALG_SHA256), Some(SHA256));
        assert_eq!(by_name("bogus"), None);
    }

    #[test]
    fn log_supplement_overrides_static_size() {
        let mut table = HashAlgTable::new();
        table.learn(TPM_ALG_SHA256, 32);
        table.learn(0xbeef, 16);
        assert_eq!(table.resolve(TPM_ALG_SHA256).unwrap().digest_size, 32);
        assert_eq!(table.resolve(0xbeef).unwrap().name, "unknown");
        assert_eq!(table.resolve(0xbeef).unwrap().digest_size, 16);
        // Unknown, undeclared algorithm still falls through to nothing.
        assert!(table.resolve(0xdead).is_none());
    }
}
