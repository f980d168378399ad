//! The systemd `pcrlock`-style JSON envelope format (§4.6, §6(c)):
//!
//! ```text
//! { "<algo>": [ {"pcrs": [...], "pkfp": "<hex>", "pol": "<hex>", "sig": "<base64>"} ] }
//! ```
//!
//! Entries are grouped by hash algorithm name and, within a group, keyed by
//! `pol` (the policy digest): writing an entry whose `pol` already exists
//! replaces it rather than appending a duplicate (§4.6, literal scenario in
//! §8).

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::EnvelopeError;
use crate::hashalg::HashAlg;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedPolicyEntry {
    pub pcrs: Vec<u32>,
    pub pkfp: String,
    pub pol: String,
    pub sig: String,
}

/// `doc[algo_name] = Vec<SignedPolicyEntry>`, in insertion order per group.
#[derive(Debug, Default, Clone)]
pub struct SystemdPolicyDoc {
    groups: BTreeMap<String, Vec<SignedPolicyEntry>>,
}

impl SystemdPolicyDoc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let groups: BTreeMap<String, Vec<SignedPolicyEntry>> = serde_json::from_slice(bytes)?;
        Ok(Self { groups })
    }

    pub fn to_json(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec_pretty(&self.groups)?)
    }

    pub fn entries(&self, alg: HashAlg) -> &[SignedPolicyEntry] {
        self.groups.get(alg.name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Inserts or replaces an entry by `(algo, pol)` (§4.6 merge semantics).
    pub fn upsert(
        &mut self,
        alg: HashAlg,
        pcrs: Vec<u32>,
        public_key_fingerprint: &[u8],
        pcr_policy_digest: &[u8],
        signature: &[u8],
    ) {
        let entry = SignedPolicyEntry {
            pcrs,
            pkfp: hex::encode(public_key_fingerprint),
            pol: hex::encode(pcr_policy_digest),
            sig: BASE64.encode(signature),
        };
        let group = self.groups.entry(alg.name.to_string()).or_default();
        match group.iter_mut().find(|existing| existing.pol == entry.pol) {
            Some(existing) => *existing = entry,
            None => group.push(entry),
        }
    }
}

impl SignedPolicyEntry {
    pub fn policy_digest(&self) -> Result<Vec<u8>, EnvelopeError> {
        hex::decode(&self.pol).map_err(|e| EnvelopeError::Malformed(format!("bad pol hex: {e}")))
    }

    pub fn signature(&self) -> Result<Vec<u8>, EnvelopeError> {
        BASE64.decode(&self.sig).map_err(|e| EnvelopeError::Malformed(format!("bad sig base64: {e}")))
    }

    pub fn fingerprint(&self) -> Result<Vec<u8>, EnvelopeError> {
        hex::decode(&self.pkfp).map_err(|e| EnvelopeError::Malformed(format!("bad pkfp hex: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashalg::SHA256;

    #[test]
    fn upsert_replaces_entry_with_same_pol() {
        let mut doc = SystemdPolicyDoc::new();
        doc.upsert(SHA256, vec![0, 7], &[0xaa], &[0xde, 0xad], &[0x01, 0x02]);
        doc.upsert(SHA256, vec![0, 7, 14], &[0xaa], &[0xde, 0xad], &[0x03, 0x04]);

        let entries = doc.entries(SHA256);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].pcrs, vec![0, 7, 14]);
        assert_eq!(entries[0].sig, BASE64.encode([0x03, 0x04]));
    }

    #[test]
    fn upsert_appends_entry_with_different_pol() {
        let mut doc = SystemdPolicyDoc::new();
        doc.upsert(SHA256, vec![0], &[0xaa], &[0x01], &[0x01]);
        doc.upsert(SHA256, vec![0], &[0xaa], &[0x02], &[0x02]);
        assert_eq!(doc.entries(SHA256).len(), 2);
    }

    #[test]
    fn round_trips_through_json() {
        let mut doc = SystemdPolicyDoc::new();
        doc.upsert(SHA256, vec![0, 7], &[0xaa, 0xbb], &[0xde, 0xad], &[0x01, 0x02, 0x03]);
        let json = doc.to_json().unwrap();
        let parsed = SystemdPolicyDoc::parse(&json).unwrap();
        assert_eq!(parsed.entries(SHA256), doc.entries(SHA256));
    }
}
