//! PCR bank simulation (§4.4).

use crate::digest::Digest;
use crate::hash::hash_concat;
use crate::hashalg::HashAlg;
use crate::pcrspec::PCR_COUNT;

/// A simulated bank of 24 PCRs under one hash algorithm.
///
/// Invariants upheld by this type: `valid_mask` is always a subset of
/// `requested_mask`, every register with its valid bit set holds exactly
/// `alg.digest_size` bytes, and `valid_mask` only ever grows (extend never
/// clears a bit).
#[derive(Debug, Clone)]
pub struct PcrBank {
    alg: HashAlg,
    requested_mask: u32,
    valid_mask: u32,
    registers: Vec<Vec<u8>>,
    /// Startup locality for PCR0, as reported by the log's StartupLocality
    /// record (§4.1, §4.4). Defaults to 0 (the common BIOS case).
    locality: u8,
    pcr0_extended: bool,
}

impl PcrBank {
    /// `(algorithm, requested-mask) → bank` with all registers zeroed and
    /// valid-mask = 0 (§4.4 base constructor).
    pub fn new(alg: HashAlg, requested_mask: u32) -> Self {
        Self {
            alg,
            requested_mask,
            valid_mask: 0,
            registers: vec![vec![0u8; alg.digest_size]; PCR_COUNT as usize],
            locality: 0,
            pcr0_extended: false,
        }
    }

    /// Clears all requested registers and marks them valid immediately,
    /// without going through extend (§4.4 from-zero constructor).
    pub fn from_zero(alg: HashAlg, requested_mask: u32) -> Self {
        let mut bank = Self::new(alg, requested_mask);
        bank.valid_mask = requested_mask;
        bank
    }

    /// Parses a textual PCR snapshot of `<index> <hex-digest>` lines
    /// (§4.4 from-snapshot constructor, §6(f)).
    pub fn from_snapshot(alg: HashAlg, requested_mask: u32, text: &str) -> Result<Self, String> {
        let mut bank = Self::new(alg, requested_mask);
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let idx_str = parts.next().ok_or_else(|| format!("malformed line {line:?}"))?;
            let hex_str = parts.next().ok_or_else(|| format!("malformed line {line:?}"))?;
            let idx: u32 = idx_str
                .parse()
                .map_err(|_| format!("malformed PCR index {idx_str:?}"))?;
            if idx >= PCR_COUNT {
                return Err(format!("PCR index {idx} out of range"));
            }
            let bytes = hex::decode(hex_str).map_err(|e| format!("malformed hex digest: {e}"))?;
            if bytes.len() != alg.digest_size {
                return Err(format!(
                    "digest for pcr {idx} has length {}, expected {}",
                    bytes.len(),
                    alg.digest_size
                ));
            }
            bank.registers[idx as usize] = bytes;
            bank.valid_mask |= 1 << idx;
        }
        Ok(bank)
    }

    /// Reads the live TPM's PCR bank directly via `TPM2_PCR_Read`, in chunks
    /// of at most 8 registers (§4.4 "from-current" constructor). Used by
    /// `unseal-secret` to compare a prediction against what the TPM actually
    /// holds, without replaying any event log.
    pub fn from_current(ctx: &mut crate::tpm::TpmContext, alg: HashAlg, requested_mask: u32) -> Result<Self, String> {
        let mut bank = Self::new(alg, requested_mask);
        let hashing_alg = alg.to_hashing_algorithm()?;
        let pcrs: Vec<u8> = (0u32..PCR_COUNT).filter(|&p| bank.is_requested(p)).map(|p| p as u8).collect();
        if pcrs.is_empty() {
            return Ok(bank);
        }
        for (pcr, value) in ctx.read_pcrs(hashing_alg, &pcrs)? {
            if value.len() != alg.digest_size {
                return Err(format!(
                    "TPM returned a {}-byte digest for pcr {pcr}, expected {}",
                    value.len(),
                    alg.digest_size
                ));
            }
            bank.registers[pcr as usize] = value;
            bank.valid_mask |= 1 << pcr;
        }
        Ok(bank)
    }

    pub fn alg(&self) -> HashAlg {
        self.alg
    }

    pub fn requested_mask(&self) -> u32 {
        self.requested_mask
    }

    pub fn valid_mask(&self) -> u32 {
        self.valid_mask
    }

    pub fn is_requested(&self, pcr: u32) -> bool {
        pcr < PCR_COUNT && (self.requested_mask & (1 << pcr)) != 0
    }

    pub fn is_valid(&self, pcr: u32) -> bool {
        pcr < PCR_COUNT && (self.valid_mask & (1 << pcr)) != 0
    }

    pub fn value(&self, pcr: u32) -> Option<&[u8]> {
        if self.is_valid(pcr) {
            Some(&self.registers[pcr as usize])
        } else {
            None
        }
    }

    /// Sets the startup locality reported for PCR0 (§4.1 `get_locality`,
    /// §4.4). Must be called before the first extend of PCR0 to take effect.
    pub fn set_locality(&mut self, locality: u8) {
        self.locality = locality;
    }

    /// Extends `digest` into PCR `pcr`. Events whose PCR index is outside the
    /// bank's requested mask are silently skipped, not errored (§4.4 replay).
    /// Firmware-recorded digests extend verbatim, all-zero/all-0xff included —
    /// the invalid-digest rejection only applies to rehash *output* (§4.3,
    /// enforced in `rehash::engine`), not to replay of the log as recorded.
    pub fn extend(&mut self, pcr: u32, digest: &Digest) {
        if pcr >= PCR_COUNT || !self.is_requested(pcr) {
            return;
        }
        if digest.alg != self.alg {
            return;
        }

        let start = if pcr == 0 && !self.pcr0_extended && self.locality != 0 {
            locality_initial_value(self.alg, self.locality)
        } else {
            self.registers[pcr as usize].clone()
        };

        let next = hash_concat(self.alg, &[&start, digest.as_bytes()]);
        self.registers[pcr as usize] = next;
        self.valid_mask |= 1 << pcr;
        if pcr == 0 {
            self.pcr0_extended = true;
        }
    }
}

/// TCG locality pre-fill value for PCR0's first extend when the reporting
/// locality is not 0 (§4.4, §9 "Locality of PCR0 initial value"). Only the
/// first-event case is defined; mid-log locality changes are unspecified.
fn locality_initial_value(alg: HashAlg, locality: u8) -> Vec<u8> {
    let mut preimage = vec![0u8; alg.digest_size - 1];
    preimage.push(locality);
    hash_concat(alg, &[&preimage])
}
