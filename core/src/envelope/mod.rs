//! Sealed-secret and signed-policy envelope codecs (§4.6).
//!
//! Three on-disk shapes share the same logical contents (a marshalled
//! `TPM2B_PUBLIC`/`TPM2B_PRIVATE` pair plus a policy program, or a bare
//! signature); this module normalizes them into [`SealedSecret`] so the
//! unseal driver doesn't need to know which file format produced it.

pub mod legacy;
pub mod policy_program;
pub mod systemd_json;
pub mod tpm2_keyfile;

pub use policy_program::{PolicyInstruction, PolicyProgram};
pub use tpm2_keyfile::NamedPolicy;

/// A sealed secret's policy shape, independent of on-disk encoding.
///
/// The legacy format never stores a policy program on disk — the sealing
/// policy is baked into the TPM object's `authPolicy` digest, and the caller
/// re-supplies the pcr selection via `--pcrs`/`--algo` at unseal time — so
/// `Legacy` carries none; only the tpm2-key-file format has an inline
/// `Pcr`/`AuthPolicy` choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopePolicy {
    Legacy,
    Pcr(PolicyProgram),
    AuthPolicy(Vec<NamedPolicy>),
}

pub struct SealedSecret {
    pub public: Vec<u8>,
    pub private: Vec<u8>,
    pub policy: EnvelopePolicy,
}
