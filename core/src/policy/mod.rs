//! TPM2 policy construction (§4.5).

pub mod builder;

pub use builder::{authorized_policy, pcr_policy, sign, wrap_signature};
