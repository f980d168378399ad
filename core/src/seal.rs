//! Seals a secret under a policy digest (the inverse of [`crate::unseal`]).
//! Not its own spec component — the overview's data-flow line folds it into
//! "policy builder → signer / envelope writer" — but a sealed secret has to
//! come from somewhere, and `TPM2_Create` under a `KEYEDHASH` template with
//! `authPolicy` set to the digest [`crate::policy::pcr_policy`] (or
//! [`crate::policy::authorized_policy`]) produced is the standard way every
//! TPM2 sealing flow in this corpus does it (grounded in the witnessd-core
//! `seal()`/`create_srk()` pair).

use tss_esapi::attributes::ObjectAttributesBuilder;
use tss_esapi::interface_types::algorithm::{HashingAlgorithm, PublicAlgorithm};
use tss_esapi::structures::{
    Digest as TssDigest, KeyedHashScheme, Public, PublicBuilder, PublicKeyedHashParameters, SensitiveData,
};
use tss_esapi::traits::Marshall;

use crate::error::PolicyError;
use crate::tpm::TpmContext;

/// Builds the `KEYEDHASH` sealed-data template: no signing/decryption
/// scheme, `authPolicy` pinned to `policy_digest`, no separate object auth
/// value (the policy alone gates access).
fn sealed_data_template(policy_digest: &[u8]) -> Result<Public, PolicyError> {
    let object_attributes = ObjectAttributesBuilder::new()
        .with_fixed_tpm(true)
        .with_fixed_parent(true)
        .with_no_da(true)
        .build()
        .map_err(|e| PolicyError::Tpm(format!("sealed object attributes: {e}")))?;

    let policy = TssDigest::try_from(policy_digest.to_vec()).map_err(|e| PolicyError::Tpm(format!("{e}")))?;

    PublicBuilder::new()
        .with_public_algorithm(PublicAlgorithm::KeyedHash)
        .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
        .with_object_attributes(object_attributes)
        .with_auth_policy(policy)
        .with_keyed_hash_parameters(PublicKeyedHashParameters::new(KeyedHashScheme::Null))
        .with_keyed_hash_unique_identifier(TssDigest::default())
        .build()
        .map_err(|e| PolicyError::Tpm(format!("sealed object template: {e}")))
}

/// Seals `data` under the owner-hierarchy SRK, gated by `policy_digest`.
/// Returns the marshalled `(TPM2B_PUBLIC, TPM2B_PRIVATE)` pair ready for an
/// envelope codec. Flushes the SRK on every exit path.
pub fn seal_secret(ctx: &mut TpmContext, data: &[u8], policy_digest: &[u8]) -> Result<(Vec<u8>, Vec<u8>), PolicyError> {
    let srk = ctx.create_srk(crate::tpm::DEFAULT_SRK_KEY_BITS).map_err(PolicyError::Tpm)?;

    let result = (|| -> Result<(Vec<u8>, Vec<u8>), PolicyError> {
        let template = sealed_data_template(policy_digest)?;
        let sensitive_data = SensitiveData::try_from(data.to_vec()).map_err(|e| PolicyError::Tpm(format!("{e}")))?;

        let created = ctx
            .inner
            .create(srk, template, None, Some(sensitive_data), None, None)
            .map_err(|e| PolicyError::Tpm(format!("TPM2_Create failed: {e}")))?;

        let public = created.out_public.marshall().map_err(|e| PolicyError::Tpm(format!("{e}")))?;
        let private = created.out_private.marshall().map_err(|e| PolicyError::Tpm(format!("{e}")))?;
        Ok((public, private))
    })();

    ctx.flush(srk);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_data_template_accepts_a_sha256_sized_digest() {
        let digest = vec![0x11u8; 32];
        assert!(sealed_data_template(&digest).is_ok());
    }
}
