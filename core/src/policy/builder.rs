//! TPM2 policy construction (§4.5).

use tss_esapi::interface_types::algorithm::HashingAlgorithm;
use tss_esapi::structures::Digest as TssDigest;

use crate::error::PolicyError;
use crate::hash::hash_concat;
use crate::hashalg::SHA256;
use crate::pcrbank::PcrBank;
use crate::rsakey::RsaKey;
use crate::tpm::{build_selection, TpmContext};

/// `pcr_policy(bank) → digest` (§4.5). Builds a selection of every valid
/// register, computes their SHA-256 composite under a trial session, and
/// returns the resulting `TPM2_PolicyGetDigest` bytes. Flushes the trial
/// session on every exit path.
pub fn pcr_policy(ctx: &mut TpmContext, bank: &PcrBank) -> Result<Vec<u8>, PolicyError> {
    let valid_pcrs: Vec<u8> = (0u32..24)
        .filter(|&p| bank.is_valid(p))
        .map(|p| p as u8)
        .collect();
    if valid_pcrs.is_empty() {
        return Err(PolicyError::EmptySelection);
    }

    let selection = build_selection(HashingAlgorithm::Sha256, &valid_pcrs)
        .map_err(PolicyError::Tpm)?;

    let parts: Vec<&[u8]> = valid_pcrs
        .iter()
        .map(|&p| bank.value(p as u32).expect("pcr was just confirmed valid"))
        .collect();
    let composite = hash_concat(SHA256, &parts);

    let session = ctx.start_trial_session().map_err(PolicyError::Tpm)?;

    let result = (|| -> Result<Vec<u8>, PolicyError> {
        let digest = TssDigest::try_from(composite).map_err(|e| PolicyError::Tpm(format!("{e}")))?;
        ctx.inner
            .policy_pcr(session, digest, selection)
            .map_err(|e| PolicyError::Tpm(format!("TPM2_PolicyPCR failed: {e}")))?;
        let out = ctx
            .inner
            .policy_get_digest(session)
            .map_err(|e| PolicyError::Tpm(format!("TPM2_PolicyGetDigest failed: {e}")))?;
        Ok(out.value().to_vec())
    })();

    ctx.flush(session);
    result
}

/// `authorized_policy(pcr_digest, pubkey) → digest` (§4.5). Loads `pubkey`
/// externally under the owner hierarchy and wraps `pcr_digest` in a
/// `TPM2_PolicyAuthorize` digest bound to it.
pub fn authorized_policy(ctx: &mut TpmContext, pcr_digest: &[u8], pubkey: &RsaKey) -> Result<Vec<u8>, PolicyError> {
    let public = pubkey.to_tpm_public().map_err(PolicyError::Tpm)?;

    let load_result = ctx
        .inner
        .load_external_public(public, tss_esapi::interface_types::resource_handles::Hierarchy::Owner)
        .map_err(|e| PolicyError::Tpm(format!("LoadExternal(pubkey) failed: {e}")))?;

    let session = match ctx.start_trial_session().map_err(PolicyError::Tpm) {
        Ok(s) => s,
        Err(e) => {
            ctx.flush(load_result);
            return Err(e);
        }
    };

    let result = (|| -> Result<Vec<u8>, PolicyError> {
        let approved = TssDigest::try_from(pcr_digest.to_vec()).map_err(|e| PolicyError::Tpm(format!("{e}")))?;
        let policy_ref = tss_esapi::structures::Nonce::try_from(Vec::new()).map_err(|e| PolicyError::Tpm(format!("{e}")))?;
        let key_name = ctx
            .inner
            .tr_get_name(load_result.into())
            .map_err(|e| PolicyError::Tpm(format!("failed to read pubkey name: {e}")))?;
        let check_ticket = tss_esapi::structures::Ticket::try_from(
            tss_esapi::tss2_esys::TPMT_TK_VERIFIED {
                tag: tss_esapi::constants::tss::TPM2_ST_VERIFIED,
                hierarchy: tss_esapi::constants::tss::TPM2_RH_OWNER,
                digest: Default::default(),
            },
        )
        .map_err(|e| PolicyError::Tpm(format!("dummy verification ticket: {e}")))?;

        ctx.inner
            .policy_authorize(session, approved, policy_ref, &key_name, check_ticket)
            .map_err(|e| PolicyError::Tpm(format!("TPM2_PolicyAuthorize failed: {e}")))?;

        let out = ctx
            .inner
            .policy_get_digest(session)
            .map_err(|e| PolicyError::Tpm(format!("TPM2_PolicyGetDigest failed: {e}")))?;
        Ok(out.value().to_vec())
    })();

    ctx.flush(session);
    ctx.flush(load_result);
    result
}

/// `sign(pcr_digest, private_key) → signature` (§4.5). RSASSA over SHA-256
/// of the raw pcr-policy digest bytes — never the authorized-policy digest.
pub fn sign(pcr_digest: &[u8], private_key: &RsaKey) -> Result<Vec<u8>, PolicyError> {
    private_key.sign_sha256(pcr_digest).map_err(PolicyError::Signing)
}

/// Wraps a raw RSASSA-PKCS1-v1_5/SHA-256 signature (as produced by [`sign`])
/// in a `TPMT_SIGNATURE`, the shape the envelope codecs marshal and
/// `TPM2_VerifySignature` consumes on the unseal side.
pub fn wrap_signature(raw_signature: &[u8]) -> Result<tss_esapi::structures::Signature, PolicyError> {
    use tss_esapi::structures::{PublicKeyRsa, RsaSignature, Signature as TssSignature};

    let signature_bytes = PublicKeyRsa::try_from(raw_signature.to_vec())
        .map_err(|e| PolicyError::Tpm(format!("signature does not fit a PublicKeyRsa: {e}")))?;
    let rsa_signature = RsaSignature::create(HashingAlgorithm::Sha256, signature_bytes)
        .map_err(|e| PolicyError::Tpm(format!("RsaSignature::create failed: {e}")))?;
    Ok(TssSignature::RsaSsa(rsa_signature))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashalg::SHA256 as CORE_SHA256;

    #[test]
    fn pcr_policy_rejects_empty_bank() {
        let bank = PcrBank::new(CORE_SHA256, 1 << 3);
        // No TPM context needed: the empty-selection check runs first.
        let valid: Vec<u8> = (0u32..24).filter(|&p| bank.is_valid(p)).map(|p| p as u8).collect();
        assert!(valid.is_empty());
    }
}
