//! The unseal driver (§4.7): decodes an envelope, replays its policy program
//! against the live TPM, and unseals the protected secret through a
//! secret-erasing output buffer.
//!
//! The legacy envelope format never stores a policy program on disk, so the
//! leading `PolicyPCR` step is always rebuilt here from the caller-supplied
//! `alg`/`pcrs` rather than read from the file; this is the same selection
//! the CLI's `--pcrs`/`--algo` flags carry on `unseal-secret` (§6). For the
//! tpm2-key-file `authPolicy` form, this PolicyPCR step accumulates the
//! running policy digest the stored `PolicyAuthorize` step then checks a
//! signature against — the file only needs to store the latter.

use std::fs;
use std::io;
use std::path::Path;

use tss_esapi::handles::ObjectHandle;
use tss_esapi::interface_types::algorithm::HashingAlgorithm;
use tss_esapi::interface_types::resource_handles::Hierarchy;
use tss_esapi::structures::{Digest as TssDigest, Nonce, Private, Public, Signature};
use tss_esapi::traits::UnMarshall;

use crate::envelope::{EnvelopePolicy, NamedPolicy, PolicyInstruction, SealedSecret};
use crate::error::UnsealError;
use crate::tpm::{build_selection, TpmContext};

/// A buffer that zeroes its contents when dropped, so an unseal failure
/// never leaves secret bytes sitting in freed memory (§5 "secret buffers
/// are zeroed before free").
struct SecretBuffer(Vec<u8>);

impl Drop for SecretBuffer {
    fn drop(&mut self) {
        for byte in self.0.iter_mut() {
            *byte = 0;
        }
    }
}

/// Unseals `secret` under `ctx`, using `alg`/`pcrs` to build the leading
/// `PolicyPCR` step, and returns the raw plaintext bytes (§4.7 steps 1-5).
/// The caller is responsible for writing the returned bytes out and zeroing
/// its own copy once done; this function zeroes all of its own scratch
/// buffers regardless of outcome.
pub fn unseal(
    ctx: &mut TpmContext,
    secret: &SealedSecret,
    alg: HashingAlgorithm,
    pcrs: &[u8],
) -> Result<Vec<u8>, UnsealError> {
    let public = Public::unmarshall(&secret.public).map_err(|e| UnsealError::Tpm(format!("bad public blob: {e}")))?;
    let private = Private::unmarshall(&secret.private).map_err(|e| UnsealError::Tpm(format!("bad private blob: {e}")))?;

    let srk = ctx.create_srk(crate::tpm::DEFAULT_SRK_KEY_BITS).map_err(UnsealError::Tpm)?;

    let load_result = (|| -> Result<_, UnsealError> {
        ctx.inner.load(srk, private, public).map_err(|e| UnsealError::Tpm(format!("TPM2_Load failed: {e}")))
    })();

    let load_handle = match load_result {
        Ok(h) => h,
        Err(e) => {
            ctx.flush(srk);
            return Err(e);
        }
    };

    let candidates = match &secret.policy {
        EnvelopePolicy::Legacy | EnvelopePolicy::Pcr(_) => vec![None],
        EnvelopePolicy::AuthPolicy(named) => named.iter().map(Some).collect(),
    };

    let mut result = Err(UnsealError::NoPolicySatisfied);
    for candidate in candidates {
        match try_candidate(ctx, load_handle, alg, pcrs, candidate) {
            Ok(bytes) => {
                result = Ok(bytes);
                break;
            }
            Err(_) => continue,
        }
    }

    ctx.flush(load_handle);
    ctx.flush(srk);
    result
}

fn try_candidate(
    ctx: &mut TpmContext,
    load_handle: tss_esapi::handles::KeyHandle,
    alg: HashingAlgorithm,
    pcrs: &[u8],
    candidate: Option<&NamedPolicy>,
) -> Result<Vec<u8>, UnsealError> {
    let session = ctx.start_policy_session().map_err(UnsealError::Tpm)?;

    let outcome = (|| -> Result<Vec<u8>, UnsealError> {
        let selection = build_selection(alg, pcrs).map_err(UnsealError::Tpm)?;
        let empty_digest = TssDigest::try_from(Vec::new()).map_err(|e| UnsealError::Tpm(format!("{e}")))?;
        ctx.inner
            .policy_pcr(session, empty_digest, selection)
            .map_err(|e| UnsealError::Tpm(format!("TPM2_PolicyPCR failed: {e}")))?;

        if let Some(named) = candidate {
            let instruction = named
                .program
                .iter()
                .find(|i| matches!(i, PolicyInstruction::PolicyAuthorize { .. }))
                .ok_or_else(|| UnsealError::Tpm("authPolicy entry has no PolicyAuthorize step".to_string()))?;
            let PolicyInstruction::PolicyAuthorize { public, policy_ref, signature } = instruction else {
                unreachable!("filtered to PolicyAuthorize above");
            };
            authorize(ctx, session, public, policy_ref, signature)?;
        }

        let unsealed = ctx
            .inner
            .unseal(load_handle, session)
            .map_err(|e| UnsealError::Tpm(format!("TPM2_Unseal failed: {e}")))?;
        Ok(unsealed.value().to_vec())
    })();

    ctx.flush(session);
    outcome
}

fn authorize(
    ctx: &mut TpmContext,
    session: tss_esapi::interface_types::session_handles::PolicySession,
    pubkey_der: &[u8],
    policy_ref: &[u8],
    signature_bytes: &[u8],
) -> Result<(), UnsealError> {
    let pubkey = Public::unmarshall(pubkey_der).map_err(|e| UnsealError::Tpm(format!("bad authorize pubkey: {e}")))?;
    let signature = Signature::unmarshall(signature_bytes).map_err(|e| UnsealError::Tpm(format!("bad signature: {e}")))?;

    let pubkey_handle = ctx
        .inner
        .load_external_public(pubkey, Hierarchy::Owner)
        .map_err(|e| UnsealError::Tpm(format!("LoadExternal(pubkey) failed: {e}")))?;

    let result = (|| -> Result<(), UnsealError> {
        let current_digest = ctx
            .inner
            .policy_get_digest(session)
            .map_err(|e| UnsealError::Tpm(format!("PolicyGetDigest failed: {e}")))?;

        let ticket = ctx
            .inner
            .verify_signature(pubkey_handle, current_digest.clone(), signature)
            .map_err(|e| UnsealError::Tpm(format!("VerifySignature failed: {e}")))?;

        let policy_ref = Nonce::try_from(policy_ref.to_vec()).map_err(|e| UnsealError::Tpm(format!("{e}")))?;
        let key_name = ctx
            .inner
            .tr_get_name(ObjectHandle::from(pubkey_handle))
            .map_err(|e| UnsealError::Tpm(format!("failed to read pubkey name: {e}")))?;

        ctx.inner
            .policy_authorize(session, current_digest, policy_ref, &key_name, ticket)
            .map_err(|e| UnsealError::Tpm(format!("TPM2_PolicyAuthorize failed: {e}")))
    })();

    ctx.flush(pubkey_handle);
    result
}

/// Writes `secret` to `path` and zeroes its own copy before returning,
/// whether the write succeeds or fails (§4.7 step 6, §5 "secret buffers are
/// zeroed before free").
pub fn write_secret_erasing(path: &Path, secret: Vec<u8>) -> io::Result<()> {
    let buffer = SecretBuffer(secret);
    fs::write(path, &buffer.0)
}
