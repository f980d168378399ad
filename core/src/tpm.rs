//! The TPM context: an explicit collaborator wrapping an ESAPI session,
//! passed into the policy builder and unseal driver rather than fetched from
//! a process-global accessor (§9 "Global TPM context").

use std::convert::TryFrom;

use tss_esapi::attributes::ObjectAttributesBuilder;
use tss_esapi::constants::SessionType;
use tss_esapi::handles::{KeyHandle, ObjectHandle};
use tss_esapi::interface_types::algorithm::{HashingAlgorithm, PublicAlgorithm};
use tss_esapi::interface_types::resource_handles::Hierarchy;
use tss_esapi::interface_types::session_handles::PolicySession;
use tss_esapi::structures::{
    Digest as TssDigest, PcrSelectionList, PcrSelectionListBuilder, PcrSlot, Public,
    PublicBuilder, PublicKeyRsa, PublicRsaParametersBuilder, RsaExponent, RsaScheme,
    SymmetricDefinition, SymmetricDefinitionObject,
};
use tss_esapi::tcti_ldr::TctiNameConf;
use tss_esapi::Context;

/// Default SRK key size in bits (§9 "SRK template": "key-size configurable
/// at process start (default 2048)").
pub const DEFAULT_SRK_KEY_BITS: u32 = 2048;

/// Wraps an ESAPI `Context`; all transient handles created through the
/// methods below must be flushed by the caller on every exit path (§5).
pub struct TpmContext {
    pub(crate) inner: Context,
}

impl TpmContext {
    /// Opens a context against `tcti` (the platform default TCTI when
    /// `None`, per the `tcti` field of [`crate::config::Config`]).
    pub fn open(tcti: Option<&str>) -> Result<Self, String> {
        let conf = match tcti {
            Some(spec) => spec.parse::<TctiNameConf>().map_err(|e| format!("invalid TCTI {spec:?}: {e}"))?,
            None => TctiNameConf::from_environment_variable().map_err(|e| format!("no TCTI available: {e}"))?,
        };
        let inner = Context::new(conf).map_err(|e| format!("failed to open TPM context: {e}"))?;
        Ok(Self { inner })
    }

    pub fn flush(&mut self, handle: impl Into<ObjectHandle>) {
        let _ = self.inner.flush_context(handle.into());
    }

    /// Builds the RSA owner-hierarchy SRK template (§9 "SRK template":
    /// always RSA, owner hierarchy, NODA set to match the boot-loader SRK).
    pub fn srk_template(key_bits: u32) -> Result<Public, String> {
        let object_attributes = ObjectAttributesBuilder::new()
            .with_fixed_tpm(true)
            .with_fixed_parent(true)
            .with_sensitive_data_origin(true)
            .with_user_with_auth(true)
            .with_no_da(true)
            .with_restricted(true)
            .with_decrypt(true)
            .build()
            .map_err(|e| format!("SRK attributes: {e}"))?;

        let rsa_params = PublicRsaParametersBuilder::new()
            .with_symmetric(SymmetricDefinitionObject::Aes { key_bits: tss_esapi::interface_types::key_bits::AesKeyBits::try_from(128u16).map_err(|e| format!("{e}"))?, mode: tss_esapi::interface_types::algorithm::SymmetricMode::Cfb })
            .with_key_bits(tss_esapi::interface_types::key_bits::RsaKeyBits::try_from(key_bits as u16).map_err(|e| format!("unsupported RSA key size {key_bits}: {e}"))?)
            .with_exponent(RsaExponent::default())
            .with_is_decryption_key(true)
            .with_restricted(true)
            .build()
            .map_err(|e| format!("SRK RSA params: {e}"))?;

        PublicBuilder::new()
            .with_public_algorithm(PublicAlgorithm::Rsa)
            .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
            .with_object_attributes(object_attributes)
            .with_rsa_parameters(rsa_params)
            .with_rsa_unique_identifier(PublicKeyRsa::default())
            .build()
            .map_err(|e| format!("SRK public template: {e}"))
    }

    /// Creates a transient SRK under the owner hierarchy. Caller flushes it.
    pub fn create_srk(&mut self, key_bits: u32) -> Result<KeyHandle, String> {
        let template = Self::srk_template(key_bits)?;
        let result = self
            .inner
            .create_primary(Hierarchy::Owner, template, None, None, None)
            .map_err(|e| format!("create_primary(SRK) failed: {e}"))?;
        Ok(result.key_handle)
    }

    /// `PCR2_Read` in chunks of at most 8 registers (§4.4 "from-current").
    pub fn read_pcrs(&mut self, alg: HashingAlgorithm, pcrs: &[u8]) -> Result<Vec<(u8, Vec<u8>)>, String> {
        let mut out = Vec::with_capacity(pcrs.len());
        for chunk in pcrs.chunks(8) {
            let selection = build_selection(alg, chunk)?;
            let (_update_counter, digests) = self
                .inner
                .pcr_read(selection)
                .map_err(|e| format!("TPM2_PCR_Read failed: {e}"))?;
            let values: Vec<TssDigest> = digests.value().to_vec();
            if values.len() != chunk.len() {
                return Err(format!(
                    "TPM returned {} PCR values for a request of {}",
                    values.len(),
                    chunk.len()
                ));
            }
            for (pcr, digest) in chunk.iter().zip(values) {
                out.push((*pcr, digest.value().to_vec()));
            }
        }
        Ok(out)
    }

    pub fn start_trial_session(&mut self) -> Result<PolicySession, String> {
        self.start_session(SessionType::Trial)
    }

    pub fn start_policy_session(&mut self) -> Result<PolicySession, String> {
        self.start_session(SessionType::Policy)
    }

    fn start_session(&mut self, kind: SessionType) -> Result<PolicySession, String> {
        let session = self
            .inner
            .start_auth_session(
                None,
                None,
                None,
                kind,
                SymmetricDefinition::AES_128_CFB,
                HashingAlgorithm::Sha256,
            )
            .map_err(|e| format!("start_auth_session failed: {e}"))?
            .ok_or_else(|| "TPM did not return a session handle".to_string())?;
        PolicySession::try_from(session).map_err(|e| format!("not a policy session: {e}"))
    }
}

pub fn build_selection(alg: HashingAlgorithm, pcrs: &[u8]) -> Result<PcrSelectionList, String> {
    let mut slots = Vec::with_capacity(pcrs.len());
    for pcr in pcrs {
        slots.push(PcrSlot::try_from(*pcr).map_err(|e| format!("pcr {pcr} out of range: {e}"))?);
    }
    let selection = tss_esapi::structures::PcrSelection::create(alg, slots)
        .map_err(|e| format!("PcrSelection::create failed: {e}"))?;
    Ok(PcrSelectionListBuilder::new()
        .with_selection(PcrSelectionList::from_selections(vec![selection]).map_err(|e| format!("{e}"))?)
        .build())
}
