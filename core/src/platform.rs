//! Target-platform dispatch (§3 "Target platform", §4.6). Selects which
//! envelope codec a `seal-secret`/`sign-policy` invocation writes through.

use crate::envelope::{legacy, tpm2_keyfile, systemd_json, EnvelopePolicy, NamedPolicy, SealedSecret};
use crate::error::EnvelopeError;
use crate::hashalg::HashAlg;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetPlatform {
    LegacyGrub,
    Tpm2KeyFile,
    SystemdJson,
}

impl TargetPlatform {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "legacy" | "grub" | "oldgrub" => Some(Self::LegacyGrub),
            "tpm2-key-file" | "keyfile" => Some(Self::Tpm2KeyFile),
            "systemd" | "systemd-json" => Some(Self::SystemdJson),
            _ => None,
        }
    }

    /// Writes a sealed secret envelope. `systemd-json` carries no sealed
    /// secret shape — only signed policies — and is rejected (§4.6).
    pub fn write_sealed_secret(&self, secret: &SealedSecret) -> Result<Vec<u8>, EnvelopeError> {
        match self {
            TargetPlatform::LegacyGrub => Ok(legacy::encode_sealed(&secret.public, &secret.private)),
            TargetPlatform::Tpm2KeyFile => {
                let policy = match &secret.policy {
                    EnvelopePolicy::Pcr(program) => tpm2_keyfile::PolicyKind::Pcr(program.clone()),
                    EnvelopePolicy::AuthPolicy(named) => tpm2_keyfile::PolicyKind::AuthPolicy(
                        named
                            .iter()
                            .map(|n| tpm2_keyfile::NamedPolicy { name: n.name.clone(), program: n.program.clone() })
                            .collect(),
                    ),
                    EnvelopePolicy::Legacy => {
                        return Err(EnvelopeError::Malformed(
                            "tpm2-key-file requires an inline policy program".to_string(),
                        ))
                    }
                };
                let keyfile = tpm2_keyfile::TpmKeyFile {
                    empty_auth: true,
                    parent: tpm2_keyfile::PARENT_OWNER_PERSISTENT,
                    public: secret.public.clone(),
                    private: secret.private.clone(),
                    policy,
                };
                Ok(keyfile.encode())
            }
            TargetPlatform::SystemdJson => Err(EnvelopeError::Unsupported),
        }
    }

    pub fn read_sealed_secret(&self, bytes: &[u8]) -> Result<SealedSecret, EnvelopeError> {
        match self {
            TargetPlatform::LegacyGrub => {
                let (public, private) = legacy::decode_sealed(bytes)?;
                Ok(SealedSecret { public, private, policy: EnvelopePolicy::Legacy })
            }
            TargetPlatform::Tpm2KeyFile => {
                let keyfile = tpm2_keyfile::TpmKeyFile::decode(bytes)?;
                let policy = match keyfile.policy {
                    tpm2_keyfile::PolicyKind::Pcr(program) => EnvelopePolicy::Pcr(program),
                    tpm2_keyfile::PolicyKind::AuthPolicy(named) => EnvelopePolicy::AuthPolicy(
                        named
                            .into_iter()
                            .map(|n| NamedPolicy { name: n.name, program: n.program })
                            .collect(),
                    ),
                };
                Ok(SealedSecret { public: keyfile.public, private: keyfile.private, policy })
            }
            TargetPlatform::SystemdJson => Err(EnvelopeError::Unsupported),
        }
    }

    /// Writes a signed pcr-policy. Legacy writes the bare `TPMT_SIGNATURE`;
    /// systemd-json upserts a `(pcrs, pkfp, pol, sig)` entry; tpm2-key-file
    /// does not carry a standalone signed-policy file (the signature lives
    /// inside the key file's `authPolicy` entries instead).
    pub fn write_signed_policy(
        &self,
        signature: &tss_esapi::structures::Signature,
        alg: HashAlg,
        pcrs: &[u32],
        public_key_fingerprint: &[u8],
        pcr_policy_digest: &[u8],
        existing_doc: Option<systemd_json::SystemdPolicyDoc>,
    ) -> Result<Vec<u8>, EnvelopeError> {
        match self {
            TargetPlatform::LegacyGrub => legacy::encode_signed_policy(signature),
            TargetPlatform::SystemdJson => {
                let mut doc = existing_doc.unwrap_or_default();
                let raw_signature = signature_bytes(signature)?;
                doc.upsert(alg, pcrs.to_vec(), public_key_fingerprint, pcr_policy_digest, &raw_signature);
                doc.to_json()
            }
            TargetPlatform::Tpm2KeyFile => Err(EnvelopeError::Unsupported),
        }
    }
}

fn signature_bytes(signature: &tss_esapi::structures::Signature) -> Result<Vec<u8>, EnvelopeError> {
    use tss_esapi::traits::Marshall;
    signature.marshall().map_err(|e| EnvelopeError::Tpm(format!("{e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_accepted_names() {
        assert_eq!(TargetPlatform::parse("legacy"), Some(TargetPlatform::LegacyGrub));
        assert_eq!(TargetPlatform::parse("tpm2-key-file"), Some(TargetPlatform::Tpm2KeyFile));
        assert_eq!(TargetPlatform::parse("systemd"), Some(TargetPlatform::SystemdJson));
        assert_eq!(TargetPlatform::parse("nonsense"), None);
    }

    #[test]
    fn systemd_platform_rejects_sealed_secret() {
        let secret = SealedSecret { public: vec![0, 0], private: vec![], policy: EnvelopePolicy::Legacy };
        let err = TargetPlatform::SystemdJson.write_sealed_secret(&secret).unwrap_err();
        assert!(matches!(err, EnvelopeError::Unsupported));
    }

    #[test]
    fn legacy_sealed_secret_round_trips() {
        let secret = SealedSecret {
            public: {
                let mut v = vec![0u8, 2];
                v.extend_from_slice(&[0xaa, 0xbb]);
                v
            },
            private: vec![0x01, 0x02, 0x03],
            policy: EnvelopePolicy::Legacy,
        };
        let encoded = TargetPlatform::LegacyGrub.write_sealed_secret(&secret).unwrap();
        let decoded = TargetPlatform::LegacyGrub.read_sealed_secret(&encoded).unwrap();
        assert_eq!(decoded.public, secret.public);
        assert_eq!(decoded.private, secret.private);
    }
}
