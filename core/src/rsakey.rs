//! RSA keys (§3 "RSA key"). Only RSA is supported, moduli 1024/2048/3072/4096
//! bits, signature algorithm RSASSA over SHA-256.

use std::fs;
use std::path::{Path, PathBuf};

use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private, Public};
use openssl::rsa::Rsa;
use openssl::sign::{Signer, Verifier};

const SUPPORTED_MODULI: &[u32] = &[1024, 2048, 3072, 4096];

/// An RSA key loaded from a PEM file: the path it came from, the OpenSSL
/// handle, and whether it holds private material.
pub struct RsaKey {
    pem_path: PathBuf,
    handle: RsaHandle,
    is_private: bool,
}

enum RsaHandle {
    Private(PKey<Private>),
    Public(PKey<Public>),
}

impl RsaKey {
    pub fn load_private(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref().to_path_buf();
        let pem = fs::read(&path).map_err(|e| format!("reading {}: {e}", path.display()))?;
        let rsa = Rsa::private_key_from_pem(&pem).map_err(|e| format!("parsing RSA private key: {e}"))?;
        check_modulus(rsa.size() * 8)?;
        let pkey = PKey::from_rsa(rsa).map_err(|e| format!("wrapping RSA key: {e}"))?;
        Ok(Self { pem_path: path, handle: RsaHandle::Private(pkey), is_private: true })
    }

    pub fn load_public(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref().to_path_buf();
        let pem = fs::read(&path).map_err(|e| format!("reading {}: {e}", path.display()))?;
        let rsa = Rsa::public_key_from_pem(&pem).map_err(|e| format!("parsing RSA public key: {e}"))?;
        check_modulus(rsa.size() * 8)?;
        let pkey = PKey::from_rsa(rsa).map_err(|e| format!("wrapping RSA key: {e}"))?;
        Ok(Self { pem_path: path, handle: RsaHandle::Public(pkey), is_private: false })
    }

    pub fn pem_path(&self) -> &Path {
        &self.pem_path
    }

    pub fn is_private(&self) -> bool {
        self.is_private
    }

    /// The public modulus/exponent, independent of whether this key holds
    /// private material (needed to derive a `TPM2B_PUBLIC` for either).
    fn public_rsa(&self) -> Result<Rsa<Public>, String> {
        match &self.handle {
            RsaHandle::Private(pkey) => {
                let rsa = pkey.rsa().map_err(|e| format!("{e}"))?;
                let n = rsa.n().to_owned().map_err(|e| format!("{e}"))?;
                let e = rsa.e().to_owned().map_err(|e| format!("{e}"))?;
                Rsa::from_public_components(n, e).map_err(|e| format!("{e}"))
            }
            RsaHandle::Public(pkey) => pkey.rsa().map_err(|e| format!("{e}")),
        }
    }

    pub fn key_bits(&self) -> Result<u32, String> {
        Ok(self.public_rsa()?.size() * 8)
    }

    /// RSASSA-PKCS1-v1_5 over SHA-256, as required for the pcr-policy
    /// signature (§4.5 `sign`).
    pub fn sign_sha256(&self, data: &[u8]) -> Result<Vec<u8>, String> {
        let RsaHandle::Private(pkey) = &self.handle else {
            return Err("cannot sign with a public-only key".to_string());
        };
        let mut signer = Signer::new(MessageDigest::sha256(), pkey).map_err(|e| format!("{e}"))?;
        signer.update(data).map_err(|e| format!("{e}"))?;
        signer.sign_to_vec().map_err(|e| format!("{e}"))
    }

    pub fn verify_sha256(&self, data: &[u8], signature: &[u8]) -> Result<bool, String> {
        let rsa = self.public_rsa()?;
        let pkey = PKey::from_rsa(rsa).map_err(|e| format!("{e}"))?;
        let mut verifier = Verifier::new(MessageDigest::sha256(), &pkey).map_err(|e| format!("{e}"))?;
        verifier.update(data).map_err(|e| format!("{e}"))?;
        verifier.verify(signature).map_err(|e| format!("{e}"))
    }

    /// Marshals this key's public half into a `tss_esapi` `Public` template,
    /// the shape `LoadExternal` and the envelope codecs need (§4.5, §4.6).
    pub fn to_tpm_public(&self) -> Result<tss_esapi::structures::Public, String> {
        use tss_esapi::attributes::ObjectAttributesBuilder;
        use tss_esapi::interface_types::algorithm::{HashingAlgorithm, PublicAlgorithm};
        use tss_esapi::interface_types::key_bits::RsaKeyBits;
        use tss_esapi::structures::{PublicBuilder, PublicKeyRsa, PublicRsaParametersBuilder, RsaExponent, RsaScheme};

        let rsa = self.public_rsa()?;
        let n_bytes = rsa.n().to_vec();
        let key_bits = RsaKeyBits::try_from((rsa.size() * 8) as u16).map_err(|e| format!("{e}"))?;

        let object_attributes = ObjectAttributesBuilder::new()
            .with_user_with_auth(true)
            .with_sign_encrypt(true)
            .build()
            .map_err(|e| format!("{e}"))?;

        let rsa_params = PublicRsaParametersBuilder::new()
            .with_key_bits(key_bits)
            .with_exponent(RsaExponent::default())
            .with_scheme(RsaScheme::RsaSsa(tss_esapi::structures::HashScheme::new(HashingAlgorithm::Sha256)))
            .with_is_signing_key(true)
            .build()
            .map_err(|e| format!("{e}"))?;

        PublicBuilder::new()
            .with_public_algorithm(PublicAlgorithm::Rsa)
            .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
            .with_object_attributes(object_attributes)
            .with_rsa_parameters(rsa_params)
            .with_rsa_unique_identifier(PublicKeyRsa::try_from(n_bytes).map_err(|e| format!("{e}"))?)
            .build()
            .map_err(|e| format!("{e}"))
    }
}

fn check_modulus(bits: u32) -> Result<(), String> {
    if SUPPORTED_MODULI.contains(&bits) {
        Ok(())
    } else {
        Err(format!("unsupported RSA modulus {bits} bits (supported: 1024/2048/3072/4096)"))
    }
}
