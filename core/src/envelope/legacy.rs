//! The legacy ("oldgrub") envelope format (§4.6). A sealed secret is the
//! bare concatenation of a marshalled `TPM2B_PUBLIC` followed by a
//! marshalled `TPM2B_PRIVATE`; a signed policy is a lone marshalled
//! `TPMT_SIGNATURE`. Both blobs are self-describing via their own
//! length-prefixed TPM2B/TPMT wire encoding, so no extra framing is added
//! on top — the concatenation is truly bare, matching the format's name.

use tss_esapi::traits::{Marshall, UnMarshall};

use crate::error::EnvelopeError;

/// Concatenates already-marshalled `TPM2B_PUBLIC`/`TPM2B_PRIVATE` bytes.
pub fn encode_sealed(public: &[u8], private: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(public.len() + private.len());
    out.extend_from_slice(public);
    out.extend_from_slice(private);
    out
}

/// Splits a concatenated blob back into its public/private halves.
/// `TPM2B_PUBLIC` is self-describing (a 2-byte size prefix followed by
/// exactly that many bytes), so the boundary can be found without decoding
/// either structure's contents.
pub fn decode_sealed(bytes: &[u8]) -> Result<(Vec<u8>, Vec<u8>), EnvelopeError> {
    if bytes.len() < 2 {
        return Err(EnvelopeError::Malformed("legacy sealed secret too short".to_string()));
    }
    let public_size = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    let public_end = 2 + public_size;
    if bytes.len() < public_end {
        return Err(EnvelopeError::Malformed("truncated TPM2B_PUBLIC in legacy sealed secret".to_string()));
    }
    Ok((bytes[..public_end].to_vec(), bytes[public_end..].to_vec()))
}

pub fn encode_signed_policy(signature: &tss_esapi::structures::Signature) -> Result<Vec<u8>, EnvelopeError> {
    signature.marshall().map_err(|e| EnvelopeError::Tpm(format!("{e}")))
}

pub fn decode_signed_policy(bytes: &[u8]) -> Result<tss_esapi::structures::Signature, EnvelopeError> {
    tss_esapi::structures::Signature::unmarshall(bytes).map_err(|e| EnvelopeError::Tpm(format!("{e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_secret_round_trips_on_byte_boundary() {
        let public = {
            let mut v = vec![0u8, 4];
            v.extend_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd]);
            v
        };
        let private = vec![0xee, 0xff, 0x01];
        let encoded = encode_sealed(&public, &private);
        let (decoded_public, decoded_private) = decode_sealed(&encoded).unwrap();
        assert_eq!(decoded_public, public);
        assert_eq!(decoded_private, private);
    }

    #[test]
    fn truncated_sealed_secret_is_rejected() {
        let err = decode_sealed(&[0u8, 10, 1, 2]).unwrap_err();
        assert!(matches!(err, EnvelopeError::Malformed(_)));
    }
}
