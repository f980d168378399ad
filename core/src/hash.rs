//! Generic hash dispatch over the algorithm table, used by PCR extend and by
//! rehashers that need to hash artifact bytes under the target algorithm.

use sha1::Sha1;
use sha2::{Digest as Sha2Digest, Sha256, Sha384, Sha512};
use sm3::Sm3;

use crate::hashalg::{HashAlg, TPM_ALG_SHA1, TPM_ALG_SHA256, TPM_ALG_SHA384, TPM_ALG_SHA512, TPM_ALG_SM3_256};

/// Hashes the concatenation of `parts` under `alg`.
pub fn hash_concat(alg: HashAlg, parts: &[&[u8]]) -> Vec<u8> {
    match alg.id {
        TPM_ALG_SHA1 => {
            let mut h = Sha1::new();
            for p in parts {
                h.update(p);
            }
            h.finalize().to_vec()
        }
        TPM_ALG_SHA256 => {
            let mut h = Sha256::new();
            for p in parts {
                h.update(p);
            }
            h.finalize().to_vec()
        }
        TPM_ALG_SHA384 => {
            let mut h = Sha384::new();
            for p in parts {
                h.update(p);
            }
            h.finalize().to_vec()
        }
        TPM_ALG_SHA512 => {
            let mut h = Sha512::new();
            for p in parts {
                h.update(p);
            }
            h.finalize().to_vec()
        }
        TPM_ALG_SM3_256 => {
            let mut h = Sm3::new();
            for p in parts {
                h.update(p);
            }
            h.finalize().to_vec()
        }
        other => panic!("hash_concat called with unsupported algorithm id {other:#06x}"),
    }
}

pub fn hash_one(alg: HashAlg, data: &[u8]) -> Vec<u8> {
    hash_concat(alg, &[data])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashalg::SHA1;

    #[test]
    fn sha1_of_empty_matches_known_vector() {
        let digest = hash_one(SHA1, b"");
        assert_eq!(hex::encode(digest), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }
}
