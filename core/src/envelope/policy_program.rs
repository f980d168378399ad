//! The shared policy program representation (§3 "Policy program", §4.6).
//!
//! Stored inside TPM 2.0 Key File envelopes as ASN.1
//! `SEQUENCE OF { CommandCode INTEGER, CommandPolicy OCTET STRING }`.
//! Only `PolicyPCR` and `PolicyAuthorize` are ever produced or accepted;
//! any other command code is a hard failure, never a skip (§9).

use tss_esapi::interface_types::algorithm::HashingAlgorithm;
use tss_esapi::structures::Digest as TssDigest;
use tss_esapi::traits::Marshall;
use yasna::models::ObjectIdentifier;
use yasna::DERWriter;

use crate::error::EnvelopeError;
use crate::tpm::build_selection;

pub const TPM2_CC_POLICY_PCR: u32 = 0x0000_017f;
pub const TPM2_CC_POLICY_AUTHORIZE: u32 = 0x0000_016a;

/// OIDs for the TPM 2.0 Key File draft (§6 "Files").
pub const OID_UNAUTH_KEY: &[u64] = &[2, 23, 133, 10, 1, 3];
pub const OID_SEALED_DATA: &[u64] = &[2, 23, 133, 10, 1, 5];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyInstruction {
    /// Stored with an empty digest — at unseal time the TPM computes the
    /// comparison digest itself from the live PCR values (§4.7 step 4).
    PolicyPcr { pcr_selection: Vec<u32> },
    PolicyAuthorize { public: Vec<u8>, policy_ref: Vec<u8>, signature: Vec<u8> },
}

pub type PolicyProgram = Vec<PolicyInstruction>;

impl PolicyInstruction {
    fn command_code(&self) -> u32 {
        match self {
            PolicyInstruction::PolicyPcr { .. } => TPM2_CC_POLICY_PCR,
            PolicyInstruction::PolicyAuthorize { .. } => TPM2_CC_POLICY_AUTHORIZE,
        }
    }

    /// `CommandPolicy` bytes for this instruction (§4.6):
    /// `Marshal(TPM2B_DIGEST empty) || Marshal(TPML_PCR_SELECTION)`.
    fn command_policy(&self) -> Vec<u8> {
        match self {
            PolicyInstruction::PolicyPcr { pcr_selection } => {
                // pcr_selection is validated to 0..=23 before a PolicyPcr
                // instruction is ever constructed (pcrspec::parse_pcr_spec),
                // so building the selection here cannot fail.
                let empty_digest = TssDigest::try_from(Vec::new())
                    .expect("empty digest is always a valid TPM2B_DIGEST")
                    .marshall()
                    .expect("marshalling an empty TPM2B_DIGEST cannot fail");
                let pcrs_u8: Vec<u8> = pcr_selection.iter().map(|&p| p as u8).collect();
                let selection_bytes = build_selection(HashingAlgorithm::Sha256, &pcrs_u8)
                    .expect("pcr_selection holds only in-range pcr indices")
                    .marshall()
                    .expect("marshalling a TPML_PCR_SELECTION cannot fail");

                let mut out = empty_digest;
                out.extend_from_slice(&selection_bytes);
                out
            }
            PolicyInstruction::PolicyAuthorize { public, policy_ref, signature } => {
                let mut out = Vec::new();
                out.extend_from_slice(public);
                out.extend_from_slice(&(policy_ref.len() as u16).to_be_bytes());
                out.extend_from_slice(policy_ref);
                out.extend_from_slice(signature);
                out
            }
        }
    }

    fn from_parts(command_code: u32, command_policy: &[u8]) -> Result<Self, EnvelopeError> {
        match command_code {
            TPM2_CC_POLICY_PCR => {
                // `Marshal(TPM2B_DIGEST empty) || Marshal(TPML_PCR_SELECTION)`:
                // a u16 digest length (0 here), then a u32 selection count and,
                // per selection, `u16 hash_alg, u8 sizeofSelect, sizeofSelect`
                // bytes of PCR-select bitmap (bit n of byte n/8 is pcr n).
                if command_policy.len() < 2 {
                    return Err(EnvelopeError::Malformed("truncated PolicyPCR command policy".to_string()));
                }
                let digest_len = u16::from_be_bytes(command_policy[0..2].try_into().unwrap()) as usize;
                let mut offset = 2 + digest_len;
                if command_policy.len() < offset + 4 {
                    return Err(EnvelopeError::Malformed("truncated PolicyPCR selection count".to_string()));
                }
                let selection_count = u32::from_be_bytes(command_policy[offset..offset + 4].try_into().unwrap()) as usize;
                offset += 4;

                let mut pcr_selection = Vec::new();
                for _ in 0..selection_count {
                    if offset + 3 > command_policy.len() {
                        return Err(EnvelopeError::Malformed("truncated PolicyPCR selection entry".to_string()));
                    }
                    offset += 2; // hash alg id, not needed to recover pcr indices
                    let size_of_select = command_policy[offset] as usize;
                    offset += 1;
                    if offset + size_of_select > command_policy.len() {
                        return Err(EnvelopeError::Malformed("truncated PolicyPCR select bitmap".to_string()));
                    }
                    for (byte_idx, byte) in command_policy[offset..offset + size_of_select].iter().enumerate() {
                        for bit in 0..8 {
                            if byte & (1 << bit) != 0 {
                                pcr_selection.push((byte_idx * 8 + bit) as u32);
                            }
                        }
                    }
                    offset += size_of_select;
                }
                Ok(PolicyInstruction::PolicyPcr { pcr_selection })
            }
            TPM2_CC_POLICY_AUTHORIZE => {
                // public is a TPM2B_PUBLIC-shaped blob of unknown internal
                // length to us; we store the whole remainder split at the
                // trailing, fixed-shape policy_ref + signature markers is not
                // possible without parsing TPM2B_PUBLIC itself, so this
                // codec keeps the three fields concatenated and relies on
                // the writer/reader agreeing on lengths out of band via a
                // length-prefixed encoding instead of the bare concatenation
                // the draft specifies for the wire, keeping decode exact.
                if command_policy.len() < 2 {
                    return Err(EnvelopeError::Malformed("truncated PolicyAuthorize command policy".to_string()));
                }
                let public_len = u16::from_be_bytes(command_policy[0..2].try_into().unwrap()) as usize;
                let public_end = 2 + public_len;
                if command_policy.len() < public_end + 2 {
                    return Err(EnvelopeError::Malformed("truncated PolicyAuthorize public".to_string()));
                }
                let public = command_policy[0..public_end].to_vec();
                let ref_len = u16::from_be_bytes(command_policy[public_end..public_end + 2].try_into().unwrap()) as usize;
                let ref_end = public_end + 2 + ref_len;
                if command_policy.len() < ref_end {
                    return Err(EnvelopeError::Malformed("truncated PolicyAuthorize policy_ref".to_string()));
                }
                let policy_ref = command_policy[public_end + 2..ref_end].to_vec();
                let signature = command_policy[ref_end..].to_vec();
                Ok(PolicyInstruction::PolicyAuthorize { public, policy_ref, signature })
            }
            other => Err(EnvelopeError::UnsupportedOpcode(other)),
        }
    }
}

pub fn write_program(writer: DERWriter, program: &PolicyProgram) {
    writer.write_sequence_of(|writer| {
        for instruction in program {
            writer.next().write_sequence(|writer| {
                writer.next().write_u32(instruction.command_code());
                writer.next().write_bytes(&instruction.command_policy());
            });
        }
    });
}

/// Decodes a DER `SEQUENCE OF { CommandCode, CommandPolicy }` into typed
/// instructions, failing hard on any opcode other than `PolicyPCR` /
/// `PolicyAuthorize` (§9 "Policy program opcodes").
pub fn decode_program(der: &[u8]) -> Result<PolicyProgram, EnvelopeError> {
    let pairs: Vec<(u32, Vec<u8>)> = yasna::parse_der(der, |reader| {
        reader.read_sequence_of(|reader| {
            reader.read_sequence(|reader| {
                let command_code = reader.next().read_u32()?;
                let command_policy = reader.next().read_bytes()?;
                Ok((command_code, command_policy))
            })
        })
    })
    .map_err(|e| EnvelopeError::Asn1(e.to_string()))?;

    pairs
        .into_iter()
        .map(|(cc, cp)| PolicyInstruction::from_parts(cc, &cp))
        .collect()
}

pub fn encode_program(program: &PolicyProgram) -> Vec<u8> {
    yasna::construct_der(|writer| write_program(writer, program))
}

/// Present so OID constants are referenced somewhere in this module; the
/// actual object identifiers are consumed by [`super::tpm2_keyfile`].
pub fn unauth_key_oid() -> ObjectIdentifier {
    ObjectIdentifier::from_slice(OID_UNAUTH_KEY)
}

pub fn sealed_data_oid() -> ObjectIdentifier {
    ObjectIdentifier::from_slice(OID_SEALED_DATA)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_pcr_round_trips() {
        let program = vec![PolicyInstruction::PolicyPcr { pcr_selection: vec![7] }];
        let der = encode_program(&program);
        let decoded = decode_program(&der).unwrap();
        assert_eq!(decoded, program);
    }

    #[test]
    fn policy_authorize_round_trips() {
        let program = vec![PolicyInstruction::PolicyAuthorize {
            public: vec![0xaa; 10],
            policy_ref: vec![],
            signature: vec![0xbb; 20],
        }];
        let der = encode_program(&program);
        let decoded = decode_program(&der).unwrap();
        assert_eq!(decoded, program);
    }

    #[test]
    fn unsupported_opcode_is_rejected() {
        let der = yasna::construct_der(|writer| {
            writer.write_sequence_of(|writer| {
                writer.next().write_sequence(|writer| {
                    writer.next().write_u32(0x1234);
                    writer.next().write_bytes(&[]);
                });
            });
        });
        let err = decode_program(&der).unwrap_err();
        assert!(matches!(err, EnvelopeError::UnsupportedOpcode(0x1234)));
    }
}
