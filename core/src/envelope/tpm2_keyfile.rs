//! The TPM 2.0 Key File envelope format (§4.6, §6(b)), an ASN.1 DER
//! structure per draft-bashkin-kasap-tpm2-keys:
//!
//! ```text
//! TSSPrivKey ::= SEQUENCE {
//!     type        OBJECT IDENTIFIER,
//!     emptyAuth   [0] EXPLICIT BOOLEAN OPTIONAL,
//!     policy      [1] EXPLICIT SEQUENCE OF TSSAuthPolicy OPTIONAL,
//!     secret      [2] EXPLICIT OCTET STRING OPTIONAL,
//!     authPolicy  [3] EXPLICIT SEQUENCE OF TSSAuthPolicy OPTIONAL,
//!     parent      INTEGER,
//!     pubkey      OCTET STRING,
//!     privkey     OCTET STRING
//! }
//! TSSAuthPolicy ::= SEQUENCE {
//!     name    [0] EXPLICIT UTF8String OPTIONAL,
//!     policy  [1] EXPLICIT SEQUENCE OF TPMPolicy
//! }
//! ```
//!
//! `policy` carries a single unauthenticated `PolicyPCR` program; `authPolicy`
//! carries one or more named `PolicyAuthorize` programs. A key file has
//! exactly one of the two, never both (§6(b)).

use yasna::models::ObjectIdentifier;
use yasna::{ASN1Result, BERReader, DERWriter, Tag};

use super::policy_program::{decode_program, encode_program, PolicyProgram, OID_SEALED_DATA, OID_UNAUTH_KEY};
use crate::error::EnvelopeError;

pub const PARENT_OWNER_PERSISTENT: u64 = 0x4000_0001;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedPolicy {
    pub name: Option<String>,
    pub program: PolicyProgram,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyKind {
    /// A single, unnamed `PolicyPCR` program (§6(b) "unauthenticated" form).
    Pcr(PolicyProgram),
    /// One or more named `PolicyAuthorize` programs (§6(b) "sealed-data"
    /// form), tried in order until one satisfies the policy (§4.7).
    AuthPolicy(Vec<NamedPolicy>),
}

pub struct TpmKeyFile {
    pub empty_auth: bool,
    pub parent: u64,
    pub public: Vec<u8>,
    pub private: Vec<u8>,
    pub policy: PolicyKind,
}

impl TpmKeyFile {
    fn oid(&self) -> ObjectIdentifier {
        match &self.policy {
            PolicyKind::Pcr(_) => ObjectIdentifier::from_slice(OID_UNAUTH_KEY),
            PolicyKind::AuthPolicy(_) => ObjectIdentifier::from_slice(OID_SEALED_DATA),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        yasna::construct_der(|writer| {
            writer.write_sequence(|writer| {
                writer.next().write_oid(&self.oid());
                writer.next().write_tagged_implicit(Tag::context(0), |writer| {
                    writer.write_bool(self.empty_auth);
                });
                match &self.policy {
                    PolicyKind::Pcr(program) => {
                        writer.next().write_tagged(Tag::context(1), |writer| {
                            writer.write_sequence_of(|writer| {
                                write_named_policy(
                                    writer.next(),
                                    &NamedPolicy { name: None, program: program.clone() },
                                );
                            });
                        });
                    }
                    PolicyKind::AuthPolicy(policies) => {
                        writer.next().write_tagged(Tag::context(3), |writer| {
                            writer.write_sequence_of(|writer| {
                                for named in policies {
                                    write_named_policy(writer.next(), named);
                                }
                            });
                        });
                    }
                }
                writer.next().write_u64(self.parent);
                writer.next().write_bytes(&self.public);
                writer.next().write_bytes(&self.private);
            });
        })
    }

    pub fn decode(der: &[u8]) -> Result<Self, EnvelopeError> {
        yasna::parse_der(der, |reader| {
            reader.read_sequence(|reader| {
                let oid = reader.next().read_oid()?;
                let empty_auth = reader
                    .next()
                    .read_tagged_implicit(Tag::context(0), |reader| reader.read_bool())?;

                let is_auth_policy = oid == ObjectIdentifier::from_slice(OID_SEALED_DATA);
                let tag = if is_auth_policy { Tag::context(3) } else { Tag::context(1) };
                let named_policies: Vec<NamedPolicy> = reader
                    .next()
                    .read_tagged(tag, |reader| reader.collect_sequence_of(read_named_policy))?;

                let parent = reader.next().read_u64()?;
                let public = reader.next().read_bytes()?;
                let private = reader.next().read_bytes()?;

                Ok((empty_auth, is_auth_policy, named_policies, parent, public, private))
            })
        })
        .map_err(|e| EnvelopeError::Asn1(e.to_string()))
        .and_then(|(empty_auth, is_auth_policy, named_policies, parent, public, private)| {
            let policy = if is_auth_policy {
                PolicyKind::AuthPolicy(named_policies)
            } else {
                let program = named_policies
                    .into_iter()
                    .next()
                    .ok_or_else(|| EnvelopeError::Malformed("key file policy sequence is empty".to_string()))?
                    .program;
                PolicyKind::Pcr(program)
            };
            Ok(TpmKeyFile { empty_auth, parent, public, private, policy })
        })
    }
}

fn write_named_policy(writer: DERWriter, named: &NamedPolicy) {
    writer.write_sequence(|writer| {
        if let Some(name) = &named.name {
            writer.next().write_tagged(Tag::context(0), |writer| {
                writer.write_utf8_string(name);
            });
        }
        writer.next().write_tagged(Tag::context(1), |writer| {
            super::policy_program::write_program(writer, &named.program);
        });
    });
}

fn read_named_policy(reader: BERReader) -> ASN1Result<NamedPolicy> {
    reader.read_sequence(|reader| {
        let name = reader.read_optional(|reader| {
            reader.read_tagged(Tag::context(0), |reader| reader.read_utf8string())
        })?;
        let program_der_pairs: Vec<(u32, Vec<u8>)> = reader
            .next()
            .read_tagged(Tag::context(1), |reader| {
                reader.collect_sequence_of(|reader| {
                    reader.read_sequence(|reader| {
                        let command_code = reader.next().read_u32()?;
                        let command_policy = reader.next().read_bytes()?;
                        Ok((command_code, command_policy))
                    })
                })
            })?;
        Ok((name, program_der_pairs))
    })
    .and_then(|(name, pairs)| {
        // Instructions are re-decoded through the shared opcode table so an
        // unsupported command code fails exactly the same way here as it
        // does for the top-level `policy_program` codec. `decode_program`
        // expects a full DER blob, so the pairs are re-encoded losslessly
        // first rather than duplicating `PolicyInstruction::from_parts`.
        let re_encoded = yasna::construct_der(|writer| {
            writer.write_sequence_of(|writer| {
                for (cc, cp) in &pairs {
                    writer.next().write_sequence(|writer| {
                        writer.next().write_u32(*cc);
                        writer.next().write_bytes(cp);
                    });
                }
            });
        });
        match decode_program(&re_encoded) {
            Ok(program) => Ok(NamedPolicy { name, program }),
            Err(_) => Err(yasna::ASN1Error::new(yasna::ASN1ErrorKind::Invalid)),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::policy_program::PolicyInstruction;

    #[test]
    fn unauthenticated_key_file_round_trips() {
        let keyfile = TpmKeyFile {
            empty_auth: true,
            parent: PARENT_OWNER_PERSISTENT,
            public: vec![0x01, 0x02],
            private: vec![0x03, 0x04],
            policy: PolicyKind::Pcr(vec![PolicyInstruction::PolicyPcr { pcr_selection: vec![0, 7] }]),
        };
        let der = keyfile.encode();
        let decoded = TpmKeyFile::decode(&der).unwrap();
        assert!(decoded.empty_auth);
        assert_eq!(decoded.parent, PARENT_OWNER_PERSISTENT);
        assert_eq!(decoded.public, vec![0x01, 0x02]);
        match decoded.policy {
            PolicyKind::Pcr(program) => {
                assert_eq!(program, vec![PolicyInstruction::PolicyPcr { pcr_selection: vec![0, 7] }])
            }
            PolicyKind::AuthPolicy(_) => panic!("expected Pcr policy"),
        }
    }

    #[test]
    fn auth_policy_key_file_round_trips_named_entries() {
        let keyfile = TpmKeyFile {
            empty_auth: false,
            parent: PARENT_OWNER_PERSISTENT,
            public: vec![0xaa],
            private: vec![0xbb],
            policy: PolicyKind::AuthPolicy(vec![
                NamedPolicy {
                    name: Some("current".to_string()),
                    program: vec![PolicyInstruction::PolicyAuthorize {
                        public: vec![0x10; 4],
                        policy_ref: vec![],
                        signature: vec![0x20; 4],
                    }],
                },
                NamedPolicy {
                    name: Some("rollback".to_string()),
                    program: vec![PolicyInstruction::PolicyAuthorize {
                        public: vec![0x11; 4],
                        policy_ref: vec![],
                        signature: vec![0x21; 4],
                    }],
                },
            ]),
        };
        let der = keyfile.encode();
        let decoded = TpmKeyFile::decode(&der).unwrap();
        match decoded.policy {
            PolicyKind::AuthPolicy(named) => {
                assert_eq!(named.len(), 2);
                assert_eq!(named[0].name.as_deref(), Some("current"));
                assert_eq!(named[1].name.as_deref(), Some("rollback"));
            }
            PolicyKind::Pcr(_) => panic!("expected AuthPolicy policy"),
        }
    }
}
