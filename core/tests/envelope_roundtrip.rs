//! End-to-end envelope round-trips that don't need a TPM: predicting a bank
//! from a synthetic event log, then writing/reading it back through each
//! on-disk format (§4.6, §8 "Envelope round-trip").

use std::io::Cursor;

use byteorder::{LittleEndian, WriteBytesExt};

use pcrpredict_core::envelope::policy_program::{PolicyInstruction, PolicyProgram};
use pcrpredict_core::envelope::{EnvelopePolicy, NamedPolicy, SealedSecret};
use pcrpredict_core::eventlog::event::event_type;
use pcrpredict_core::eventlog::EventLogReader;
use pcrpredict_core::hashalg::SHA1;
use pcrpredict_core::platform::TargetPlatform;
use pcrpredict_core::rehash::RehashContext;

fn write_v1_record(buf: &mut Vec<u8>, pcr: u32, ty: u32, digest: &[u8; 20], data: &[u8]) {
    buf.write_u32::<LittleEndian>(pcr).unwrap();
    buf.write_u32::<LittleEndian>(ty).unwrap();
    buf.extend_from_slice(digest);
    buf.write_u32::<LittleEndian>(data.len() as u32).unwrap();
    buf.extend_from_slice(data);
}

mod fake_provider {
    use pcrpredict_core::rehash::providers::ArtifactProvider;
    use std::io;
    use std::path::Path;

    #[derive(Default)]
    pub struct NoArtifacts;

    impl ArtifactProvider for NoArtifacts {
        fn read_efi_variable(&self, _name: &str) -> io::Result<Vec<u8>> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no variables in this test"))
        }
        fn read_system_file(&self, _path: &Path) -> io::Result<Vec<u8>> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no files in this test"))
        }
        fn read_efi_file(&self, _path: &Path) -> io::Result<Vec<u8>> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no files in this test"))
        }
    }
}

fn predicted_sealed_secret(policy: EnvelopePolicy) -> SealedSecret {
    let mut buf = Vec::new();
    write_v1_record(&mut buf, 0, event_type::NO_ACTION, &[0u8; 20], b"unrelated header!!!!");
    write_v1_record(&mut buf, 0, 0x0000_0008, &[0u8; 20], b"1.0\0");

    let mut reader = EventLogReader::from_reader(Cursor::new(buf)).unwrap();
    let ctx = RehashContext::new(SHA1);
    let provider = fake_provider::NoArtifacts::default();
    let bank = pcrpredict_core::predict(&mut reader, SHA1, 1 << 0, &ctx, &provider, 0).unwrap();
    assert!(bank.is_valid(0));

    // Stand-ins for what a real TPM2_Create would return; the envelope
    // codecs only care about these being opaque length-prefixed byte blobs.
    let public = {
        let mut v = vec![0u8, 4];
        v.extend_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd]);
        v
    };
    let private = vec![0x10, 0x20, 0x30];

    SealedSecret { public, private, policy }
}

#[test]
fn legacy_envelope_round_trips_a_predicted_sealed_secret() {
    let secret = predicted_sealed_secret(EnvelopePolicy::Legacy);
    let encoded = TargetPlatform::LegacyGrub.write_sealed_secret(&secret).unwrap();
    let decoded = TargetPlatform::LegacyGrub.read_sealed_secret(&encoded).unwrap();
    assert_eq!(decoded.public, secret.public);
    assert_eq!(decoded.private, secret.private);
    assert!(matches!(decoded.policy, EnvelopePolicy::Legacy));
}

#[test]
fn tpm2_keyfile_envelope_round_trips_a_pcr_policy_program() {
    let program: PolicyProgram = vec![PolicyInstruction::PolicyPcr { pcr_selection: vec![0, 7] }];
    let secret = predicted_sealed_secret(EnvelopePolicy::Pcr(program.clone()));

    let encoded = TargetPlatform::Tpm2KeyFile.write_sealed_secret(&secret).unwrap();
    assert_eq!(encoded[0], 0x30, "TSSPRIVKEY is a DER SEQUENCE");

    let decoded = TargetPlatform::Tpm2KeyFile.read_sealed_secret(&encoded).unwrap();
    assert_eq!(decoded.public, secret.public);
    assert_eq!(decoded.private, secret.private);
    match decoded.policy {
        EnvelopePolicy::Pcr(decoded_program) => assert_eq!(decoded_program, program),
        other => panic!("expected Pcr policy, got {other:?}"),
    }
}

#[test]
fn tpm2_keyfile_envelope_round_trips_named_auth_policy_entries() {
    let current = NamedPolicy {
        name: Some("current".to_string()),
        program: vec![PolicyInstruction::PolicyAuthorize {
            public: vec![0xde, 0xad],
            policy_ref: vec![],
            signature: vec![0xbe, 0xef],
        }],
    };
    let rollback = NamedPolicy {
        name: Some("rollback".to_string()),
        program: vec![PolicyInstruction::PolicyAuthorize {
            public: vec![0xfe, 0xed],
            policy_ref: vec![0x01],
            signature: vec![0xf0, 0x0d],
        }],
    };
    let secret = predicted_sealed_secret(EnvelopePolicy::AuthPolicy(vec![current, rollback]));

    let encoded = TargetPlatform::Tpm2KeyFile.write_sealed_secret(&secret).unwrap();
    let decoded = TargetPlatform::Tpm2KeyFile.read_sealed_secret(&encoded).unwrap();
    match decoded.policy {
        EnvelopePolicy::AuthPolicy(named) => {
            assert_eq!(named.len(), 2);
            assert_eq!(named[0].name.as_deref(), Some("current"));
            assert_eq!(named[1].name.as_deref(), Some("rollback"));
        }
        other => panic!("expected AuthPolicy, got {other:?}"),
    }
}

#[test]
fn systemd_json_platform_never_produces_a_sealed_secret_file() {
    let secret = predicted_sealed_secret(EnvelopePolicy::Legacy);
    let err = TargetPlatform::SystemdJson.write_sealed_secret(&secret).unwrap_err();
    assert!(matches!(err, pcrpredict_core::error::EnvelopeError::Unsupported));
}
