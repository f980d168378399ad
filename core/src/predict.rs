//! Ties the event log reader, parser registry, re-hash engine and PCR bank
//! simulator into the one end-to-end operation the rest of the crate wants:
//! "replay this log, predicting a future boot, into a PCR bank" (§2 data
//! flow, §4.4 "Replay").

use std::io::Read;

use crate::error::CoreError;
use crate::eventlog::EventLogReader;
use crate::hashalg::HashAlg;
use crate::parser;
use crate::pcrbank::PcrBank;
use crate::rehash::providers::ArtifactProvider;
use crate::rehash::{rehash_event, RehashContext};

/// Replays `log` into a bank for `alg` covering `requested_mask`. For every
/// PCR set in `rehash_required_mask`, a rehasher that can't produce a digest
/// fails the whole prediction rather than silently copying the firmware
/// digest (§4.3).
pub fn predict<R: Read>(
    log: &mut EventLogReader<R>,
    alg: HashAlg,
    requested_mask: u32,
    ctx: &RehashContext,
    provider: &dyn ArtifactProvider,
    rehash_required_mask: u32,
) -> Result<PcrBank, CoreError> {
    let mut bank = PcrBank::new(alg, requested_mask);

    while let Some(mut event) = log.read_next()? {
        if let Some(locality) = log.get_locality(0) {
            bank.set_locality(locality);
        }

        if !bank.is_requested(event.pcr_index) {
            continue;
        }

        event.parsed = parser::parse_event(event.event_type, event.pcr_index, &event.raw)?;

        let require_rehash = rehash_required_mask & (1 << event.pcr_index) != 0;
        let outcome = rehash_event(&event, ctx, provider, require_rehash)?;
        bank.extend(event.pcr_index, outcome.digest());
    }

    Ok(bank)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashalg::SHA1;
    use crate::rehash::providers::tests::FakeProvider;
    use byteorder::{LittleEndian, WriteBytesExt};
    use std::io::Cursor;

    fn write_v1_record(buf: &mut Vec<u8>, pcr: u32, ty: u32, digest: &[u8; 20], data: &[u8]) {
        buf.write_u32::<LittleEndian>(pcr).unwrap();
        buf.write_u32::<LittleEndian>(ty).unwrap();
        buf.extend_from_slice(digest);
        buf.write_u32::<LittleEndian>(data.len() as u32).unwrap();
        buf.extend_from_slice(data);
    }

    #[test]
    fn replay_determinism_matches_scenario_one() {
        use crate::eventlog::event::event_type;

        let mut buf = Vec::new();
        write_v1_record(&mut buf, 0, event_type::NO_ACTION, &[0u8; 20], b"unrelated header!!!!");
        write_v1_record(&mut buf, 0, 0x0000_0008, &[0u8; 20], b"1.0\0");

        let mut reader = EventLogReader::from_reader(Cursor::new(buf)).unwrap();
        let ctx = RehashContext::new(SHA1);
        let provider = FakeProvider::default();
        let bank = predict(&mut reader, SHA1, 1 << 0, &ctx, &provider, 0).unwrap();

        assert!(bank.is_valid(0));

        let mut expected = PcrBank::new(SHA1, 1 << 0);
        expected.extend(0, &crate::digest::Digest::new(SHA1, vec![0u8; 20]));
        assert_eq!(bank.value(0), expected.value(0));
    }

    #[test]
    fn events_outside_requested_mask_are_skipped() {
        use crate::eventlog::event::event_type;

        let mut buf = Vec::new();
        write_v1_record(&mut buf, 5, event_type::SEPARATOR, &[0x11; 20], &[]);

        let mut reader = EventLogReader::from_reader(Cursor::new(buf)).unwrap();
        let ctx = RehashContext::new(SHA1);
        let provider = FakeProvider::default();
        let bank = predict(&mut reader, SHA1, 1 << 0, &ctx, &provider, 0).unwrap();
        assert_eq!(bank.valid_mask(), 0);
    }
}
