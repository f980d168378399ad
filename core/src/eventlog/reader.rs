//! The binary TCG event log reader (§4.1).
//!
//! Record layout on the wire (all integers little-endian):
//!
//! ```text
//! u32 pcr_index | u32 event_type | digests | u32 event_size | event_size bytes
//! ```
//!
//! Digest section layout depends on log version: TPMv1 is a single 20-byte
//! SHA-1 digest; TPMv2 is `u32 count` followed by `count` pairs of
//! `u16 algo_id` then `algo.digest_size` bytes. The very first record is
//! always read in the TPMv1-compatible shape (a fixed 20-byte digest),
//! because whether the log is TPMv1 or TPMv2 is itself determined by
//! inspecting that first record's body.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::digest::Digest;
use crate::error::EventLogError;
use crate::eventlog::event::{event_type, Event};
use crate::hashalg::{self, HashAlgTable, SHA1};

/// 1 MiB hard sanity cap on a single event's body size (§4.1 errors).
const MAX_EVENT_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpmVersion {
    V1,
    V2,
}

pub struct EventLogReader<R> {
    source: R,
    offset: u64,
    next_index: usize,
    version: TpmVersion,
    alg_table: HashAlgTable,
    locality: Option<u8>,
}

impl EventLogReader<BufReader<File>> {
    /// Opens the event log at `path` (the kernel's
    /// `/sys/kernel/security/tpm0/binary_bios_measurements` by default,
    /// see [`crate::config::Config`]).
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EventLogError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }
}

impl<R: Read> EventLogReader<R> {
    pub fn from_reader(source: R) -> Result<Self, EventLogError> {
        Ok(Self {
            source,
            offset: 0,
            next_index: 0,
            version: TpmVersion::V1,
            alg_table: HashAlgTable::new(),
            locality: None,
        })
    }

    pub fn event_count(&self) -> usize {
        self.next_index
    }

    pub fn tpm_version(&self) -> TpmVersion {
        self.version
    }

    /// PCR0's startup locality, if a StartupLocality record has been seen so
    /// far. Other PCRs never carry a locality in this implementation.
    pub fn get_locality(&self, pcr: u32) -> Option<u8> {
        if pcr == 0 {
            self.locality
        } else {
            None
        }
    }

    /// Reads the next event, or `Ok(None)` on a clean EOF between records.
    pub fn read_next(&mut self) -> Result<Option<Event>, EventLogError> {
        let pcr_index = match self.try_read_u32()? {
            Some(v) => v,
            None => return Ok(None),
        };
        let event_type = self.read_u32()?;

        let is_first = self.next_index == 0;

        let (digests, raw_digest_bytes) = if is_first {
            self.read_v1_digest()?
        } else {
            match self.version {
                TpmVersion::V1 => self.read_v1_digest()?,
                TpmVersion::V2 => self.read_v2_digests()?,
            }
        };

        let size = self.read_u32()? as u64;
        if size > MAX_EVENT_SIZE {
            return Err(EventLogError::EventTooLarge { size, cap: MAX_EVENT_SIZE });
        }
        let mut data = vec![0u8; size as usize];
        self.read_exact_tracked(&mut data)?;

        let file_offset = self.offset - (8 + raw_digest_bytes + 4 + size);
        let index = self.next_index;
        self.next_index += 1;

        if event_type == event_type::NO_ACTION {
            self.inspect_no_action_body(is_first, &data)?;
        }

        Ok(Some(Event {
            index,
            pcr_index,
            event_type,
            file_offset,
            raw: data,
            digests,
            parsed: None,
        }))
    }

    fn inspect_no_action_body(&mut self, is_first: bool, data: &[u8]) -> Result<(), EventLogError> {
        if data.len() < 16 {
            return Ok(());
        }
        let signature = signature_str(&data[..16]);

        if is_first && signature == "Spec ID Event03" {
            self.parse_spec_id_event03(data)?;
            return Ok(());
        }

        if signature == "StartupLocality" && data.len() == 17 {
            self.locality = Some(data[16]);
        }

        Ok(())
    }

    /// Parses the TCG "Spec ID Event03" body that declares this is a TPMv2
    /// log and its supported algorithms (§4.1).
    fn parse_spec_id_event03(&mut self, data: &[u8]) -> Result<(), EventLogError> {
        let mut cursor = std::io::Cursor::new(&data[16..]);
        let _platform_class = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| EventLogError::MalformedSpecId("truncated platformClass"))?;
        let _spec_version_minor = cursor
            .read_u8()
            .map_err(|_| EventLogError::MalformedSpecId("truncated specVersionMinor"))?;
        let _spec_version_major = cursor
            .read_u8()
            .map_err(|_| EventLogError::MalformedSpecId("truncated specVersionMajor"))?;
        let _spec_errata = cursor
            .read_u8()
            .map_err(|_| EventLogError::MalformedSpecId("truncated specErrata"))?;
        let _uintn_size = cursor
            .read_u8()
            .map_err(|_| EventLogError::MalformedSpecId("truncated uintnSize"))?;
        let number_of_algorithms = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| EventLogError::MalformedSpecId("truncated numberOfAlgorithms"))?;

        for _ in 0..number_of_algorithms {
            let algo_id = cursor
                .read_u16::<LittleEndian>()
                .map_err(|_| EventLogError::MalformedSpecId("truncated algorithmId"))?;
            let digest_size = cursor
                .read_u16::<LittleEndian>()
                .map_err(|_| EventLogError::MalformedSpecId("truncated digestSize"))?;
            self.alg_table.learn(algo_id, digest_size as usize);
        }

        self.version = TpmVersion::V2;
        Ok(())
    }

    fn read_v1_digest(&mut self) -> Result<(Vec<Digest>, u64), EventLogError> {
        let mut bytes = vec![0u8; SHA1.digest_size];
        self.read_exact_tracked(&mut bytes)?;
        Ok((vec![Digest::new(SHA1, bytes)], SHA1.digest_size as u64))
    }

    fn read_v2_digests(&mut self) -> Result<(Vec<Digest>, u64), EventLogError> {
        let count = self.read_u32()?;
        let mut digests = Vec::with_capacity(count as usize);
        let mut consumed = 4u64;
        for _ in 0..count {
            let algo_id = self.read_u16()?;
            consumed += 2;
            let alg = self
                .alg_table
                .resolve(algo_id)
                .or_else(|| hashalg::by_id(algo_id))
                .ok_or(EventLogError::UnknownAlgorithm(algo_id))?;
            let mut bytes = vec![0u8; alg.digest_size];
            self.read_exact_tracked(&mut bytes)?;
            consumed += alg.digest_size as u64;
            digests.push(Digest::new(alg, bytes));
        }
        Ok((digests, consumed))
    }

    fn try_read_u32(&mut self) -> Result<Option<u32>, EventLogError> {
        let mut buf = [0u8; 4];
        let mut read_total = 0;
        loop {
            match self.source.read(&mut buf[read_total..]) {
                Ok(0) => {
                    if read_total == 0 {
                        return Ok(None);
                    }
                    return Err(EventLogError::UnexpectedEof);
                }
                Ok(n) => {
                    read_total += n;
                    if read_total == 4 {
                        self.offset += 4;
                        return Ok(Some(u32::from_le_bytes(buf)));
                    }
                }
                Err(e) => return Err(EventLogError::Io(e)),
            }
        }
    }

    fn read_u32(&mut self) -> Result<u32, EventLogError> {
        let v = self
            .source
            .read_u32::<LittleEndian>()
            .map_err(|e| map_eof(e))?;
        self.offset += 4;
        Ok(v)
    }

    fn read_u16(&mut self) -> Result<u16, EventLogError> {
        let v = self
            .source
            .read_u16::<LittleEndian>()
            .map_err(|e| map_eof(e))?;
        self.offset += 2;
        Ok(v)
    }

    fn read_exact_tracked(&mut self, buf: &mut [u8]) -> Result<(), EventLogError> {
        self.source
            .read_exact(buf)
            .map_err(|e| map_eof(e))?;
        self.offset += buf.len() as u64;
        Ok(())
    }
}

fn map_eof(e: std::io::Error) -> EventLogError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        EventLogError::UnexpectedEof
    } else {
        EventLogError::Io(e)
    }
}

fn signature_str(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches('\0')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Cursor;

    fn write_v1_record(buf: &mut Vec<u8>, pcr: u32, ty: u32, digest: &[u8; 20], data: &[u8]) {
        buf.write_u32::<LittleEndian>(pcr).unwrap();
        buf.write_u32::<LittleEndian>(ty).unwrap();
        buf.extend_from_slice(digest);
        buf.write_u32::<LittleEndian>(data.len() as u32).unwrap();
        buf.extend_from_slice(data);
    }

    #[test]
    fn tpm1_log_single_sha1_event() {
        // Scenario 1 from §8: no Spec ID Event03, so the log is TPMv1.
        let mut buf = Vec::new();
        write_v1_record(&mut buf, 0, event_type::NO_ACTION, &[0u8; 20], b"unrelated header\0\0");
        write_v1_record(&mut buf, 0, 0x0000_0008 /* EV_S_CRTM_VERSION */, &[0u8; 20], b"1.0\0");

        let mut reader = EventLogReader::from_reader(Cursor::new(buf)).unwrap();
        let first = reader.read_next().unwrap().unwrap();
        assert_eq!(reader.tpm_version(), TpmVersion::V1);
        assert_eq!(first.event_type, event_type::NO_ACTION);

        let second = reader.read_next().unwrap().unwrap();
        assert_eq!(second.digests.len(), 1);
        assert_eq!(second.digests[0].alg, SHA1);
        assert_eq!(second.raw, b"1.0\0");

        assert!(reader.read_next().unwrap().is_none());
        assert_eq!(reader.event_count(), 2);
    }

    #[test]
    fn tpm2_log_declares_algorithms_and_reads_sha256_events() {
        let mut spec_body = Vec::new();
        spec_body.extend_from_slice(b"Spec ID Event03\0");
        spec_body.write_u32::<LittleEndian>(0).unwrap(); // platformClass
        spec_body.write_u8(0).unwrap(); // minor
        spec_body.write_u8(2).unwrap(); // major
        spec_body.write_u8(0).unwrap(); // errata
        spec_body.write_u8(8).unwrap(); // uintnSize (ignored)
        spec_body.write_u32::<LittleEndian>(1).unwrap(); // one algorithm
        spec_body.write_u16::<LittleEndian>(hashalg::TPM_ALG_SHA256).unwrap();
        spec_body.write_u16::<LittleEndian>(32).unwrap();
        spec_body.write_u8(0).unwrap(); // vendorInfoSize

        let mut buf = Vec::new();
        write_v1_record(&mut buf, 0, event_type::NO_ACTION, &[0u8; 20], &spec_body);

        // Second event in TPMv2 shape: count=1, (algo_id, digest)
        buf.write_u32::<LittleEndian>(0).unwrap();
        buf.write_u32::<LittleEndian>(event_type::SEPARATOR).unwrap();
        buf.write_u32::<LittleEndian>(1).unwrap();
        buf.write_u16::<LittleEndian>(hashalg::TPM_ALG_SHA256).unwrap();
        buf.extend_from_slice(&[0xaa; 32]);
        buf.write_u32::<LittleEndian>(4).unwrap();
        buf.extend_from_slice(b"\0\0\0\0");

        let mut reader = EventLogReader::from_reader(Cursor::new(buf)).unwrap();
        let _spec_event = reader.read_next().unwrap().unwrap();
        assert_eq!(reader.tpm_version(), TpmVersion::V2);

        let second = reader.read_next().unwrap().unwrap();
        assert_eq!(second.digests[0].alg.digest_size, 32);
        assert_eq!(second.digests[0].as_bytes(), &[0xaa; 32][..]);
    }

    #[test]
    fn unknown_algorithm_is_fatal() {
        let mut spec_body = Vec::new();
        spec_body.extend_from_slice(b"Spec ID Event03\0");
        spec_body.write_u32::<LittleEndian>(0).unwrap();
        spec_body.write_u8(0).unwrap();
        spec_body.write_u8(2).unwrap();
        spec_body.write_u8(0).unwrap();
        spec_body.write_u8(8).unwrap();
        spec_body.write_u32::<LittleEndian>(0).unwrap(); // no algorithms declared
        spec_body.write_u8(0).unwrap();

        let mut buf = Vec::new();
        write_v1_record(&mut buf, 0, event_type::NO_ACTION, &[0u8; 20], &spec_body);

        buf.write_u32::<LittleEndian>(0).unwrap();
        buf.write_u32::<LittleEndian>(event_type::SEPARATOR).unwrap();
        buf.write_u32::<LittleEndian>(1).unwrap();
        buf.write_u16::<LittleEndian>(0xbeef).unwrap();
        // no digest bytes follow since size is unknown -- reader must fail here
        buf.write_u32::<LittleEndian>(0).unwrap();

        let mut reader = EventLogReader::from_reader(Cursor::new(buf)).unwrap();
        let _spec_event = reader.read_next().unwrap().unwrap();
        let err = reader.read_next().unwrap_err();
        assert!(matches!(err, EventLogError::UnknownAlgorithm(0xbeef)));
    }

    #[test]
    fn event_too_large_is_fatal() {
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>(0).unwrap();
        buf.write_u32::<LittleEndian>(event_type::NO_ACTION).unwrap();
        buf.extend_from_slice(&[0u8; 20]);
        buf.write_u32::<LittleEndian>(u32::MAX).unwrap();

        let mut reader = EventLogReader::from_reader(Cursor::new(buf)).unwrap();
        let err = reader.read_next().unwrap_err();
        assert!(matches!(err, EventLogError::EventTooLarge { .. }));
    }

    #[test]
    fn zero_size_event_is_accepted() {
        let mut buf = Vec::new();
        write_v1_record(&mut buf, 3, event_type::SEPARATOR, &[0x01; 20], &[]);
        let mut reader = EventLogReader::from_reader(Cursor::new(buf)).unwrap();
        let ev = reader.read_next().unwrap().unwrap();
        assert!(ev.raw.is_empty());
        assert_eq!(ev.digests[0].as_bytes(), &[0x01; 20][..]);
    }

    #[test]
    fn startup_locality_is_exposed_for_pcr0() {
        let mut body = Vec::new();
        body.extend_from_slice(b"StartupLocality\0");
        body.push(3u8);
        assert_eq!(body.len(), 17);

        let mut buf = Vec::new();
        write_v1_record(&mut buf, 0, event_type::NO_ACTION, &[0u8; 20], b"unused spec header!!!!!!!");
        write_v1_record(&mut buf, 0, event_type::NO_ACTION, &[0u8; 20], &body);

        let mut reader = EventLogReader::from_reader(Cursor::new(buf)).unwrap();
        reader.read_next().unwrap();
        reader.read_next().unwrap();
        assert_eq!(reader.get_locality(0), Some(3));
        assert_eq!(reader.get_locality(1), None);
    }
}
