//! Decides, for one event, whether to reuse the firmware's recorded digest
//! or substitute a recomputed one (§4.3).

use crate::digest::Digest;
use crate::error::RehashError;
use crate::eventlog::event::Event;
use crate::hashalg::HashAlg;
use crate::rehash::providers::ArtifactProvider;
use crate::rehash::RehashContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RehashOutcome {
    /// The firmware-recorded digest, reused verbatim.
    Copy(Digest),
    /// A digest recomputed from the predicted next-boot artifacts.
    Rehashed(Digest),
}

impl RehashOutcome {
    pub fn digest(&self) -> &Digest {
        match self {
            RehashOutcome::Copy(d) | RehashOutcome::Rehashed(d) => d,
        }
    }
}

/// Picks a digest for `event` under `ctx.alg()`. When `require_rehash` is
/// set, a rehasher that can't produce a valid digest fails the whole
/// prediction instead of silently falling back to copy (§4.3).
pub fn rehash_event(
    event: &Event,
    ctx: &RehashContext,
    provider: &dyn ArtifactProvider,
    require_rehash: bool,
) -> Result<RehashOutcome, RehashError> {
    let alg = ctx.alg();
    let firmware_digest = event.digest_for(alg.id).cloned();

    let rehashed = event.parsed.as_ref().and_then(|p| p.rehash(ctx, provider));

    if let Some(bytes) = rehashed {
        let digest = Digest::new(alg, bytes);
        if digest.is_valid() {
            return Ok(RehashOutcome::Rehashed(digest));
        }
        if require_rehash {
            return Err(RehashError::Required {
                pcr: event.pcr_index,
                reason: "rehasher produced an invalid digest".to_string(),
            });
        }
        return fallback_to_copy(event.pcr_index, alg, firmware_digest);
    }

    if require_rehash {
        return Err(RehashError::Required {
            pcr: event.pcr_index,
            reason: "no applicable rehash rule for this event".to_string(),
        });
    }
    fallback_to_copy(event.pcr_index, alg, firmware_digest)
}

fn fallback_to_copy(pcr: u32, alg: HashAlg, firmware_digest: Option<Digest>) -> Result<RehashOutcome, RehashError> {
    firmware_digest.map(RehashOutcome::Copy).ok_or_else(|| RehashError::Required {
        pcr,
        reason: format!("no firmware digest recorded for algorithm {alg}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Digest;
    use crate::eventlog::event::event_type;
    use crate::hashalg::SHA256;
    use crate::parser::{ParsedEvent, SystemdEvent};
    use crate::rehash::context::BootEntry;

    fn systemd_event(raw: &[u8], firmware_digest: Digest) -> Event {
        Event {
            index: 0,
            pcr_index: 12,
            event_type: event_type::IPL,
            file_offset: 0,
            raw: raw.to_vec(),
            digests: vec![firmware_digest],
            parsed: Some(ParsedEvent::Systemd(SystemdEvent { raw: raw.to_vec() })),
        }
    }

    #[test]
    fn falls_back_to_copy_without_boot_entry() {
        let event = systemd_event(b"irrelevant", Digest::new(SHA256, vec![0x11; 32]));
        let ctx = RehashContext::new(SHA256);
        let provider = crate::rehash::providers::tests::FakeProvider::default();
        let outcome = rehash_event(&event, &ctx, &provider, false).unwrap();
        assert!(matches!(outcome, RehashOutcome::Copy(_)));
    }

    #[test]
    fn rehashes_when_boot_entry_present() {
        let event = systemd_event(b"irrelevant", Digest::new(SHA256, vec![0x11; 32]));
        let ctx = RehashContext::new(SHA256).with_boot_entry(BootEntry {
            image_path: "/EFI/Linux/vmlinuz".to_string(),
            initrd_path: "/EFI/Linux/initrd.img".to_string(),
            options: "quiet".to_string(),
        });
        let provider = crate::rehash::providers::tests::FakeProvider::default();
        let outcome = rehash_event(&event, &ctx, &provider, false).unwrap();
        assert!(matches!(outcome, RehashOutcome::Rehashed(_)));
    }

    #[test]
    fn required_rehash_fails_hard_when_no_rule_applies() {
        let event = Event {
            index: 0,
            pcr_index: 7,
            event_type: event_type::EFI_GPT_EVENT,
            file_offset: 0,
            raw: vec![],
            digests: vec![Digest::new(SHA256, vec![0x22; 32])],
            parsed: Some(ParsedEvent::EfiGpt(crate::parser::EfiGpt { marshalled: vec![] })),
        };
        let ctx = RehashContext::new(SHA256);
        let provider = crate::rehash::providers::tests::FakeProvider::default();
        let err = rehash_event(&event, &ctx, &provider, true).unwrap_err();
        assert!(matches!(err, RehashError::Required { .. }));
    }
}
