//! Event parser registry (§4.2).
//!
//! The source dispatches per event type through a struct of function
//! pointers (describe/rehash/rebuild/destroy). Here that's a tagged-union
//! enum and a matcher instead: each variant owns its data, `describe`/
//! `rehash`/`rebuild` are plain match arms, and there is no destructor to
//! hand-roll — `Drop` handles that for free (§9 "Variant dispatch for
//! parsed events").

pub mod efi_bsa;
pub mod efi_gpt;
pub mod efi_variable;
pub mod grub;
pub mod kernel_tag;
pub mod shim;
pub mod systemd;

use crate::error::ParseError;
use crate::eventlog::event::{event_type, ipl_pcr};
use crate::rehash::providers::ArtifactProvider;
use crate::rehash::RehashContext;

pub use efi_bsa::EfiBootServicesApp;
pub use efi_gpt::EfiGpt;
pub use efi_variable::EfiVariable;
pub use grub::{GrubCommand, GrubFile};
pub use kernel_tag::KernelTag;
pub use shim::ShimVariable;
pub use systemd::SystemdEvent;

/// A type-specific view of an event's raw body (§3 "Parsed event").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedEvent {
    EfiVariable(EfiVariable),
    EfiBootServicesApp(EfiBootServicesApp),
    EfiGpt(EfiGpt),
    GrubFile(GrubFile),
    GrubCommand(GrubCommand),
    ShimVariable(ShimVariable),
    Systemd(SystemdEvent),
    KernelTag(KernelTag),
}

/// Dispatches on `event_type`, with a sub-dispatch on `pcr_index` for `IPL`
/// events (§4.2). Returns `Ok(None)` for event types the registry doesn't
/// recognize, or for an IPL event with an empty/zero-terminator-only body —
/// both cases leave the rehash engine to fall back to the copy strategy.
pub fn parse_event(event_type: u32, pcr_index: u32, raw: &[u8]) -> Result<Option<ParsedEvent>, ParseError> {
    match event_type {
        self::event_type::EVENT_TAG => kernel_tag::parse(raw).map(|t| Some(ParsedEvent::KernelTag(t))),

        self::event_type::IPL => {
            if is_empty_ipl_body(raw) {
                return Ok(None);
            }
            match pcr_index {
                ipl_pcr::GRUB_COMMAND => grub::parse_command(raw).map(|c| Some(ParsedEvent::GrubCommand(c))),
                ipl_pcr::GRUB_FILE => grub::parse_file(raw).map(|f| Some(ParsedEvent::GrubFile(f))),
                ipl_pcr::SYSTEMD => Ok(Some(ParsedEvent::Systemd(systemd::parse(raw)))),
                ipl_pcr::SHIM => shim::parse(raw).map(|s| Some(ParsedEvent::ShimVariable(s))),
                _ => Ok(None),
            }
        }

        self::event_type::EFI_VARIABLE_AUTHORITY
        | self::event_type::EFI_VARIABLE_BOOT
        | self::event_type::EFI_VARIABLE_DRIVER_CONFIG => {
            efi_variable::parse(raw).map(|v| Some(ParsedEvent::EfiVariable(v)))
        }

        self::event_type::EFI_BOOT_SERVICES_APPLICATION | self::event_type::EFI_BOOT_SERVICES_DRIVER => {
            efi_bsa::parse(raw).map(|a| Some(ParsedEvent::EfiBootServicesApp(a)))
        }

        self::event_type::EFI_GPT_EVENT => Ok(Some(ParsedEvent::EfiGpt(efi_gpt::parse(raw)))),

        _ => Ok(None),
    }
}

fn is_empty_ipl_body(raw: &[u8]) -> bool {
    raw.is_empty() || raw.iter().all(|&b| b == 0)
}

impl ParsedEvent {
    pub fn describe(&self) -> String {
        match self {
            ParsedEvent::EfiVariable(v) => v.describe(),
            ParsedEvent::EfiBootServicesApp(v) => v.describe(),
            ParsedEvent::EfiGpt(v) => v.describe(),
            ParsedEvent::GrubFile(v) => v.describe(),
            ParsedEvent::GrubCommand(v) => v.describe(),
            ParsedEvent::ShimVariable(v) => v.describe(),
            ParsedEvent::Systemd(v) => v.describe(),
            ParsedEvent::KernelTag(v) => v.describe(),
        }
    }

    /// Recomputes a replacement digest against `ctx`, or `None` if this
    /// variant has no applicable rehash rule or the rule's inputs are
    /// missing — both cases are the rehash engine's cue to fall back to
    /// copying the firmware digest (§4.3).
    pub fn rehash(&self, ctx: &RehashContext, provider: &dyn ArtifactProvider) -> Option<Vec<u8>> {
        match self {
            ParsedEvent::EfiVariable(v) => v.rehash(ctx, provider),
            ParsedEvent::EfiBootServicesApp(v) => v.rehash(ctx, provider),
            ParsedEvent::EfiGpt(_) => None,
            ParsedEvent::GrubFile(v) => v.rehash(ctx, provider),
            ParsedEvent::GrubCommand(v) => v.rehash(ctx),
            ParsedEvent::ShimVariable(_) => None,
            ParsedEvent::Systemd(v) => v.rehash(ctx),
            ParsedEvent::KernelTag(v) => v.rehash(ctx, provider),
        }
    }

    /// Reconstructs the raw event bytes for the predicted boot, where that's
    /// meaningful (currently only GRUB commands rebuild as text; every other
    /// variant's rehash works directly from provider reads).
    pub fn rebuild(&self, ctx: &RehashContext) -> Option<Vec<u8>> {
        match self {
            ParsedEvent::GrubCommand(v) => v.rebuild(ctx).map(String::into_bytes),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventlog::event::event_type as ev;

    #[test]
    fn unknown_event_type_parses_to_none() {
        assert!(parse_event(0xdead_beef, 0, b"whatever").unwrap().is_none());
    }

    #[test]
    fn empty_ipl_body_parses_to_none() {
        assert!(parse_event(ev::IPL, ipl_pcr::GRUB_FILE, b"").unwrap().is_none());
        assert!(parse_event(ev::IPL, ipl_pcr::GRUB_FILE, &[0, 0, 0]).unwrap().is_none());
    }

    #[test]
    fn ipl_dispatches_on_pcr_index() {
        let parsed = parse_event(ev::IPL, ipl_pcr::GRUB_FILE, b"/boot/vmlinuz").unwrap().unwrap();
        assert!(matches!(parsed, ParsedEvent::GrubFile(_)));
    }
}
