//! Re-hash engine: per-event rehash strategy decision (§4.3).

pub mod context;
pub mod engine;
pub mod providers;

pub use context::{BootEntry, RehashContext};
pub use engine::{rehash_event, RehashOutcome};
