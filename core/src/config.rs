//! Runtime configuration: the two knobs this system reads from its
//! environment (§6 "Environment"). Kept intentionally small — the core does
//! not have a general-purpose config file the way the teacher's daemon
//! crates do, because there is nothing else to configure at this layer.

use std::env;
use std::path::PathBuf;

/// Default path the kernel exposes the firmware event log at.
pub const DEFAULT_EVENT_LOG_PATH: &str = "/sys/kernel/security/tpm0/binary_bios_measurements";

#[derive(Debug, Clone)]
pub struct Config {
    pub event_log_path: PathBuf,
    /// `None` means "let tss-esapi pick the platform default TCTI".
    pub tcti: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            event_log_path: PathBuf::from(DEFAULT_EVENT_LOG_PATH),
            tcti: None,
        }
    }
}

impl Config {
    /// Builds a `Config` from defaults, overridden by environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(path) = env::var("PCR_PREDICT_EVENTLOG") {
            cfg.event_log_path = PathBuf::from(path);
        }
        if let Ok(tcti) = env::var("PCR_PREDICT_TCTI") {
            cfg.tcti = Some(tcti);
        }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_points_at_kernel_event_log() {
        let cfg = Config::default();
        assert_eq!(cfg.event_log_path, PathBuf::from(DEFAULT_EVENT_LOG_PATH));
        assert!(cfg.tcti.is_none());
    }
}
