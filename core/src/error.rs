use thiserror::Error;

/// Failures while reading the raw TCG event log stream (§4.1).
#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("event log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("event log ended before a complete record could be read")]
    UnexpectedEof,

    #[error("event size {size} exceeds the {cap} byte sanity cap")]
    EventTooLarge { size: u64, cap: u64 },

    #[error("event log references unknown hash algorithm id {0:#06x}")]
    UnknownAlgorithm(u16),

    #[error("malformed Spec ID Event03 header: {0}")]
    MalformedSpecId(&'static str),
}

/// Failures while decoding a raw event's type-specific body (§4.2).
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("event log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("truncated event body for event type {0:#x}")]
    Truncated(u32),

    #[error("invalid UTF-16LE in event body")]
    InvalidUtf16,

    #[error("unrecognized shim variable name {0:?}")]
    UnknownShimVariable(String),
}

/// Failures while recomputing a predicted digest (§4.3).
#[derive(Debug, Error)]
pub enum RehashError {
    #[error("required rehash for pcr {pcr} could not be produced: {reason}")]
    Required { pcr: u32, reason: String },

    #[error("failed to read artifact {path}: {source}")]
    ArtifactIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no next-boot kernel entry supplied for an event that requires one")]
    MissingBootEntry,
}

/// Failures building TPM2 policies (§4.5).
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("TPM command failed while building policy: {0}")]
    Tpm(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("no valid PCR registers in bank, cannot build a PCR selection")]
    EmptySelection,
}

/// Failures reading or writing a sealed-secret envelope (§4.6).
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("ASN.1 DER error: {0}")]
    Asn1(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("policy program contains unsupported opcode {0}")]
    UnsupportedOpcode(u32),

    #[error("this target platform does not support this operation")]
    Unsupported,

    #[error("TPM marshalling error: {0}")]
    Tpm(String),
}

/// Failures during unseal (§4.7).
#[derive(Debug, Error)]
pub enum UnsealError {
    #[error("TPM command failed during unseal: {0}")]
    Tpm(String),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("no authPolicy entry could be satisfied")]
    NoPolicySatisfied,
}

/// Failures parsing a `--pcrs` selection spec (§6).
#[derive(Debug, Error)]
pub enum PcrSpecError {
    #[error("empty PCR selection")]
    Empty,

    #[error("PCR index {0} out of range 0-23")]
    OutOfRange(u32),

    #[error("malformed PCR range {0:?}")]
    MalformedRange(String),

    #[error("unrecognized hash algorithm {0:?}")]
    UnknownAlgorithm(String),
}

/// Top-level error returned from any core operation.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    EventLog(#[from] EventLogError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Rehash(#[from] RehashError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error(transparent)]
    Unseal(#[from] UnsealError),
    #[error(transparent)]
    PcrSpec(#[from] PcrSpecError),
    #[error("input error: {0}")]
    Input(String),
}
