//! Error types for the dump protocol and reconciliation core.
//!
//! Wire-level defects (`ProtocolError`) are recoverable: the offending frame
//! is dropped and the session keeps running. Persistence failures are
//! retryable and never partially applied.

use thiserror::Error;

/// A malformed or unrecognized wire frame. Non-fatal: the frame is dropped.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame length {actual} matches no known frame layout")]
    BadLength { actual: usize },

    #[error("missing start/end delimiters")]
    BadDelimiters,

    #[error("family bytes {found:02x?} do not match this device family")]
    FamilyMismatch { found: [u8; 2] },

    #[error("unit id {found:#04x}, expected {expected:#04x} or broadcast")]
    UnitMismatch { found: u8, expected: u8 },

    #[error("unknown frame kind {0:#04x}")]
    UnknownKind(u8),

    #[error("framing byte {found:#04x}, expected 0x7f")]
    BadFraming { found: u8 },

    #[error("address bytes out of range: bank {bank:#04x} program {program:#04x}")]
    BadAddress { bank: u8, program: u8 },

    #[error("payload length {actual}, expected {expected}")]
    BadPayloadLength { actual: usize, expected: usize },
}

/// Lifecycle violations on the transfer session or the coordinator latch.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("a transfer is already active")]
    Busy,

    #[error("no transfer is active")]
    NotActive,

    #[error("cannot abort an unbounded capture; abandon it instead")]
    UnboundedAbort,

    #[error("operation applies only to unbounded captures")]
    NotCapture,

    #[error("nothing to transfer")]
    EmptyBatch,

    #[error("no batch awaiting import")]
    NoPendingBatch,
}

/// Reconciliation cannot produce a plan for this batch/target combination.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("batch of {batch} patches exceeds collection capacity {capacity}")]
    Capacity { batch: usize, capacity: usize },
}

/// A failed store interaction. Commits are all-or-nothing, so every variant
/// is safe to retry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("unknown collection '{0}'")]
    UnknownCollection(String),

    #[error("commit rejected: {0}")]
    Rejected(String),
}

/// Top-level error for the crate.
#[derive(Debug, Error)]
pub enum DumpError {
    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("session: {0}")]
    Session(#[from] SessionError),

    #[error("reconcile: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("persistence: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("config: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, DumpError>;
