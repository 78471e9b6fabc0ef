//! Transfer sessions: the state machine sequencing one direction of a
//! bulk dump.
//!
//! A session never blocks. Frame arrival and timer expiry enter through
//! explicit methods and leave as an ordered list of [`SessionEffect`]s;
//! the coordinator owns the async drive loop.

pub mod timer;
pub mod transfer;

pub use timer::PacingTimer;
pub use transfer::{
    Direction, ProgressReport, SessionEffect, SessionState, TimeoutNotice, TransferOptions,
    TransferSession,
};
