//! Bulk patch-dump protocol and reconciliation engine.
//!
//! The core of a synthesizer patch librarian, GUI excluded:
//!
//! - [`protocol`] - bit-exact frame codec for the request/data wire format
//! - [`session`] - the transfer state machine: pacing, pause/resume,
//!   timeout notices, fast dump-all mode, unbounded ambient capture
//! - [`reconcile`] - slot assignment for a completed batch, plus the
//!   content-duplicate index
//! - [`store`] - the narrow persistence seam and an in-memory reference
//!   implementation
//! - [`coordinator`] - the single-active-transfer latch wiring it all to
//!   a transport and a caller
//!
//! # Architecture
//!
//! ```text
//! transport bytes -> Codec -> Coordinator -> active TransferSession
//!                                 |                (on Completed)
//!                                 v
//!                        ReconcileEngine -> PatchStore commit -> events
//! ```
//!
//! Everything is single-threaded and event-driven: frame arrival and
//! timer expiry are the only suspension points, and the caller's loop
//! selects over inbound frames, UI commands, and
//! [`coordinator::SessionCoordinator::next_deadline`].

pub mod address;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod patch;
pub mod protocol;
pub mod reconcile;
pub mod session;
pub mod store;

pub use address::{AddressRegion, SlotAddress, SLOT_CAPACITY};
pub use config::DumpConfig;
pub use coordinator::{DumpEvent, ImportRequest, SessionCoordinator};
pub use error::{
    DumpError, PersistenceError, ProtocolError, ReconcileError, Result, SessionError,
};
pub use patch::{PatchCategory, PatchPayload, PatchRecord, PATCH_PAYLOAD_LEN};
pub use protocol::{Codec, Frame};
pub use reconcile::{
    ConflictReason, DedupPolicy, ImportPolicy, Placement, ReconcileEngine, ReconcilePlan,
};
pub use session::{
    Direction, ProgressReport, SessionEffect, SessionState, TimeoutNotice, TransferOptions,
    TransferSession,
};
pub use store::{
    CollectionSlotMap, CommitReceipt, DuplicateHit, MemoryStore, PatchStore, PatchUid,
};
