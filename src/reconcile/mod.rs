//! Reconciliation: slot assignment for a freshly transferred batch.
//!
//! The engine turns a batch of records plus a target collection and policy
//! flags into a [`ReconcilePlan`]; the duplicate index annotates each entry
//! with the stored patches sharing its parameter content.

pub mod duplicates;
pub mod engine;

pub use duplicates::{param_key, DedupPolicy, DuplicateIndex, ParamKey};
pub use engine::{
    ConflictReason, ImportPolicy, Placement, PlanEntry, ReconcileEngine, ReconcilePlan,
};
