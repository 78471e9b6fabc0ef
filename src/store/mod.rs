//! The persistent-store seam.
//!
//! The core consumes a narrow interface: load a collection's occupancy,
//! look up stored content by canonical key, and commit a reconciliation
//! plan as a single transaction. Patch content is shared and
//! content-addressed: a collection slot holds a UID into the content
//! store, and one UID may be referenced by several collections.

pub mod memory;

use crate::address::SLOT_CAPACITY;
use crate::error::PersistenceError;
use crate::reconcile::{DedupPolicy, ParamKey, ReconcilePlan};
use async_trait::async_trait;

pub use memory::MemoryStore;

/// Identity of stored patch content. Several collections may reference the
/// same UID; deleting a collection entry never deletes shared content.
pub type PatchUid = uuid::Uuid;

/// One stored patch sharing a queried parameter key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateHit {
    pub uid: PatchUid,
    pub name: String,
    /// Names of every collection referencing this UID.
    pub collections: Vec<String>,
}

/// Ordered occupancy of one named collection: 1024 optional UID references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSlotMap {
    slots: Vec<Option<PatchUid>>,
}

impl CollectionSlotMap {
    pub fn empty() -> Self {
        Self {
            slots: vec![None; SLOT_CAPACITY],
        }
    }

    pub fn get(&self, slot: u16) -> Option<PatchUid> {
        self.slots.get(slot as usize).copied().flatten()
    }

    pub fn is_occupied(&self, slot: u16) -> bool {
        self.get(slot).is_some()
    }

    pub fn set(&mut self, slot: u16, uid: PatchUid) {
        if let Some(entry) = self.slots.get_mut(slot as usize) {
            *entry = Some(uid);
        }
    }

    pub fn clear(&mut self, slot: u16) {
        if let Some(entry) = self.slots.get_mut(slot as usize) {
            *entry = None;
        }
    }

    pub fn occupied_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn references(&self, uid: PatchUid) -> bool {
        self.slots.iter().any(|s| *s == Some(uid))
    }

    pub fn iter_occupied(&self) -> impl Iterator<Item = (u16, PatchUid)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.map(|uid| (i as u16, uid)))
    }
}

impl Default for CollectionSlotMap {
    fn default() -> Self {
        Self::empty()
    }
}

/// Outcome of one committed plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub collection: Option<String>,
    /// UIDs now backing the committed entries, in plan order. Conflict
    /// entries are skipped and contribute nothing here.
    pub uids: Vec<PatchUid>,
    /// How many entries reused an existing UID instead of allocating.
    pub reused: usize,
    /// Conflict entries left for manual resolution.
    pub skipped_conflicts: usize,
}

/// The persistence collaborator. Commits are all-or-nothing: a failed
/// commit leaves the store untouched and is safe to retry.
#[async_trait]
pub trait PatchStore: Send + Sync {
    /// Current occupancy of a named collection. Unknown names resolve to
    /// an empty map (a collection exists once something is committed to
    /// it).
    async fn occupancy(&self, collection: &str) -> Result<CollectionSlotMap, PersistenceError>;

    /// Every stored patch whose content matches `key`, with the
    /// collections referencing each.
    async fn find_by_key(&self, key: ParamKey) -> Result<Vec<DuplicateHit>, PersistenceError>;

    /// Apply a plan in one transaction. `collection = None` imports into
    /// the shared content store without touching any slot map.
    async fn commit(
        &self,
        collection: Option<&str>,
        plan: &ReconcilePlan,
        dedup: DedupPolicy,
    ) -> Result<CommitReceipt, PersistenceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_map_basics() {
        let mut map = CollectionSlotMap::empty();
        assert_eq!(map.occupied_count(), 0);

        let uid = PatchUid::new_v4();
        map.set(42, uid);
        assert!(map.is_occupied(42));
        assert_eq!(map.get(42), Some(uid));
        assert!(map.references(uid));

        map.clear(42);
        assert!(!map.is_occupied(42));
        assert_eq!(map.occupied_count(), 0);
    }

    #[test]
    fn test_slot_map_ignores_out_of_range() {
        let mut map = CollectionSlotMap::empty();
        map.set(5000, PatchUid::new_v4());
        assert_eq!(map.occupied_count(), 0);
        assert!(!map.is_occupied(5000));
    }
}
