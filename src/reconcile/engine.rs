//! Slot assignment for a completed batch.
//!
//! Given the batch, the target collection's occupancy, and the caller's
//! policy flags, produce a plan that assigns each record a destination
//! slot or records why it cannot have one. The one hard invariant: no
//! plan assigns the same slot twice, and without overwrite no assigned
//! slot collides with a pre-existing occupant.

use crate::address::SLOT_CAPACITY;
use crate::error::ReconcileError;
use crate::patch::PatchRecord;
use crate::reconcile::duplicates::DuplicateIndex;
use crate::store::{CollectionSlotMap, DuplicateHit, PatchStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Caller policy for one import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportPolicy {
    /// Assign lowest free slots in batch order instead of preserving
    /// source addresses.
    pub auto_index: bool,
    /// Allow placement onto occupied slots.
    pub overwrite: bool,
    /// Treat the target as empty (a collection being created).
    pub new_collection: bool,
}

/// Why a record could not be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictReason {
    /// Source slot already occupied and overwrite is off.
    Occupied,
    /// Auto-indexing found no eligible slot left.
    NoFreeSlot,
}

/// Destination decision for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Assigned {
        slot: u16,
        /// The slot is occupied and will be overwritten on commit. Purely
        /// presentational; the destination identity is unchanged.
        overwrite_pending: bool,
    },
    Conflict {
        reason: ConflictReason,
    },
    /// Imported into shared content storage only; no slot semantics.
    LibraryOnly,
}

#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub record: PatchRecord,
    pub placement: Placement,
    /// Stored patches whose content matches this record, for pre-commit
    /// warnings.
    pub duplicates: Vec<DuplicateHit>,
}

#[derive(Debug, Clone, Default)]
pub struct ReconcilePlan {
    pub entries: Vec<PlanEntry>,
}

impl ReconcilePlan {
    pub fn assigned_slots(&self) -> Vec<u16> {
        self.entries
            .iter()
            .filter_map(|e| match e.placement {
                Placement::Assigned { slot, .. } => Some(slot),
                _ => None,
            })
            .collect()
    }

    pub fn conflict_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.placement, Placement::Conflict { .. }))
            .count()
    }

    pub fn is_clean(&self) -> bool {
        self.conflict_count() == 0
    }

    /// Check the plan invariant: assigned slots pairwise distinct, and
    /// without overwrite disjoint from pre-existing occupants.
    pub fn validate(&self, occupancy: Option<&CollectionSlotMap>, overwrite: bool) -> bool {
        let mut seen = vec![false; SLOT_CAPACITY];
        for entry in &self.entries {
            if let Placement::Assigned { slot, .. } = entry.placement {
                let i = slot as usize;
                if i >= SLOT_CAPACITY || seen[i] {
                    return false;
                }
                seen[i] = true;
                if !overwrite {
                    if let Some(occ) = occupancy {
                        if occ.is_occupied(slot) {
                            return false;
                        }
                    }
                }
            }
        }
        true
    }
}

/// Compute placements for a batch. Pure slot arithmetic; duplicate
/// annotation happens in [`ReconcileEngine::plan`].
pub fn assign_slots(
    batch: &[PatchRecord],
    target: Option<&CollectionSlotMap>,
    policy: ImportPolicy,
) -> Result<Vec<Placement>, ReconcileError> {
    let Some(target) = target else {
        // Library-only import: content store only, no slot semantics.
        return Ok(batch.iter().map(|_| Placement::LibraryOnly).collect());
    };
    if batch.len() > SLOT_CAPACITY {
        return Err(ReconcileError::Capacity {
            batch: batch.len(),
            capacity: SLOT_CAPACITY,
        });
    }

    let fresh;
    let occupancy = if policy.new_collection {
        fresh = CollectionSlotMap::empty();
        &fresh
    } else {
        target
    };

    let mut used = vec![false; SLOT_CAPACITY];
    let mut seen_sources = vec![false; SLOT_CAPACITY];
    let mut placements = Vec::with_capacity(batch.len());

    for record in batch {
        let source = record.source.index();
        let first_occurrence = match source {
            Some(i) => {
                let first = !seen_sources[i as usize];
                seen_sources[i as usize] = true;
                first
            }
            // Edit-buffer/multi sources have no slot to preserve.
            None => false,
        };

        let placement = 'place: {
            if let Some(slot) = source.filter(|_| !policy.auto_index && first_occurrence) {
                let occupied = occupancy.is_occupied(slot);
                if occupied && !policy.overwrite {
                    break 'place Placement::Conflict {
                        reason: ConflictReason::Occupied,
                    };
                }
                if !used[slot as usize] {
                    used[slot as usize] = true;
                    break 'place Placement::Assigned {
                        slot,
                        overwrite_pending: occupied,
                    };
                }
                // An earlier fallback took this slot; the no-double-
                // assignment invariant outranks source preservation.
            }
            match lowest_free(&used, occupancy, policy.overwrite) {
                Some(slot) => {
                    used[slot as usize] = true;
                    Placement::Assigned {
                        slot,
                        overwrite_pending: policy.overwrite && occupancy.is_occupied(slot),
                    }
                }
                None => Placement::Conflict {
                    reason: ConflictReason::NoFreeSlot,
                },
            }
        };
        placements.push(placement);
    }
    Ok(placements)
}

fn lowest_free(used: &[bool], occupancy: &CollectionSlotMap, overwrite: bool) -> Option<u16> {
    (0..SLOT_CAPACITY as u16).find(|&s| !used[s as usize] && (overwrite || !occupancy.is_occupied(s)))
}

/// Planner: slot assignment plus duplicate annotation from the store.
pub struct ReconcileEngine<S> {
    index: DuplicateIndex<S>,
}

impl<S: PatchStore> ReconcileEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            index: DuplicateIndex::new(store),
        }
    }

    pub async fn plan(
        &self,
        batch: Vec<PatchRecord>,
        target: Option<&CollectionSlotMap>,
        policy: ImportPolicy,
    ) -> crate::error::Result<ReconcilePlan> {
        let placements = assign_slots(&batch, target, policy)?;
        let mut entries = Vec::with_capacity(batch.len());
        for (record, placement) in batch.into_iter().zip(placements) {
            let duplicates = self.index.find_duplicates(&record.payload).await?;
            entries.push(PlanEntry {
                record,
                placement,
                duplicates,
            });
        }
        Ok(ReconcilePlan { entries })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::SlotAddress;
    use crate::patch::PatchPayload;
    use crate::store::PatchUid;

    fn record_at(bank: u8, program: u8) -> PatchRecord {
        PatchRecord::new(
            SlotAddress::new(bank, program).unwrap(),
            PatchPayload::zeroed(),
        )
    }

    fn record_at_slot(index: u16) -> PatchRecord {
        PatchRecord::new(SlotAddress::slot(index).unwrap(), PatchPayload::zeroed())
    }

    fn auto_index() -> ImportPolicy {
        ImportPolicy {
            auto_index: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_auto_index_empty_target_assigns_sequentially() {
        let batch: Vec<_> = (100..110).map(record_at_slot).collect();
        let target = CollectionSlotMap::empty();
        let placements = assign_slots(&batch, Some(&target), auto_index()).unwrap();

        for (i, p) in placements.iter().enumerate() {
            assert_eq!(
                *p,
                Placement::Assigned {
                    slot: i as u16,
                    overwrite_pending: false
                }
            );
        }
    }

    #[test]
    fn test_auto_index_skips_occupied_slots() {
        let mut target = CollectionSlotMap::empty();
        target.set(0, PatchUid::new_v4());
        target.set(2, PatchUid::new_v4());

        let batch = vec![record_at_slot(500), record_at_slot(501)];
        let placements = assign_slots(&batch, Some(&target), auto_index()).unwrap();
        assert_eq!(
            placements,
            vec![
                Placement::Assigned {
                    slot: 1,
                    overwrite_pending: false
                },
                Placement::Assigned {
                    slot: 3,
                    overwrite_pending: false
                },
            ]
        );
    }

    #[test]
    fn test_auto_index_with_overwrite_takes_occupied_slots() {
        let mut target = CollectionSlotMap::empty();
        target.set(0, PatchUid::new_v4());

        let policy = ImportPolicy {
            auto_index: true,
            overwrite: true,
            ..Default::default()
        };
        let batch = vec![record_at_slot(500)];
        let placements = assign_slots(&batch, Some(&target), policy).unwrap();
        assert_eq!(
            placements,
            vec![Placement::Assigned {
                slot: 0,
                overwrite_pending: true
            }]
        );
    }

    #[test]
    fn test_source_preserving_conflicts_on_occupied() {
        let mut target = CollectionSlotMap::empty();
        target.set(5, PatchUid::new_v4());

        let batch = vec![record_at_slot(5), record_at_slot(6)];
        let placements = assign_slots(&batch, Some(&target), ImportPolicy::default()).unwrap();
        // Never a silent remap.
        assert_eq!(
            placements,
            vec![
                Placement::Conflict {
                    reason: ConflictReason::Occupied
                },
                Placement::Assigned {
                    slot: 6,
                    overwrite_pending: false
                },
            ]
        );
    }

    #[test]
    fn test_overwrite_keeps_source_slot_and_flags_it() {
        let mut target = CollectionSlotMap::empty();
        target.set(5, PatchUid::new_v4());

        let policy = ImportPolicy {
            overwrite: true,
            ..Default::default()
        };
        let batch = vec![record_at_slot(5)];
        let placements = assign_slots(&batch, Some(&target), policy).unwrap();
        assert_eq!(
            placements,
            vec![Placement::Assigned {
                slot: 5,
                overwrite_pending: true
            }]
        );
    }

    #[test]
    fn test_duplicate_sources_fall_back_to_auto_index() {
        // Two records claim B003; only the first keeps it.
        let batch = vec![record_at(1, 2), record_at(1, 2), record_at(1, 3)];
        let target = CollectionSlotMap::empty();
        let placements = assign_slots(&batch, Some(&target), ImportPolicy::default()).unwrap();

        assert_eq!(
            placements,
            vec![
                Placement::Assigned {
                    slot: 130,
                    overwrite_pending: false
                },
                Placement::Assigned {
                    slot: 0,
                    overwrite_pending: false
                },
                Placement::Assigned {
                    slot: 131,
                    overwrite_pending: false
                },
            ]
        );
    }

    #[test]
    fn test_fallback_never_collides_with_later_source() {
        // The duplicate of slot 5 falls back to slot 0; the record whose
        // source is slot 0 must then fall back as well.
        let batch = vec![record_at_slot(5), record_at_slot(5), record_at_slot(0)];
        let target = CollectionSlotMap::empty();
        let placements = assign_slots(&batch, Some(&target), ImportPolicy::default()).unwrap();

        assert_eq!(
            placements,
            vec![
                Placement::Assigned {
                    slot: 5,
                    overwrite_pending: false
                },
                Placement::Assigned {
                    slot: 0,
                    overwrite_pending: false
                },
                Placement::Assigned {
                    slot: 1,
                    overwrite_pending: false
                },
            ]
        );
        let plan = ReconcilePlan {
            entries: batch
                .into_iter()
                .zip(placements)
                .map(|(record, placement)| PlanEntry {
                    record,
                    placement,
                    duplicates: Vec::new(),
                })
                .collect(),
        };
        assert!(plan.validate(Some(&target), false));
    }

    #[test]
    fn test_unindexed_sources_always_auto_index() {
        let batch = vec![
            PatchRecord::new(SlotAddress::edit_buffer(), PatchPayload::zeroed()),
            PatchRecord::new(SlotAddress::multi(4).unwrap(), PatchPayload::zeroed()),
        ];
        let target = CollectionSlotMap::empty();
        // Source-preserving mode requested, but these have no slot source.
        let placements = assign_slots(&batch, Some(&target), ImportPolicy::default()).unwrap();
        assert_eq!(
            placements,
            vec![
                Placement::Assigned {
                    slot: 0,
                    overwrite_pending: false
                },
                Placement::Assigned {
                    slot: 1,
                    overwrite_pending: false
                },
            ]
        );
    }

    #[test]
    fn test_new_collection_ignores_occupancy() {
        let mut target = CollectionSlotMap::empty();
        target.set(0, PatchUid::new_v4());

        let policy = ImportPolicy {
            auto_index: true,
            new_collection: true,
            ..Default::default()
        };
        let placements = assign_slots(&[record_at_slot(9)], Some(&target), policy).unwrap();
        assert_eq!(
            placements,
            vec![Placement::Assigned {
                slot: 0,
                overwrite_pending: false
            }]
        );
    }

    #[test]
    fn test_capacity_error_and_library_fallback() {
        let batch: Vec<_> = (0..1025)
            .map(|i| record_at_slot((i % 1024) as u16))
            .collect();
        let target = CollectionSlotMap::empty();

        let err = assign_slots(&batch, Some(&target), auto_index()).unwrap_err();
        assert_eq!(
            err,
            ReconcileError::Capacity {
                batch: 1025,
                capacity: 1024
            }
        );

        // The same batch imports fine with no slot semantics.
        let placements = assign_slots(&batch, None, auto_index()).unwrap();
        assert_eq!(placements.len(), 1025);
        assert!(placements.iter().all(|p| *p == Placement::LibraryOnly));
    }

    #[test]
    fn test_no_free_slot_conflicts() {
        let mut target = CollectionSlotMap::empty();
        for s in 0..1023u16 {
            target.set(s, PatchUid::new_v4());
        }
        let batch = vec![record_at_slot(0), record_at_slot(1)];
        let placements = assign_slots(&batch, Some(&target), auto_index()).unwrap();
        assert_eq!(
            placements,
            vec![
                Placement::Assigned {
                    slot: 1023,
                    overwrite_pending: false
                },
                Placement::Conflict {
                    reason: ConflictReason::NoFreeSlot
                },
            ]
        );
    }
}
