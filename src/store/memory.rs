//! In-memory reference store.
//!
//! Backs the test suite and small embeddings. Content is shared and
//! content-addressed: commits allocate (or reuse) UIDs in a content map,
//! and collections are slot maps of references into it. Commits apply
//! all-or-nothing; `fail_next_commits` injects failures for retry tests.

use crate::error::PersistenceError;
use crate::reconcile::{param_key, DedupPolicy, ParamKey, Placement, ReconcilePlan};
use crate::patch::PatchPayload;
use crate::store::{CollectionSlotMap, CommitReceipt, DuplicateHit, PatchStore, PatchUid};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_commits: AtomicU32,
}

#[derive(Default)]
struct Inner {
    content: HashMap<PatchUid, StoredPatch>,
    by_key: HashMap<ParamKey, Vec<PatchUid>>,
    collections: HashMap<String, CollectionSlotMap>,
}

struct StoredPatch {
    payload: PatchPayload,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` commits fail with a retryable error.
    pub fn fail_next_commits(&self, n: u32) {
        self.fail_commits.store(n, Ordering::SeqCst);
    }

    /// Seed one slot of a collection directly, bypassing reconciliation.
    pub async fn seed(&self, collection: &str, slot: u16, payload: PatchPayload) -> PatchUid {
        let mut inner = self.inner.lock().await;
        let uid = PatchUid::new_v4();
        let key = param_key(&payload);
        inner.content.insert(uid, StoredPatch { payload });
        inner.by_key.entry(key).or_default().push(uid);
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .set(slot, uid);
        uid
    }

    /// Remove one collection entry. Shared content stays: other
    /// collections referencing the same UID are unaffected.
    pub async fn clear_slot(&self, collection: &str, slot: u16) {
        let mut inner = self.inner.lock().await;
        if let Some(map) = inner.collections.get_mut(collection) {
            map.clear(slot);
        }
    }

    pub async fn content_len(&self) -> usize {
        self.inner.lock().await.content.len()
    }

    pub async fn payload_of(&self, uid: PatchUid) -> Option<PatchPayload> {
        self.inner
            .lock()
            .await
            .content
            .get(&uid)
            .map(|p| p.payload.clone())
    }

    fn collections_referencing(inner: &Inner, uid: PatchUid) -> Vec<String> {
        let mut names: Vec<String> = inner
            .collections
            .iter()
            .filter(|(_, map)| map.references(uid))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

#[async_trait]
impl PatchStore for MemoryStore {
    async fn occupancy(&self, collection: &str) -> Result<CollectionSlotMap, PersistenceError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_by_key(&self, key: ParamKey) -> Result<Vec<DuplicateHit>, PersistenceError> {
        let inner = self.inner.lock().await;
        let uids = inner.by_key.get(&key).cloned().unwrap_or_default();
        Ok(uids
            .into_iter()
            .filter_map(|uid| {
                inner.content.get(&uid).map(|stored| DuplicateHit {
                    uid,
                    name: stored.payload.name(),
                    collections: Self::collections_referencing(&inner, uid),
                })
            })
            .collect())
    }

    async fn commit(
        &self,
        collection: Option<&str>,
        plan: &ReconcilePlan,
        dedup: DedupPolicy,
    ) -> Result<CommitReceipt, PersistenceError> {
        let remaining = self.fail_commits.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_commits.store(remaining - 1, Ordering::SeqCst);
            return Err(PersistenceError::Unavailable(
                "injected commit failure".to_string(),
            ));
        }

        let mut inner = self.inner.lock().await;

        // Stage everything before touching the store so a rejection leaves
        // it untouched.
        let mut staged_by_key: HashMap<ParamKey, PatchUid> = HashMap::new();
        let mut staged: Vec<(Option<u16>, PatchUid, Option<PatchPayload>)> = Vec::new();
        let mut reused = 0;
        let mut skipped_conflicts = 0;

        for entry in &plan.entries {
            let slot = match entry.placement {
                Placement::Conflict { .. } => {
                    skipped_conflicts += 1;
                    continue;
                }
                Placement::Assigned { slot, .. } => {
                    if collection.is_none() {
                        return Err(PersistenceError::Rejected(
                            "slot assignment without a target collection".to_string(),
                        ));
                    }
                    Some(slot)
                }
                Placement::LibraryOnly => None,
            };

            let key = param_key(&entry.record.payload);
            let existing = match dedup {
                DedupPolicy::ReuseExistingUid => inner
                    .by_key
                    .get(&key)
                    .and_then(|uids| uids.first().copied())
                    .or_else(|| staged_by_key.get(&key).copied()),
                DedupPolicy::AlwaysNewUid => None,
            };
            match existing {
                Some(uid) => {
                    reused += 1;
                    staged.push((slot, uid, None));
                }
                None => {
                    let uid = PatchUid::new_v4();
                    staged_by_key.insert(key, uid);
                    staged.push((slot, uid, Some(entry.record.payload.clone())));
                }
            }
        }

        // Apply.
        let mut uids = Vec::with_capacity(staged.len());
        for (slot, uid, fresh_payload) in staged {
            if let Some(payload) = fresh_payload {
                let key = param_key(&payload);
                inner.content.insert(uid, StoredPatch { payload });
                inner.by_key.entry(key).or_default().push(uid);
            }
            if let (Some(name), Some(slot)) = (collection, slot) {
                inner
                    .collections
                    .entry(name.to_string())
                    .or_default()
                    .set(slot, uid);
            }
            uids.push(uid);
        }

        debug!(
            collection = collection.unwrap_or("<library>"),
            committed = uids.len(),
            reused,
            skipped_conflicts,
            "commit applied"
        );
        Ok(CommitReceipt {
            collection: collection.map(|s| s.to_string()),
            uids,
            reused,
            skipped_conflicts,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
