//! Content-duplicate detection over the patch library.
//!
//! Two patches are duplicates when their parameter vectors match after
//! masking the cosmetic fields: name, category, and the reserved tail.
//! The canonical key is a 128-bit hash of the masked payload; the store
//! indexes content by it.

use crate::error::PersistenceError;
use crate::patch::{
    PatchPayload, CATEGORY_OFFSET, NAME_LEN, NAME_OFFSET, PATCH_PAYLOAD_LEN, RESERVED_OFFSET,
};
use crate::store::{DuplicateHit, PatchStore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use xxhash_rust::xxh3::xxh3_128;

/// Canonical equality key over the non-cosmetic parameter bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamKey(u128);

impl ParamKey {
    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0.to_be_bytes()))
    }
}

/// Compute the canonical key for one payload: hash with name, category,
/// and reserved bytes zeroed.
pub fn param_key(payload: &PatchPayload) -> ParamKey {
    let mut masked = [0u8; PATCH_PAYLOAD_LEN];
    masked.copy_from_slice(payload.as_bytes());
    masked[NAME_OFFSET..NAME_OFFSET + NAME_LEN].fill(0);
    masked[CATEGORY_OFFSET] = 0;
    masked[RESERVED_OFFSET..].fill(0);
    ParamKey(xxh3_128(&masked))
}

/// Whether importing content identical to an already-stored patch reuses
/// the stored UID or allocates a fresh one. The default preserves the
/// observed allocate-always behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupPolicy {
    #[default]
    AlwaysNewUid,
    ReuseExistingUid,
}

/// Store-backed duplicate lookup.
pub struct DuplicateIndex<S> {
    store: Arc<S>,
}

impl<S: PatchStore> DuplicateIndex<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Every stored patch sharing this payload's canonical key, with the
    /// collections referencing each.
    pub async fn find_duplicates(
        &self,
        payload: &PatchPayload,
    ) -> Result<Vec<DuplicateHit>, PersistenceError> {
        self.store.find_by_key(param_key(payload)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_bytes_do_not_affect_key() {
        let a = PatchPayload::zeroed().with_name("Warm Pad");
        let b = PatchPayload::zeroed().with_name("Cold Pad");
        assert_eq!(param_key(&a), param_key(&b));
    }

    #[test]
    fn test_category_byte_does_not_affect_key() {
        let a = PatchPayload::zeroed().with_category(3);
        let b = PatchPayload::zeroed().with_category(9);
        assert_eq!(param_key(&a), param_key(&b));
    }

    #[test]
    fn test_parameter_byte_changes_key() {
        let base = vec![0u8; PATCH_PAYLOAD_LEN];
        let mut tweaked = base.clone();
        tweaked[17] = 1;

        let a = PatchPayload::from_slice(&base).unwrap();
        let b = PatchPayload::from_slice(&tweaked).unwrap();
        assert_ne!(param_key(&a), param_key(&b));
    }

    #[test]
    fn test_reserved_tail_does_not_affect_key() {
        let base = vec![0u8; PATCH_PAYLOAD_LEN];
        let mut tweaked = base.clone();
        tweaked[RESERVED_OFFSET] = 0x55;

        let a = PatchPayload::from_slice(&base).unwrap();
        let b = PatchPayload::from_slice(&tweaked).unwrap();
        assert_eq!(param_key(&a), param_key(&b));
    }
}
