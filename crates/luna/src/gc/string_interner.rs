// String interner
// Every string is interned: equal content always yields the same GcId, so
// string equality in the VM is handle identity. The interner holds weak
// entries; the sweep pass purges the bucket of a string it frees.

use ahash::RandomState;
use std::collections::HashMap;

use super::gc_object::GcId;
use super::object_pool::ObjectPool;

/// FNV-1a over the raw bytes. The hash is stored on the string object so
/// the interner and the sweep pass never rehash content.
pub fn hash_string(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &byte in bytes {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

pub struct StringInterner {
    // Content hash -> candidate ids. Collisions are resolved by comparing
    // the actual bytes in the pool.
    buckets: HashMap<u32, Vec<GcId>, RandomState>,
}

impl StringInterner {
    pub fn new() -> Self {
        StringInterner {
            buckets: HashMap::with_capacity_and_hasher(256, RandomState::new()),
        }
    }

    /// Look up an already-interned string by content.
    pub fn find(&self, pool: &ObjectPool, text: &str, hash: u32) -> Option<GcId> {
        let candidates = self.buckets.get(&hash)?;
        candidates
            .iter()
            .copied()
            .find(|&id| pool.string(id).data == text)
    }

    /// Register a freshly allocated string object.
    pub fn insert(&mut self, hash: u32, id: GcId) {
        self.buckets.entry(hash).or_default().push(id);
    }

    /// Drop the entry of a string the sweep pass is about to free.
    pub fn remove_dead(&mut self, hash: u32, id: GcId) {
        if let Some(candidates) = self.buckets.get_mut(&hash) {
            candidates.retain(|&candidate| candidate != id);
            if candidates.is_empty() {
                self.buckets.remove(&hash);
            }
        }
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}
