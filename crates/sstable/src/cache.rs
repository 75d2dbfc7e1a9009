//! Shared LRU cache of decoded blocks.
//!
//! Keys are `(file_id, position)` pairs. File ids are process-unique and
//! never reused, so entries for a deleted file simply age out; there is no
//! explicit invalidation.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::block::Block;

pub struct BlockCache {
    inner: Option<Mutex<LruCache<(u64, u64), Arc<Block>>>>,
}

impl BlockCache {
    /// A capacity of zero disables caching entirely.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let inner = NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap)));
        Self { inner }
    }

    #[must_use]
    pub fn get(&self, file_id: u64, position: u64) -> Option<Arc<Block>> {
        let inner = self.inner.as_ref()?;
        let mut cache = inner.lock().ok()?;
        cache.get(&(file_id, position)).cloned()
    }

    pub fn insert(&self, file_id: u64, position: u64, block: Arc<Block>) {
        if let Some(inner) = &self.inner {
            if let Ok(mut cache) = inner.lock() {
                cache.put((file_id, position), block);
            }
        }
    }
}
