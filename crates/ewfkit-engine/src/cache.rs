//! Decompressed chunk cache
//!
//! Reads through the handle hit the same chunks repeatedly when the caller
//! streams in sub-chunk buffers. The cache keeps recently unpacked chunks
//! behind sharded locks so concurrent readers do not serialize on one
//! mutex.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Number of shards; a small power of two keeps the modulo cheap
const SHARD_COUNT: usize = 8;

struct Shard {
    entries: HashMap<u64, Arc<Vec<u8>>>,
    /// Insertion-recency queue, most recent last
    order: Vec<u64>,
}

impl Shard {
    fn touch(&mut self, chunk_index: u64) {
        self.order.retain(|&index| index != chunk_index);
        self.order.push(chunk_index);
    }
}

/// Sharded LRU cache of unpacked chunk data keyed by chunk index
pub struct ChunkCache {
    shards: Vec<Mutex<Shard>>,
    capacity_per_shard: usize,
}

impl ChunkCache {
    /// Default number of cached chunks
    pub const DEFAULT_CAPACITY: usize = 8;

    /// Create a cache bounded to roughly `capacity` chunks
    pub fn new(capacity: usize) -> Self {
        let capacity_per_shard = capacity.div_ceil(SHARD_COUNT).max(1);
        let shards = (0..SHARD_COUNT)
            .map(|_| {
                Mutex::new(Shard {
                    entries: HashMap::new(),
                    order: Vec::new(),
                })
            })
            .collect();
        Self {
            shards,
            capacity_per_shard,
        }
    }

    fn shard(&self, chunk_index: u64) -> &Mutex<Shard> {
        &self.shards[(chunk_index as usize) % SHARD_COUNT]
    }

    /// Look up a chunk
    pub fn get(&self, chunk_index: u64) -> Option<Arc<Vec<u8>>> {
        let mut shard = self.shard(chunk_index).lock().expect("cache shard lock");
        let entry = shard.entries.get(&chunk_index).cloned();
        if entry.is_some() {
            shard.touch(chunk_index);
        }
        entry
    }

    /// Insert a chunk, evicting the least recently used if full
    pub fn put(&self, chunk_index: u64, data: Arc<Vec<u8>>) {
        let mut shard = self.shard(chunk_index).lock().expect("cache shard lock");
        if shard.entries.len() >= self.capacity_per_shard
            && !shard.entries.contains_key(&chunk_index)
        {
            if let Some(&coldest) = shard.order.first() {
                shard.entries.remove(&coldest);
                shard.order.remove(0);
            }
        }
        shard.entries.insert(chunk_index, data);
        shard.touch(chunk_index);
    }

    /// Drop a chunk, e.g. after a delta overwrite
    pub fn invalidate(&self, chunk_index: u64) {
        let mut shard = self.shard(chunk_index).lock().expect("cache shard lock");
        shard.entries.remove(&chunk_index);
        shard.order.retain(|&index| index != chunk_index);
    }

    /// Drop everything
    pub fn clear(&self) {
        for shard in &self.shards {
            let mut shard = shard.lock().expect("cache shard lock");
            shard.entries.clear();
            shard.order.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_put() {
        let cache = ChunkCache::new(8);
        assert!(cache.get(1).is_none());
        cache.put(1, Arc::new(vec![1, 2, 3]));
        assert_eq!(cache.get(1).unwrap().as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn test_eviction_is_per_shard() {
        let cache = ChunkCache::new(8);
        // All on the same shard: indices congruent modulo the shard count
        cache.put(0, Arc::new(vec![0]));
        cache.put(8, Arc::new(vec![8]));
        // Capacity per shard is one; the older entry is gone
        assert!(cache.get(0).is_none());
        assert!(cache.get(8).is_some());
    }

    #[test]
    fn test_recency_updates_on_get() {
        let cache = ChunkCache::new(16);
        cache.put(0, Arc::new(vec![0]));
        cache.put(8, Arc::new(vec![8]));
        // Touch 0 so 8 becomes the eviction candidate
        cache.get(0);
        cache.put(16, Arc::new(vec![16]));
        assert!(cache.get(0).is_some());
        assert!(cache.get(8).is_none());
    }

    #[test]
    fn test_invalidate() {
        let cache = ChunkCache::new(8);
        cache.put(3, Arc::new(vec![3]));
        cache.invalidate(3);
        assert!(cache.get(3).is_none());
    }
}
