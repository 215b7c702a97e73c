//! C1: negative-entry cache.
//!
//! Grounded on `original_source/mfsclient/negentrycache.c`: a 4-hash-function,
//! 16-slot-bucket cuckoo-style table remembering "name does not exist under
//! this directory" facts, so repeated failed lookups of the same missing
//! name don't round-trip to the master. Mass invalidation (directory
//! modified, tree rename, etc.) is O(1) via a global clear-stamp rather than
//! a bucket sweep.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::inode::Inode;

const HASH_FUNCTIONS: usize = 4;
const BUCKET_SIZE: usize = 16;
const BUCKETS: usize = 6257;

const HASH_PRIMES: [u32; HASH_FUNCTIONS] = [1_072_573_589, 3_465_827_623, 2_848_548_977, 748_191_707];

#[derive(Clone)]
struct Slot {
    inode: Inode,
    name: Box<[u8]>,
    inserted: Instant,
}

#[derive(Default, Clone)]
struct Bucket {
    slots: [Option<Slot>; BUCKET_SIZE],
}

impl Default for Slot {
    fn default() -> Self {
        Slot {
            inode: Inode(0),
            name: Box::from(&[][..]),
            inserted: Instant::now(),
        }
    }
}

struct Inner {
    buckets: Vec<Bucket>,
    /// Entries inserted before this instant are treated as already expired;
    /// bumping it on `clear()` invalidates the whole cache in O(1).
    clear_stamp: Instant,
}

/// The negative-entry cache. Disabled (all operations become no-ops) when
/// constructed with a zero timeout, mirroring `negentry_cache_init`'s
/// `to <= 0.0` behavior.
pub struct NegEntryCache {
    timeout: Duration,
    inner: Mutex<Inner>,
}

impl NegEntryCache {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let buckets = vec![Bucket::default(); BUCKETS];
        NegEntryCache {
            timeout,
            inner: Mutex::new(Inner {
                buckets,
                clear_stamp: Instant::now(),
            }),
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        !self.timeout.is_zero()
    }

    fn hash(parent: Inode, name: &[u8], fn_index: usize) -> usize {
        let mut h: u32 = HASH_PRIMES[fn_index];
        h = h.wrapping_mul(parent.0).wrapping_add(name.len() as u32);
        for &b in name {
            h = h.wrapping_mul(HASH_PRIMES[fn_index]).wrapping_add(u32::from(b));
        }
        (h as usize) % BUCKETS
    }

    fn is_live(&self, slot: &Slot, now: Instant, clear_stamp: Instant) -> bool {
        slot.inserted >= clear_stamp && now.duration_since(slot.inserted) < self.timeout
    }

    /// Remembers that `name` does not exist under `parent`.
    pub fn insert(&self, parent: Inode, name: &[u8]) {
        if !self.enabled() {
            return;
        }
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let clear_stamp = inner.clear_stamp;

        let mut oldest: Option<(usize, usize, Instant)> = None;
        for fi in 0..HASH_FUNCTIONS {
            let bucket_idx = Self::hash(parent, name, fi);
            let bucket = &mut inner.buckets[bucket_idx];
            for (si, slot) in bucket.slots.iter_mut().enumerate() {
                match slot {
                    Some(s) if s.inode == parent && &*s.name == name => {
                        s.inserted = now;
                        return;
                    }
                    Some(s) => {
                        let candidate_time = if self.is_live(s, now, clear_stamp) {
                            s.inserted
                        } else {
                            // already-expired slots are the cheapest to evict
                            Instant::now() - Duration::from_secs(3600)
                        };
                        if oldest.is_none_or(|(_, _, t)| candidate_time < t) {
                            oldest = Some((bucket_idx, si, candidate_time));
                        }
                    }
                    None => {
                        oldest = Some((bucket_idx, si, Instant::now() - Duration::from_secs(3600)));
                    }
                }
            }
        }

        if let Some((bucket_idx, si, _)) = oldest {
            inner.buckets[bucket_idx].slots[si] = Some(Slot {
                inode: parent,
                name: Box::from(name),
                inserted: now,
            });
        }
    }

    /// Returns true if `name` is cached as absent under `parent` and the
    /// entry hasn't expired or been invalidated since insertion.
    #[must_use]
    pub fn search(&self, parent: Inode, name: &[u8]) -> bool {
        if !self.enabled() {
            return false;
        }
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let clear_stamp = inner.clear_stamp;
        for fi in 0..HASH_FUNCTIONS {
            let bucket_idx = Self::hash(parent, name, fi);
            let bucket = &mut inner.buckets[bucket_idx];
            for slot in &mut bucket.slots {
                if let Some(s) = slot {
                    if s.inode == parent && &*s.name == name {
                        if self.is_live(s, now, clear_stamp) {
                            return true;
                        }
                        *slot = None;
                        return false;
                    }
                }
            }
        }
        false
    }

    /// Removes a specific negative entry, e.g. after a successful create of
    /// a previously-absent name.
    pub fn remove(&self, parent: Inode, name: &[u8]) {
        if !self.enabled() {
            return;
        }
        let mut inner = self.inner.lock();
        for fi in 0..HASH_FUNCTIONS {
            let bucket_idx = Self::hash(parent, name, fi);
            let bucket = &mut inner.buckets[bucket_idx];
            for slot in &mut bucket.slots {
                if matches!(slot, Some(s) if s.inode == parent && &*s.name == name) {
                    *slot = None;
                    return;
                }
            }
        }
    }

    /// Invalidates every entry in the cache in O(1) by bumping the
    /// clear-stamp; existing slots are reclaimed lazily as they're probed.
    pub fn clear(&self) {
        if !self.enabled() {
            return;
        }
        self.inner.lock().clear_stamp = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> NegEntryCache {
        NegEntryCache::new(Duration::from_secs(60))
    }

    #[test]
    fn disabled_cache_is_always_a_miss() {
        let c = NegEntryCache::new(Duration::ZERO);
        c.insert(Inode(5), b"missing");
        assert!(!c.search(Inode(5), b"missing"));
    }

    #[test]
    fn insert_then_search_hits() {
        let c = cache();
        c.insert(Inode(5), b"missing");
        assert!(c.search(Inode(5), b"missing"));
        assert!(!c.search(Inode(5), b"other"));
        assert!(!c.search(Inode(6), b"missing"));
    }

    #[test]
    fn remove_clears_single_entry() {
        let c = cache();
        c.insert(Inode(5), b"missing");
        c.remove(Inode(5), b"missing");
        assert!(!c.search(Inode(5), b"missing"));
    }

    #[test]
    fn clear_invalidates_everything_immediately() {
        let c = cache();
        c.insert(Inode(1), b"a");
        c.insert(Inode(2), b"b");
        c.clear();
        assert!(!c.search(Inode(1), b"a"));
        assert!(!c.search(Inode(2), b"b"));
    }

    #[test]
    fn eviction_prefers_empty_slots_before_overwriting_live_entries() {
        let c = cache();
        // One insert should never evict itself; re-searching immediately
        // after must still hit.
        for i in 0..20u32 {
            c.insert(Inode(100), format!("name-{i}").as_bytes());
        }
        assert!(c.search(Inode(100), b"name-19"));
    }
}
