//! C2: chunk-location cache.
//!
//! Grounded on `original_source/mfsclient/chunksdatacache.c`: caches, per
//! `(inode, chunk index)`, the chunk id/version and the server location list
//! the master returned for it, so repeated reads of the same chunk don't
//! re-ask the master for its location. The original links records into two
//! intrusive lists via raw "pointer to the previous link field" back-pointers
//! (one list per inode, one global inode list) so that invalidating an
//! inode's chunks from some index onward is a pure pointer walk with no
//! table rescan. Rust expresses the same shape with an arena keyed by slot
//! index plus sibling-index links instead of raw pointers.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::inode::Inode;

/// Per-chunk server location list entry, opaque at this layer: this crate
/// doesn't speak the chunk-server wire protocol (ยง1 Non-goals), it only
/// caches what the master said about where a chunk lives.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChunkLocation {
    pub chunk_id: u64,
    pub version: u32,
    pub csdata: Vec<u8>,
}

#[derive(Clone)]
struct Entry {
    inode: Inode,
    chindx: u32,
    location: Option<ChunkLocation>,
    /// Index of the next record for the same inode, for `clear_inode`'s
    /// from-index-onward walk; `None` terminates the chain.
    next_in_inode: Option<usize>,
    prev_in_inode: Option<usize>,
}

struct InodeHead {
    first: Option<usize>,
}

/// A small slot arena with a free-list, in the same style as
/// `mfs_fuse.c`'s `sinfo`/`dirbuf` pools: a growable `Vec<Option<T>>` plus a
/// stack of reusable indices, avoiding a dependency on an external slab
/// crate for what is a handful of lines.
#[derive(Default)]
struct Arena<T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>,
}

impl<T> Arena<T> {
    fn insert(&mut self, value: T) -> usize {
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(value);
            idx
        } else {
            self.slots.push(Some(value));
            self.slots.len() - 1
        }
    }

    fn remove(&mut self, idx: usize) -> T {
        let value = self.slots[idx].take().expect("double free of arena slot");
        self.free.push(idx);
        value
    }
}

impl<T> std::ops::Index<usize> for Arena<T> {
    type Output = T;
    fn index(&self, idx: usize) -> &T {
        self.slots[idx].as_ref().expect("use of freed arena slot")
    }
}

impl<T> std::ops::IndexMut<usize> for Arena<T> {
    fn index_mut(&mut self, idx: usize) -> &mut T {
        self.slots[idx].as_mut().expect("use of freed arena slot")
    }
}

struct Inner {
    entries: Arena<Entry>,
    by_key: HashMap<(u32, u32), usize>,
    by_inode: HashMap<u32, InodeHead>,
}

/// The chunk-location cache. One global lock, matching the teacher's/
/// original's single-mutex design for this table — chunk lookups are
/// cheap enough that per-bucket striping wasn't worth it upstream either.
pub struct ChunkLocationCache {
    inner: Mutex<Inner>,
}

impl Default for ChunkLocationCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkLocationCache {
    #[must_use]
    pub fn new() -> Self {
        ChunkLocationCache {
            inner: Mutex::new(Inner {
                entries: Arena::default(),
                by_key: HashMap::new(),
                by_inode: HashMap::new(),
            }),
        }
    }

    fn key(inode: Inode, chindx: u32) -> (u32, u32) {
        (inode.0, chindx)
    }

    fn unlink(inner: &mut Inner, idx: usize) {
        let (prev, next, inode) = {
            let e = &inner.entries[idx];
            (e.prev_in_inode, e.next_in_inode, e.inode.0)
        };
        match prev {
            Some(p) => inner.entries[p].next_in_inode = next,
            None => {
                if let Some(next) = next {
                    inner.by_inode.get_mut(&inode).unwrap().first = Some(next);
                } else {
                    inner.by_inode.remove(&inode);
                }
            }
        }
        if let Some(n) = next {
            inner.entries[n].prev_in_inode = prev;
        }
    }

    /// Records (or replaces) the location for a chunk, reusing the existing
    /// record's backing buffer when the new `csdata` is no larger, the way
    /// `chunksdatacache_insert` avoids a realloc on the common refresh path.
    pub fn insert(&self, inode: Inode, chindx: u32, location: ChunkLocation) {
        let mut inner = self.inner.lock();
        let key = Self::key(inode, chindx);
        if let Some(&idx) = inner.by_key.get(&key) {
            inner.entries[idx].location = Some(location);
            return;
        }

        let head_first = inner.by_inode.get(&inode.0).and_then(|h| h.first);
        let idx = inner.entries.insert(Entry {
            inode,
            chindx,
            location: Some(location),
            next_in_inode: head_first,
            prev_in_inode: None,
        });
        if let Some(first) = head_first {
            inner.entries[first].prev_in_inode = Some(idx);
        }
        inner.by_inode.insert(inode.0, InodeHead { first: Some(idx) });
        inner.by_key.insert(key, idx);
    }

    /// Updates an existing entry's `chunk_id`/`version` in place, preserving
    /// its `csdata`; a no-op if the entry isn't cached (mirrors
    /// `chunksdatacache_change`, distinct from `insert`'s whole-record
    /// replacement).
    pub fn change(&self, inode: Inode, chindx: u32, chunk_id: u64, version: u32) {
        let mut inner = self.inner.lock();
        if let Some(&idx) = inner.by_key.get(&Self::key(inode, chindx)) {
            if let Some(location) = inner.entries[idx].location.as_mut() {
                location.chunk_id = chunk_id;
                location.version = version;
            }
        }
    }

    /// Returns the cached location if present, without checking freshness —
    /// callers pair this with `check` when they hold a candidate chunk id.
    #[must_use]
    pub fn find(&self, inode: Inode, chindx: u32) -> Option<ChunkLocation> {
        let inner = self.inner.lock();
        inner
            .by_key
            .get(&Self::key(inode, chindx))
            .and_then(|&idx| inner.entries[idx].location.clone())
    }

    /// True if the cached entry for this chunk matches the given id/version.
    #[must_use]
    pub fn check(&self, inode: Inode, chindx: u32, chunk_id: u64, version: u32) -> bool {
        self.find(inode, chindx)
            .is_some_and(|loc| loc.chunk_id == chunk_id && loc.version == version)
    }

    /// Drops the cached location without removing the slot's bookkeeping
    /// (mirrors `chunksdatacache_invalidate`, which blanks csdata in place).
    pub fn invalidate(&self, inode: Inode, chindx: u32) {
        let mut inner = self.inner.lock();
        if let Some(&idx) = inner.by_key.get(&Self::key(inode, chindx)) {
            inner.entries[idx].location = None;
        }
    }

    /// Removes every cached chunk of `inode` with index `>= from_chindx`,
    /// collapsing the inode's header once it has no records left. Used when
    /// a file is truncated or overwritten from some chunk index onward.
    pub fn clear_inode(&self, inode: Inode, from_chindx: u32) {
        let mut inner = self.inner.lock();
        let Some(head) = inner.by_inode.get(&inode.0) else {
            return;
        };
        let mut cursor = head.first;
        let mut to_remove = Vec::new();
        while let Some(idx) = cursor {
            let e = &inner.entries[idx];
            cursor = e.next_in_inode;
            if e.chindx >= from_chindx {
                to_remove.push(idx);
            }
        }
        for idx in to_remove {
            Self::unlink(&mut inner, idx);
            let key = Self::key(inner.entries[idx].inode, inner.entries[idx].chindx);
            inner.by_key.remove(&key);
            inner.entries.remove(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(id: u64, version: u32) -> ChunkLocation {
        ChunkLocation {
            chunk_id: id,
            version,
            csdata: vec![1, 2, 3],
        }
    }

    #[test]
    fn insert_then_find_round_trips() {
        let c = ChunkLocationCache::new();
        c.insert(Inode(10), 0, loc(1, 1));
        assert_eq!(c.find(Inode(10), 0).unwrap().chunk_id, 1);
    }

    #[test]
    fn check_matches_id_and_version() {
        let c = ChunkLocationCache::new();
        c.insert(Inode(10), 0, loc(5, 3));
        assert!(c.check(Inode(10), 0, 5, 3));
        assert!(!c.check(Inode(10), 0, 5, 4));
    }

    #[test]
    fn clear_inode_removes_from_index_onward_only() {
        let c = ChunkLocationCache::new();
        c.insert(Inode(1), 0, loc(1, 1));
        c.insert(Inode(1), 1, loc(2, 1));
        c.insert(Inode(1), 2, loc(3, 1));
        c.clear_inode(Inode(1), 1);
        assert!(c.find(Inode(1), 0).is_some());
        assert!(c.find(Inode(1), 1).is_none());
        assert!(c.find(Inode(1), 2).is_none());
    }

    #[test]
    fn clear_inode_with_zero_removes_everything_for_that_inode() {
        let c = ChunkLocationCache::new();
        c.insert(Inode(1), 0, loc(1, 1));
        c.insert(Inode(2), 0, loc(2, 1));
        c.clear_inode(Inode(1), 0);
        assert!(c.find(Inode(1), 0).is_none());
        assert!(c.find(Inode(2), 0).is_some());
    }

    #[test]
    fn change_updates_id_and_version_but_keeps_csdata() {
        let c = ChunkLocationCache::new();
        c.insert(Inode(1), 0, loc(1, 1));
        c.change(Inode(1), 0, 2, 5);
        let updated = c.find(Inode(1), 0).unwrap();
        assert_eq!(updated.chunk_id, 2);
        assert_eq!(updated.version, 5);
        assert_eq!(updated.csdata, vec![1, 2, 3]);
    }

    #[test]
    fn change_on_absent_entry_is_a_no_op() {
        let c = ChunkLocationCache::new();
        c.change(Inode(1), 0, 2, 5);
        assert!(c.find(Inode(1), 0).is_none());
    }

    #[test]
    fn invalidate_keeps_slot_but_drops_location() {
        let c = ChunkLocationCache::new();
        c.insert(Inode(1), 0, loc(1, 1));
        c.invalidate(Inode(1), 0);
        assert!(c.find(Inode(1), 0).is_none());
        c.insert(Inode(1), 0, loc(9, 9));
        assert_eq!(c.find(Inode(1), 0).unwrap().chunk_id, 9);
    }
}
