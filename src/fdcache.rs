//! C3: FD / lookup cache.
//!
//! Grounded on `original_source/mfsclient/fdcache.c`: a short-TTL cache
//! keyed on `(inode, uid, gid, pid)`, used to skip a redundant master lookup
//! immediately after an `open()` whose `lookup()` already proved the caller
//! may access the file. Optionally carries the chunk-zero location embedded
//! at insert time (`LOOKUP_CHUNK_ZERO_DATA`), which callers inject into the
//! chunk-location cache on acquire instead of issuing a second round trip.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::attr::Attr;
use crate::chunkcache::ChunkLocation;
use crate::inode::Inode;

const HASH_SIZE: usize = 1024;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

fn bucket_of(inode: Inode) -> usize {
    (inode.0 as usize) % HASH_SIZE
}

#[derive(Clone)]
struct Entry {
    created: Instant,
    uid: u32,
    gid: u32,
    pid: u32,
    inode: Inode,
    attr: Attr,
    chunk_zero: Option<ChunkLocation>,
}

struct Bucket {
    entries: Vec<Entry>,
}

impl Default for Bucket {
    fn default() -> Self {
        Bucket { entries: Vec::new() }
    }
}

/// The per-open fd/lookup cache. One mutex per bucket, matching the
/// teacher-grounded original's `hashlock[FDCACHE_HASHSIZE]` striping so a
/// burst of opens on different inodes doesn't serialize behind one lock.
pub struct FdCache {
    timeout: Duration,
    buckets: Vec<Mutex<Bucket>>,
}

impl FdCache {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        FdCache {
            timeout,
            buckets: (0..HASH_SIZE).map(|_| Mutex::new(Bucket::default())).collect(),
        }
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        now.duration_since(entry.created) >= self.timeout
    }

    /// Caches that `(inode, uid, gid, pid)` was just authorized, opportunistically
    /// evicting expired or superseded entries from the bucket while scanning —
    /// mirroring `fdcache_insert`'s combined insert+sweep pass.
    pub fn insert(&self, inode: Inode, uid: u32, gid: u32, pid: u32, attr: Attr, chunk_zero: Option<ChunkLocation>) {
        let now = Instant::now();
        let mut bucket = self.buckets[bucket_of(inode)].lock();
        bucket.entries.retain(|e| {
            !self.is_expired(e, now) && !(e.inode == inode && e.uid == uid && e.gid == gid && e.pid == pid)
        });
        bucket.entries.push(Entry {
            created: now,
            uid,
            gid,
            pid,
            inode,
            attr,
            chunk_zero,
        });
    }

    /// Non-destructive probe: returns the cached attributes if a fresh,
    /// matching entry exists, without consuming it.
    #[must_use]
    pub fn find(&self, inode: Inode, uid: u32, gid: u32, pid: u32) -> Option<Attr> {
        let now = Instant::now();
        let bucket = self.buckets[bucket_of(inode)].lock();
        bucket
            .entries
            .iter()
            .find(|e| e.inode == inode && e.uid == uid && e.gid == gid && e.pid == pid && !self.is_expired(e, now))
            .map(|e| e.attr)
    }

    /// Consumes the matching entry (if any) and returns its embedded
    /// chunk-zero location for the caller to inject into the chunk-location
    /// cache, mirroring `fdcache_acquire` + `fdcache_inject_chunkdata`.
    #[must_use]
    pub fn acquire(&self, inode: Inode, uid: u32, gid: u32, pid: u32) -> Option<(Attr, Option<ChunkLocation>)> {
        let now = Instant::now();
        let mut bucket = self.buckets[bucket_of(inode)].lock();
        let pos = bucket
            .entries
            .iter()
            .position(|e| e.inode == inode && e.uid == uid && e.gid == gid && e.pid == pid && !self.is_expired(e, now))?;
        let entry = bucket.entries.remove(pos);
        Some((entry.attr, entry.chunk_zero))
    }

    /// Drops every cached entry for `inode`, e.g. after a write invalidates
    /// its attributes.
    pub fn invalidate(&self, inode: Inode) {
        let mut bucket = self.buckets[bucket_of(inode)].lock();
        bucket.entries.retain(|e| e.inode != inode);
    }
}

impl Default for FdCache {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr() -> Attr {
        Attr {
            mattr: 0,
            mode: 0o644,
            file_type: 0,
            uid: 0,
            gid: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
            nlink: 1,
            length: 0,
            rdev: 0,
        }
    }

    #[test]
    fn insert_then_find_matches_full_key() {
        let c = FdCache::new(Duration::from_secs(60));
        c.insert(Inode(1), 100, 100, 42, attr(), None);
        assert!(c.find(Inode(1), 100, 100, 42).is_some());
        assert!(c.find(Inode(1), 100, 100, 43).is_none());
    }

    #[test]
    fn acquire_consumes_the_entry() {
        let c = FdCache::new(Duration::from_secs(60));
        c.insert(Inode(1), 100, 100, 42, attr(), None);
        assert!(c.acquire(Inode(1), 100, 100, 42).is_some());
        assert!(c.find(Inode(1), 100, 100, 42).is_none());
    }

    #[test]
    fn expired_entries_are_not_returned() {
        let c = FdCache::new(Duration::from_millis(0));
        c.insert(Inode(1), 100, 100, 42, attr(), None);
        std::thread::sleep(Duration::from_millis(2));
        assert!(c.find(Inode(1), 100, 100, 42).is_none());
    }

    #[test]
    fn invalidate_drops_all_entries_for_inode() {
        let c = FdCache::new(Duration::from_secs(60));
        c.insert(Inode(1), 100, 100, 1, attr(), None);
        c.insert(Inode(1), 200, 200, 2, attr(), None);
        c.invalidate(Inode(1));
        assert!(c.find(Inode(1), 100, 100, 1).is_none());
        assert!(c.find(Inode(1), 200, 200, 2).is_none());
    }

    #[test]
    fn acquire_returns_embedded_chunk_zero_data() {
        let c = FdCache::new(Duration::from_secs(60));
        let loc = ChunkLocation { chunk_id: 7, version: 1, csdata: vec![9] };
        c.insert(Inode(1), 100, 100, 1, attr(), Some(loc.clone()));
        let (_, chunk) = c.acquire(Inode(1), 100, 100, 1).unwrap();
        assert_eq!(chunk, Some(loc));
    }
}
