//! C5: supplementary-groups cache.
//!
//! Grounded on `original_source/mfsclient/getgroups.c`: caches the
//! supplementary group list for a `(pid, uid, gid)` triple so every
//! permission check doesn't re-scrape `/proc/<pid>/status`. `uid == 0`
//! (root) always refreshes regardless of a cache hit, since root's group
//! membership is the case callers most need to get right; `cacheonly`
//! requests never touch the OS at all and fall back to a synthetic
//! single-group list when nothing is cached, so callers on a hot path that
//! cannot block are never forced to scrape.

use std::collections::HashMap;
use std::io::BufRead;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

const HASH_SIZE: usize = 65536;

fn hash(pid: u32, uid: u32, gid: u32) -> usize {
    let h = pid
        .wrapping_mul(0x74BF_4863)
        .wrapping_add(uid)
        .wrapping_mul(0xB435_C489)
        .wrapping_add(gid);
    (h as usize) % HASH_SIZE
}

/// A resolved supplementary-group list; `gids[0]` is always the primary gid.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Groups {
    pub gids: Arc<Vec<u32>>,
}

impl Groups {
    #[must_use]
    pub fn single(gid: u32) -> Self {
        Groups { gids: Arc::new(vec![gid]) }
    }
}

struct CacheEntry {
    inserted: Instant,
    pid: u32,
    uid: u32,
    gid: u32,
    groups: Groups,
}

struct Inner {
    table: HashMap<usize, Vec<CacheEntry>>,
}

/// Scrapes the live supplementary-group list for `pid` from the OS,
/// excluding `gid` from the returned tail (it occupies slot 0 already).
/// Platform-specific, matching `get_groups`'s `#if defined(__linux__)` /
/// BSD / Solaris split; only the Linux `/proc` path is implemented here, the
/// one portable across this crate's CI targets, with the same
/// single-element fallback on any parse failure.
fn scrape_os_groups(pid: u32, gid: u32) -> Vec<u32> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(file) = std::fs::File::open(format!("/proc/{pid}/status")) {
            let reader = std::io::BufReader::new(file);
            for line in reader.lines().map_while(Result::ok) {
                if let Some(rest) = line.strip_prefix("Groups:") {
                    let mut out = vec![gid];
                    out.extend(
                        rest.split_whitespace()
                            .filter_map(|tok| tok.parse::<u32>().ok())
                            .filter(|&g| g != gid),
                    );
                    return out;
                }
            }
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = pid;
    }
    vec![gid]
}

/// C5. A single global lock guards the hash table, matching the original's
/// `glock`; entry lookups are cheap and the table is swept by a background
/// reaper rather than on every lookup.
pub struct GroupsCache {
    timeout: Duration,
    inner: Mutex<Inner>,
}

impl GroupsCache {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        GroupsCache {
            timeout,
            inner: Mutex::new(Inner { table: HashMap::new() }),
        }
    }

    fn expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.duration_since(entry.inserted) >= self.timeout
    }

    fn find_locked(&self, inner: &mut Inner, pid: u32, uid: u32, gid: u32, now: Instant) -> Option<Groups> {
        let h = hash(pid, uid, gid);
        let bucket = inner.table.get_mut(&h)?;
        bucket.retain(|e| !self.expired(e, now));
        bucket
            .iter()
            .find(|e| e.pid == pid && e.uid == uid && e.gid == gid)
            .map(|e| e.groups.clone())
    }

    fn store_locked(&self, inner: &mut Inner, pid: u32, uid: u32, gid: u32, groups: Groups, now: Instant) {
        let h = hash(pid, uid, gid);
        let bucket = inner.table.entry(h).or_default();
        bucket.retain(|e| !(e.pid == pid && e.uid == uid && e.gid == gid));
        bucket.push(CacheEntry {
            inserted: now,
            pid,
            uid,
            gid,
            groups,
        });
    }

    /// Resolves the supplementary groups for `(pid, uid, gid)`.
    ///
    /// - `uid != 0`, cache hit: returned without refreshing.
    /// - `uid == 0`: always re-scraped, even on a cache hit.
    /// - `cache_only`: never scrapes; returns a cache hit or a synthetic
    ///   single-group fallback.
    #[must_use]
    pub fn get(&self, pid: u32, uid: u32, gid: u32, cache_only: bool) -> Groups {
        let now = Instant::now();
        let cached = {
            let mut inner = self.inner.lock();
            self.find_locked(&mut inner, pid, uid, gid, now)
        };

        if cache_only {
            return cached.unwrap_or_else(|| Groups::single(gid));
        }

        if let Some(groups) = cached.filter(|_| uid != 0) {
            return groups;
        }

        let fresh = Groups {
            gids: Arc::new(scrape_os_groups(pid, gid)),
        };
        let mut inner = self.inner.lock();
        self.store_locked(&mut inner, pid, uid, gid, fresh.clone(), now);
        fresh
    }

    /// One sweep pass removing expired entries; intended to be driven by a
    /// periodic background task, matching `groups_cleanup_thread`'s sweep
    /// (that thread rotates through 16 buckets every 10ms — this crate
    /// leaves the scheduling to the embedding host and exposes the sweep as
    /// a plain method instead of spawning a thread itself).
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.table.retain(|_, bucket| {
            bucket.retain(|e| !self.expired(e, now));
            !bucket.is_empty()
        });
    }
}
