//! The statistics counter tree boundary (ยง1 Non-goals: out of scope as a
//! subsystem, consumed only as instrumentation). `original_source/mfsclient/
//! negentrycache.c` and friends increment named counters
//! (`INSERTS`/`REMOVALS`/`SEARCH_HITS`/...) under a `stats_get_subnode`/
//! `stats_counter_inc` API this crate doesn't own. What this crate does need
//! is something to back the `stats` special file (ยง4.8), so this module
//! defines the minimal counter-tree seam plus a default in-memory
//! implementation good enough for that.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// A named, monotonically-incrementing counter tree. A real deployment may
/// back this with a richer subsystem; this crate only requires `inc`/`dump`.
pub trait StatsTree: Send + Sync + 'static {
    fn inc(&self, path: &str, by: u64);
    fn dump(&self) -> String;
    fn reset(&self);
}

/// Default in-memory counter tree: a flat map from dotted path to value,
/// rendered as `path: value` lines sorted by path for a stable `stats` read.
#[derive(Default)]
pub struct InMemoryStats {
    counters: Mutex<BTreeMap<String, AtomicU64>>,
}

impl InMemoryStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatsTree for InMemoryStats {
    fn inc(&self, path: &str, by: u64) {
        let counters = self.counters.lock();
        if let Some(counter) = counters.get(path) {
            counter.fetch_add(by, Ordering::Relaxed);
            return;
        }
        drop(counters);
        let mut counters = self.counters.lock();
        counters
            .entry(path.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(by, Ordering::Relaxed);
    }

    fn dump(&self) -> String {
        let counters = self.counters.lock();
        let mut out = String::new();
        for (path, value) in counters.iter() {
            let _ = writeln!(out, "{path}: {}", value.load(Ordering::Relaxed));
        }
        out
    }

    fn reset(&self) {
        let counters = self.counters.lock();
        for value in counters.values() {
            value.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inc_then_dump_reports_the_value() {
        let stats = InMemoryStats::new();
        stats.inc("negentry.inserts", 3);
        stats.inc("negentry.inserts", 1);
        assert_eq!(stats.dump(), "negentry.inserts: 4\n");
    }

    #[test]
    fn reset_zeroes_existing_counters_without_dropping_them() {
        let stats = InMemoryStats::new();
        stats.inc("a", 5);
        stats.reset();
        assert_eq!(stats.dump(), "a: 0\n");
    }
}
