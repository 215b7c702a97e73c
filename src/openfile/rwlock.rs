//! Per-handle reader/writer phase machine (ยง4.6.2) plus the open-ratification
//! wait (ยง4.6.3), both built on the same per-record mutex the way the
//! original shares one `rwcond`/`opencond` pair guarded by one `lock`.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

struct State {
    readers_count: u32,
    writers_count: u32,
    writing: bool,
    open_in_master: bool,
    open_waiting: u32,
}

/// Guards read/write access to one open file's data and tracks whether the
/// fast-path open has been ratified by the master yet.
pub struct RwPhase {
    state: Mutex<State>,
    rwcond: Condvar,
    opencond: Condvar,
}

/// RAII guard for a read acquisition; dropping it releases the read lock.
pub struct ReadGuard<'a> {
    phase: &'a RwPhase,
}

/// RAII guard for a write acquisition; dropping it releases the write lock.
pub struct WriteGuard<'a> {
    phase: &'a RwPhase,
}

impl Default for RwPhase {
    fn default() -> Self {
        Self::new()
    }
}

impl RwPhase {
    #[must_use]
    pub fn new() -> Self {
        RwPhase {
            state: Mutex::new(State {
                readers_count: 0,
                writers_count: 0,
                writing: false,
                open_in_master: false,
                open_waiting: 0,
            }),
            rwcond: Condvar::new(),
            opencond: Condvar::new(),
        }
    }

    /// Constructs a phase whose open is already ratified (the slow, lookup-less
    /// open path), so callers never block on [`wait_open_ratified`](Self::wait_open_ratified).
    #[must_use]
    pub fn new_ratified() -> Self {
        let phase = Self::new();
        phase.state.lock().open_in_master = true;
        phase
    }

    /// Blocks until `writing` is clear and no writer is waiting, then
    /// registers as a reader. Writer-preference: readers never jump ahead of
    /// a writer already queued.
    pub fn read_acquire(&self) -> ReadGuard<'_> {
        let mut state = self.state.lock();
        while state.writing || state.writers_count > 0 {
            self.rwcond.wait(&mut state);
        }
        state.readers_count += 1;
        ReadGuard { phase: self }
    }

    fn read_release(&self) {
        let mut state = self.state.lock();
        state.readers_count -= 1;
        if state.readers_count == 0 {
            self.rwcond.notify_all();
        }
    }

    /// Registers intent to write (bumping `writers_count` so arriving readers
    /// start blocking immediately), then waits for the record to quiesce.
    pub fn write_acquire(&self) -> WriteGuard<'_> {
        let mut state = self.state.lock();
        state.writers_count += 1;
        while state.readers_count > 0 || state.writing {
            self.rwcond.wait(&mut state);
        }
        state.writers_count -= 1;
        state.writing = true;
        WriteGuard { phase: self }
    }

    fn write_release(&self) {
        let mut state = self.state.lock();
        state.writing = false;
        self.rwcond.notify_all();
    }

    /// True if at least one reader currently holds the record (diagnostic /
    /// test hook, not used on any hot path).
    #[must_use]
    pub fn readers_count(&self) -> u32 {
        self.state.lock().readers_count
    }

    #[must_use]
    pub fn is_writing(&self) -> bool {
        self.state.lock().writing
    }

    /// Marks the master open as ratified and wakes anyone waiting on it.
    pub fn mark_open_ratified(&self) {
        let mut state = self.state.lock();
        state.open_in_master = true;
        self.opencond.notify_all();
    }

    #[must_use]
    pub fn open_ratified(&self) -> bool {
        self.state.lock().open_in_master
    }

    /// Blocks any read/write/lock call issued against a fast-path-opened
    /// handle until the background `opencheck` ratifies the open.
    pub fn wait_open_ratified(&self) {
        let mut state = self.state.lock();
        state.open_waiting += 1;
        while !state.open_in_master {
            self.opencond.wait(&mut state);
        }
        state.open_waiting -= 1;
    }

    /// Bounded variant used by tests and by callers that want to avoid an
    /// unbounded wait; returns `false` on timeout.
    #[must_use]
    pub fn wait_open_ratified_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        state.open_waiting += 1;
        let mut ok = true;
        let deadline = std::time::Instant::now() + timeout;
        while !state.open_in_master {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                ok = false;
                break;
            }
            let timed_out = self.opencond.wait_for(&mut state, remaining).timed_out();
            if timed_out {
                ok = state.open_in_master;
                break;
            }
        }
        state.open_waiting -= 1;
        ok
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.phase.read_release();
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.phase.write_release();
    }
}
