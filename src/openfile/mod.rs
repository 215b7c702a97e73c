//! C6: per-open-file coordinator — the hardest part of this crate.
//!
//! Grounded on `original_source/mfsclient/mfs_fuse.c`'s `finfo` table
//! (roughly lines 386-620): a slot table of per-open-file records, each
//! guarded by its own reader/writer phase ([`rwlock`]), carrying POSIX/flock
//! lock-owner bookkeeping ([`locks`]), an interruption path for blocking
//! lock calls ([`interrupt`]), and on platforms that need it a delayed
//! teardown queue ([`delayed_release`]).

pub mod delayed_release;
pub mod interrupt;
pub mod locks;
pub mod rwlock;

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::inode::Inode;
use locks::LockOwners;
use rwlock::RwPhase;

/// A 32-bit handle: low 24 bits are the slot index, high 8 bits a non-zero
/// generation counter bumped on every slot reuse (ยง4.6.1). `finfo_get`
/// style validation rejects a handle whose generation doesn't match the
/// slot's current occupant, without needing a version field on every piece
/// of per-slot state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct FileHandle(u32);

const SLOT_MASK: u32 = 0x00FF_FFFF;
const GEN_SHIFT: u32 = 24;

impl FileHandle {
    fn new(slot: u32, generation: u8) -> Self {
        debug_assert!(slot <= SLOT_MASK);
        debug_assert_ne!(generation, 0);
        FileHandle((slot & SLOT_MASK) | (u32::from(generation) << GEN_SHIFT))
    }

    fn slot(self) -> usize {
        (self.0 & SLOT_MASK) as usize
    }

    fn generation(self) -> u8 {
        (self.0 >> GEN_SHIFT) as u8
    }

    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// The access mode an open handle was created with, gating which of
/// read/write are permitted against it (ยง4.6.4, ยง4.6.5).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpenMode {
    ReadWrite,
    ReadOnly,
    WriteOnly,
}

impl OpenMode {
    #[must_use]
    pub fn allows_read(self) -> bool {
        !matches!(self, Self::WriteOnly)
    }

    #[must_use]
    pub fn allows_write(self) -> bool {
        !matches!(self, Self::ReadOnly)
    }
}

/// Mount-time tunables affecting C6 (ยง9 supplemented features — runtime
/// flags, not compile-time cfgs, since both vary per deployment).
#[derive(Clone, Copy, Debug)]
pub struct OpenFileConfig {
    /// Whether a released handle's resources may linger until a background
    /// reaper confirms no I/O is still in flight (ยง4.6.9, FreeBSD quirk).
    pub delayed_release: bool,
    /// On release, also unwind POSIX locks owned by the same process id as
    /// the closing handle, not just the handle's own recorded owners
    /// (`FLUSH_EXTRA_LOCKS` in the original).
    pub extra_pid_locks: bool,
}

impl Default for OpenFileConfig {
    fn default() -> Self {
        OpenFileConfig {
            delayed_release: false,
            extra_pid_locks: false,
        }
    }
}

/// One open file's coordination state.
pub struct FileInfo {
    pub inode: Inode,
    pub mode: OpenMode,
    pub created: Instant,
    pub rw: RwPhase,
    pub locks: LockOwners,
    /// Lazily created on first read; external read-data-mover handle is kept
    /// opaque at this layer (ยง1 Non-goals).
    pub read_session: Mutex<Option<()>>,
    /// Lazily created on first write, same treatment.
    pub write_session: Mutex<Option<()>>,
    findex: FileHandle,
}

impl FileInfo {
    #[must_use]
    pub fn handle(&self) -> FileHandle {
        self.findex
    }
}

struct Slot {
    info: Option<Arc<FileInfo>>,
    generation: u8,
}

/// The global handle table: one allocation/reclamation lock, with all other
/// coordination happening per-handle (ยง5 "Shared-resource policy").
pub struct OpenFileTable {
    slots: Mutex<Vec<Slot>>,
    free: Mutex<Vec<usize>>,
    config: OpenFileConfig,
    pub delayed: delayed_release::DelayedReleaseQueue,
}

impl OpenFileTable {
    #[must_use]
    pub fn new(config: OpenFileConfig) -> Self {
        OpenFileTable {
            slots: Mutex::new(Vec::new()),
            free: Mutex::new(Vec::new()),
            config,
            delayed: delayed_release::DelayedReleaseQueue::new(),
        }
    }

    /// Allocates a new handle for `inode`. `fast_path` reflects whether the
    /// open is being completed against an FD-cache hit (ยง4.6.3): if true the
    /// record starts with `open_in_master == false` and callers must ratify
    /// it later via `FileInfo::rw.mark_open_ratified`.
    pub fn open(&self, inode: Inode, mode: OpenMode, fast_path: bool) -> Arc<FileInfo> {
        let mut slots = self.slots.lock();
        let mut free = self.free.lock();

        let (slot_idx, generation) = if let Some(idx) = free.pop() {
            let slot = &mut slots[idx];
            let mut generation = slot.generation.wrapping_add(1);
            if generation == 0 {
                generation = 1;
            }
            slot.generation = generation;
            (idx, generation)
        } else {
            slots.push(Slot { info: None, generation: 1 });
            (slots.len() - 1, 1u8)
        };

        let handle = FileHandle::new(slot_idx as u32, generation);
        let rw = if fast_path { RwPhase::new() } else { RwPhase::new_ratified() };
        let info = Arc::new(FileInfo {
            inode,
            mode,
            created: Instant::now(),
            rw,
            locks: LockOwners::default(),
            read_session: Mutex::new(None),
            write_session: Mutex::new(None),
            findex: handle,
        });
        slots[slot_idx].info = Some(info.clone());
        info
    }

    /// Validates and resolves a handle, matching `finfo_get`'s "slot valid
    /// AND generation matches" rule — a stale or reused handle is silently
    /// rejected rather than panicking.
    #[must_use]
    pub fn get(&self, handle: FileHandle) -> Option<Arc<FileInfo>> {
        let slots = self.slots.lock();
        let slot = slots.get(handle.slot())?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.info.clone()
    }

    /// Releases a handle. Returns the lock owners that must have an unlock
    /// replayed at the master (ยง4.6.7, P9) — the caller is responsible for
    /// actually issuing those RPCs since this layer doesn't speak the wire
    /// protocol.
    ///
    /// If the table is configured for delayed release, the slot is freed for
    /// reuse immediately (so handle-space doesn't leak) but the caller's
    /// resources are additionally registered with [`OpenFileTable::delayed`]
    /// so in-flight I/O draining can be confirmed before any remaining
    /// driver-visible state is torn down.
    pub fn release(&self, handle: FileHandle) -> Option<(Vec<locks::LockOwner>, Vec<locks::LockOwner>)> {
        let info = self.get(handle)?;
        let replay = info.locks.drain_for_release();

        {
            let mut slots = self.slots.lock();
            slots[handle.slot()].info = None;
        }
        self.free.lock().push(handle.slot());

        if self.config.delayed_release {
            self.delayed.defer(handle);
        }

        Some(replay)
    }

    #[must_use]
    pub fn config(&self) -> OpenFileConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_then_get_resolves_the_handle() {
        let table = OpenFileTable::new(OpenFileConfig::default());
        let info = table.open(Inode(10), OpenMode::ReadWrite, false);
        let h = info.handle();
        assert!(table.get(h).is_some());
    }

    #[test]
    fn stale_handle_after_release_is_rejected() {
        let table = OpenFileTable::new(OpenFileConfig::default());
        let info = table.open(Inode(10), OpenMode::ReadWrite, false);
        let h = info.handle();
        table.release(h);
        assert!(table.get(h).is_none());
    }

    #[test]
    fn reused_slot_gets_a_new_generation_invalidating_old_handle() {
        let table = OpenFileTable::new(OpenFileConfig::default());
        let info1 = table.open(Inode(1), OpenMode::ReadWrite, false);
        let h1 = info1.handle();
        table.release(h1);

        let info2 = table.open(Inode(2), OpenMode::ReadWrite, false);
        let h2 = info2.handle();

        assert_eq!(h1.slot(), h2.slot());
        assert_ne!(h1.generation(), h2.generation());
        assert!(table.get(h1).is_none());
        assert!(table.get(h2).is_some());
    }

    #[test]
    fn release_returns_lock_owners_for_replay() {
        let table = OpenFileTable::new(OpenFileConfig::default());
        let info = table.open(Inode(1), OpenMode::ReadWrite, false);
        info.locks.add_posix(0xA);
        info.locks.add_flock(0xB);
        let (posix, flock) = table.release(info.handle()).unwrap();
        assert_eq!(posix, vec![0xA]);
        assert_eq!(flock, vec![0xB]);
    }

    #[test]
    fn fast_path_open_starts_unratified() {
        let table = OpenFileTable::new(OpenFileConfig::default());
        let info = table.open(Inode(1), OpenMode::ReadWrite, true);
        assert!(!info.rw.open_ratified());
        info.rw.mark_open_ratified();
        assert!(info.rw.open_ratified());
    }

    #[test]
    fn slow_path_open_starts_ratified() {
        let table = OpenFileTable::new(OpenFileConfig::default());
        let info = table.open(Inode(1), OpenMode::ReadWrite, false);
        assert!(info.rw.open_ratified());
    }
}
