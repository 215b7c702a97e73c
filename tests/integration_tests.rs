//! Dispatcher-level integration tests exercising a handful of the concrete
//! scenarios from spec.md §8, against an in-memory `MasterClient` and
//! `ChunkDataReader`/`ChunkDataWriter` pair standing in for the real network
//! boundary (§1 Non-goals).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use mfsclient_core::attr::{Attr, SetAttrMask};
use mfsclient_core::chunkcache::{ChunkLocation, ChunkLocationCache};
use mfsclient_core::config::Config;
use mfsclient_core::datamover::{ChunkDataReader, ChunkDataWriter, ReadSession, WriteSession};
use mfsclient_core::dispatcher::{Dispatcher, Filesystem, RequestCtx};
use mfsclient_core::errors::{Errno, MasterStatus};
use mfsclient_core::fdcache::FdCache;
use mfsclient_core::groups::{Groups, GroupsCache};
use mfsclient_core::inode::Inode;
use mfsclient_core::inolen::InodeLengthRegistry;
use mfsclient_core::master::{LookupFlags, LookupResult, MasterClient, MasterInfo, ToolProxyCommandCodes};
use mfsclient_core::negentry::NegEntryCache;
use mfsclient_core::openfile::locks::LockOwner;
use mfsclient_core::openfile::{OpenFileConfig, OpenFileTable};
use mfsclient_core::oplog::OpLog;
use mfsclient_core::reply::Reply;
use mfsclient_core::stats::InMemoryStats;

fn attr_with_length(length: u64) -> Attr {
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
        length,
        rdev: 0,
    }
}

/// A master standing in for the real wire protocol: lookups/attrs come from
/// a fixed table, truncate can be told to return `Locked` a given number of
/// times before succeeding (exercising §7c's retry loop without a 30-second
/// test).
struct MockMaster {
    entries: Mutex<HashMap<(u32, Vec<u8>), LookupResult>>,
    attrs: Mutex<HashMap<u32, Attr>>,
    truncate_locked_remaining: AtomicU32,
    truncate_fail_terminal: AtomicBool,
}

impl MockMaster {
    fn new() -> Self {
        MockMaster {
            entries: Mutex::new(HashMap::new()),
            attrs: Mutex::new(HashMap::new()),
            truncate_locked_remaining: AtomicU32::new(0),
            truncate_fail_terminal: AtomicBool::new(false),
        }
    }

    fn seed_lookup(&self, parent: Inode, name: &[u8], result: LookupResult) {
        self.attrs.lock().unwrap().insert(result.inode.0, result.attr);
        self.entries.lock().unwrap().insert((parent.0, name.to_vec()), result);
    }
}

impl MasterClient for MockMaster {
    fn lookup(&self, parent: Inode, name: &[u8], _uid: u32, _gids: &Groups) -> Result<LookupResult, MasterStatus> {
        self.entries
            .lock()
            .unwrap()
            .get(&(parent.0, name.to_vec()))
            .cloned()
            .ok_or(MasterStatus::Enoent)
    }

    fn getattr(&self, inode: Inode, _uid: u32, _gids: &Groups) -> Result<Attr, MasterStatus> {
        self.attrs.lock().unwrap().get(&inode.0).copied().ok_or(MasterStatus::Enoent)
    }

    fn setattr(
        &self,
        inode: Inode,
        _mask: SetAttrMask,
        attr: Attr,
        _uid: u32,
        _gids: &Groups,
    ) -> Result<Attr, MasterStatus> {
        self.attrs.lock().unwrap().insert(inode.0, attr);
        Ok(attr)
    }

    fn truncate(&self, inode: Inode, _has_handle: bool, _uid: u32, _gids: &Groups, size: u64) -> Result<Attr, MasterStatus> {
        if self.truncate_fail_terminal.load(Ordering::SeqCst) {
            return Err(MasterStatus::Eacces);
        }
        if self.truncate_locked_remaining.load(Ordering::SeqCst) > 0 {
            self.truncate_locked_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(MasterStatus::Locked);
        }
        let mut attrs = self.attrs.lock().unwrap();
        let mut attr = attrs.get(&inode.0).copied().unwrap_or_else(|| attr_with_length(0));
        attr.length = size;
        attrs.insert(inode.0, attr);
        Ok(attr)
    }

    fn opencheck(&self, _inode: Inode, _uid: u32, _gids: &Groups, _write: bool) -> Result<(), MasterStatus> {
        Ok(())
    }

    fn getxattr(&self, _inode: Inode, _name: &[u8], _uid: u32, _gids: &Groups) -> Result<Vec<u8>, MasterStatus> {
        Err(MasterStatus::Enotsup)
    }

    fn setxattr(&self, _inode: Inode, _name: &[u8], _value: &[u8], _uid: u32, _gids: &Groups) -> Result<(), MasterStatus> {
        Ok(())
    }

    fn chunk_location(&self, _inode: Inode, _chindx: u32) -> Result<ChunkLocation, MasterStatus> {
        Err(MasterStatus::Enoent)
    }

    fn posix_lock(&self, _inode: Inode, _owner: LockOwner, _reqid: u64, _blocking: bool) -> Result<(), MasterStatus> {
        Ok(())
    }

    fn posix_lock_interrupt(&self, _inode: Inode, _owner: LockOwner, _reqid: u64) {}

    fn posix_unlock(&self, _inode: Inode, _owner: LockOwner) -> Result<(), MasterStatus> {
        Ok(())
    }

    fn flock(&self, _inode: Inode, _owner: LockOwner, _reqid: u64, _blocking: bool) -> Result<(), MasterStatus> {
        Ok(())
    }

    fn flock_interrupt(&self, _inode: Inode, _owner: LockOwner, _reqid: u64) {}

    fn funlock(&self, _inode: Inode, _owner: LockOwner) -> Result<(), MasterStatus> {
        Ok(())
    }

    fn custom(&self, cmd: u32, _payload: &[u8]) -> (u32, Vec<u8>) {
        (cmd, Vec::new())
    }

    fn info(&self) -> MasterInfo {
        MasterInfo { ip: [127, 0, 0, 1], port: 9421, version: 0x0104_0000 }
    }

    fn tool_proxy_commands(&self) -> ToolProxyCommandCodes {
        ToolProxyCommandCodes { register: 1, register_reply: 2, nop: 3, snapshot: 4, snapshot_reply: 5 }
    }
}

/// A trivial in-memory chunk store standing in for the external read/write
/// movers (§1 Non-goals): writes land directly in a shared buffer per inode,
/// so `flush_pending`/`flush_full` are no-ops and a read always observes the
/// latest write once the dispatcher's write-lock has been released.
#[derive(Clone, Default)]
struct MemStore {
    files: Arc<Mutex<HashMap<u32, Vec<u8>>>>,
}

struct MemReadSession {
    store: MemStore,
    inode: Inode,
}

impl ChunkDataReader for MemStore {
    fn open(&self, inode: Inode, _current_length: u64) -> Box<dyn ReadSession> {
        Box::new(MemReadSession { store: self.clone(), inode })
    }
}

impl ReadSession for MemReadSession {
    fn read(&mut self, offset: u64, size: u32) -> std::io::Result<Vec<u8>> {
        let files = self.store.files.lock().unwrap();
        let data = files.get(&self.inode.0).cloned().unwrap_or_default();
        let start = (offset as usize).min(data.len());
        let end = (start + size as usize).min(data.len());
        Ok(data[start..end].to_vec())
    }
}

struct MemWriteSession {
    store: MemStore,
    inode: Inode,
}

impl ChunkDataWriter for MemStore {
    fn open(&self, inode: Inode, _current_length: u64) -> Box<dyn WriteSession> {
        Box::new(MemWriteSession { store: self.clone(), inode })
    }
}

impl WriteSession for MemWriteSession {
    fn write(&mut self, offset: u64, data: &[u8]) -> std::io::Result<Option<u64>> {
        let mut files = self.store.files.lock().unwrap();
        let buf = files.entry(self.inode.0).or_default();
        let end = offset as usize + data.len();
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[offset as usize..end].copy_from_slice(data);
        let new_len = buf.len() as u64;
        Ok(Some(new_len))
    }

    fn flush_pending(&mut self) -> std::io::Result<()> {
        Ok(())
    }

    fn flush_full(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn make_dispatcher(master: Arc<MockMaster>, store: MemStore) -> Dispatcher<MockMaster> {
    Dispatcher::new(
        Config::default(),
        master,
        Arc::new(store.clone()),
        Arc::new(store),
        Arc::new(NegEntryCache::new(std::time::Duration::from_secs(1))),
        Arc::new(FdCache::new(std::time::Duration::from_secs(1))),
        Arc::new(ChunkLocationCache::new()),
        Arc::new(InodeLengthRegistry::new()),
        Arc::new(GroupsCache::new(std::time::Duration::from_secs(300))),
        Arc::new(OpenFileTable::new(OpenFileConfig::default())),
        Arc::new(OpLog::new(4096, 100)),
        Arc::new(InMemoryStats::default()),
    )
}

fn ctx() -> RequestCtx {
    RequestCtx { uid: 1000, gid: 1000, pid: 4242 }
}

/// Runs a `Reply<T>`-taking call synchronously and returns its outcome.
fn call<T: Send + 'static>(f: impl FnOnce(Reply<T>)) -> Result<T, Errno> {
    let (tx, rx) = mpsc::channel();
    f(Reply::new(move |r| {
        let _ = tx.send(r);
    }));
    rx.recv().expect("reply never completed")
}

#[test]
fn fd_cache_fast_open_skips_a_second_lookup() {
    let master = Arc::new(MockMaster::new());
    let dispatcher = make_dispatcher(master.clone(), MemStore::default());

    let inode = Inode(100);
    master.seed_lookup(
        Inode::ROOT,
        b"x",
        LookupResult {
            inode,
            attr: attr_with_length(0),
            lookup_flags: LookupFlags::ALLOW_READ | LookupFlags::ALLOW_WRITE,
            chunk_zero: Some(ChunkLocation { chunk_id: 7, version: 1, csdata: vec![1, 2, 3] }),
        },
    );

    let entry = call(|reply| dispatcher.lookup(ctx(), Inode::ROOT, b"x", reply)).expect("lookup succeeds");
    assert_eq!(entry.inode, inode);

    // the lookup populated C2 directly from the embedded chunk-zero data.
    assert_eq!(
        dispatcher.chunkcache.find(inode, 0),
        Some(ChunkLocation { chunk_id: 7, version: 1, csdata: vec![1, 2, 3] })
    );

    // a getattr right after lookup is served from the FD cache the lookup
    // just populated, with no second master round trip.
    master.attrs.lock().unwrap().remove(&inode.0);
    let attr = call(|reply| dispatcher.getattr(ctx(), inode, reply)).expect("getattr is served from the FD cache");
    assert_eq!(attr.attr.length, 0);

    // `open` immediately after still finds the (non-destructively read) FD-cache
    // entry and completes without a blocking master opencheck (§4.6.3).
    let open = call(|reply| dispatcher.open(ctx(), inode, true, true, reply)).expect("fast-path open succeeds");
    assert!(open.keep_cache, "an FD-cache-backed open keeps the kernel attribute cache");
}

#[test]
fn write_then_read_observes_the_write() {
    let master = Arc::new(MockMaster::new());
    let inode = Inode(200);
    master.attrs.lock().unwrap().insert(inode.0, attr_with_length(0));
    let dispatcher = make_dispatcher(master, MemStore::default());

    let open = call(|reply| dispatcher.open(ctx(), inode, true, true, reply)).expect("open succeeds");
    let handle = open.handle;

    let written = call(|reply| dispatcher.write(ctx(), inode, handle, 0, b"hello world", reply)).expect("write succeeds");
    assert_eq!(written, 11);

    let data = call(|reply| dispatcher.read(ctx(), inode, handle, 0, 11, reply)).expect("read succeeds");
    assert_eq!(&data, b"hello world");
}

#[test]
fn truncate_retries_through_transient_locked_status() {
    let master = Arc::new(MockMaster::new());
    let inode = Inode(300);
    master.attrs.lock().unwrap().insert(inode.0, attr_with_length(1000));
    // one transient Locked reply before the master actually applies the truncate.
    master.truncate_locked_remaining.store(1, Ordering::SeqCst);
    let dispatcher = make_dispatcher(master, MemStore::default());

    let updated = call(|reply| dispatcher.setattr(ctx(), inode, SetAttrMask::SIZE, attr_with_length(10), reply))
        .expect("truncate eventually succeeds");
    assert_eq!(updated.attr.length, 10);
}

#[test]
fn a_terminal_truncate_failure_leaves_fleng_unmoved() {
    let master = Arc::new(MockMaster::new());
    let inode = Inode(301);
    master.attrs.lock().unwrap().insert(inode.0, attr_with_length(1000));
    master.truncate_fail_terminal.store(true, Ordering::SeqCst);
    let dispatcher = make_dispatcher(master, MemStore::default());

    // prime the length registry the way an open handle would.
    let handle = dispatcher.inolen.acquire(inode, 1000);

    let result = call(|reply| dispatcher.setattr(ctx(), inode, SetAttrMask::SIZE, attr_with_length(5), reply));
    assert_eq!(result.unwrap_err(), Errno::EACCES);
    // §7 Propagation: a failed setattr(SIZE) must not update fleng.
    assert_eq!(handle.get(), 1000);

    dispatcher.inolen.release(handle);
}

#[test]
fn negative_entry_is_recorded_on_enoent_and_cleared_by_master_success() {
    let master = Arc::new(MockMaster::new());
    let dispatcher = make_dispatcher(master.clone(), MemStore::default());

    let err = call(|reply| dispatcher.lookup(ctx(), Inode::ROOT, b"missing", reply)).unwrap_err();
    assert_eq!(err, Errno::ENOENT);
    assert!(dispatcher.negentry.search(Inode::ROOT, b"missing"));

    // once the master learns about the name, a fresh lookup must clear the negative entry.
    master.seed_lookup(
        Inode::ROOT,
        b"missing",
        LookupResult {
            inode: Inode(7),
            attr: attr_with_length(0),
            lookup_flags: LookupFlags::ALLOW_READ,
            chunk_zero: None,
        },
    );
    let ok = call(|reply| dispatcher.lookup(ctx(), Inode::ROOT, b"missing", reply));
    assert!(ok.is_ok());
    assert!(!dispatcher.negentry.search(Inode::ROOT, b"missing"));
}
