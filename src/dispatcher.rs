//! C8: the dispatcher and special-file short-circuit (ยง4.8).
//!
//! Wires every callback through C1-C7 and the external `master`/`datamover`
//! traits, in the teacher's `Filesystem`-trait shape but without its
//! kernel-ABI reply encoders (see DESIGN.md). Every callback follows the
//! same shape: reject oversize names, short-circuit special inodes, consult
//! caches before the master, translate master errors through the fixed
//! table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::attr::{Attr, SetAttrMask};
use crate::config::Config;
use crate::datamover::{ChunkDataReader, ChunkDataWriter};
use crate::errors::{Errno, MasterStatus};
use crate::fdcache::FdCache;
use crate::groups::{Groups, GroupsCache};
use crate::inode::{Inode, SpecialInode};
use crate::inolen::{InodeLengthRegistry, LengthRecord};
use crate::master::MasterClient;
use crate::negentry::NegEntryCache;
use crate::openfile::locks::LockOwner;
use crate::openfile::{FileHandle, OpenFileTable, OpenMode};
use crate::oplog::{OpLog, OpLogHandle};
use crate::reply::{AttrReply, EntryReply, OpenReply, ReplyAttr, ReplyData, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite};
use crate::special::{self, KissRng};
use crate::stats::StatsTree;

const XATTR_POSIX_ACL_ACCESS: &[u8] = b"system.posix_acl_access";
const XATTR_POSIX_ACL_DEFAULT: &[u8] = b"system.posix_acl_default";
/// Never scrape supplementary groups while servicing this one (ยง9 macOS
/// group-refresh deadlock avoidance): doing so would re-enter the kernel.
const XATTR_APPLE_QUARANTINE: &[u8] = b"com.apple.quarantine";

/// Statuses a truncate retry loop treats as final rather than transient
/// (ยง7c, grounded on `original_source/mfsmount/mfs_fuse.c`'s `fs_truncate`
/// retry loop).
const TRUNCATE_TERMINAL: &[MasterStatus] = &[
    MasterStatus::Erofs,
    MasterStatus::Eacces,
    MasterStatus::Eperm,
    MasterStatus::Enoent,
    MasterStatus::Quota,
    MasterStatus::Nospace,
    MasterStatus::Chunklost,
];
const TRUNCATE_MAX_ATTEMPTS: u32 = 30;

pub const MFS_NAME_MAX: usize = 255;
/// Inferred from a 32-bit chunk index times the default 64 MiB chunk size
/// (glossary: "Chunk"/"Chunk index") — the header defining the master's real
/// constant wasn't present in the retrieved source.
pub const MAX_FILE_SIZE: u64 = 1u64 << 58;

/// The caller identity a dispatcher callback runs under.
#[derive(Clone, Copy, Debug)]
pub struct RequestCtx {
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
}

/// The seam a FUSE-style host loop calls into. Every method takes a typed
/// [`Reply`](crate::reply::Reply) that must be completed exactly once;
/// dropping it unanswered sends `EIO` (ยง "Fatal session errors" in ยง7).
pub trait Filesystem: Send + Sync + 'static {
    fn lookup(&self, ctx: RequestCtx, parent: Inode, name: &[u8], reply: ReplyEntry);
    fn getattr(&self, ctx: RequestCtx, inode: Inode, reply: ReplyAttr);
    fn setattr(&self, ctx: RequestCtx, inode: Inode, mask: SetAttrMask, attr: Attr, reply: ReplyAttr);
    fn getxattr(&self, ctx: RequestCtx, inode: Inode, name: &[u8], reply: ReplyData);
    fn setxattr(&self, ctx: RequestCtx, inode: Inode, name: &[u8], value: &[u8], reply: ReplyEmpty);
    fn open(&self, ctx: RequestCtx, inode: Inode, write: bool, read: bool, reply: ReplyOpen);
    fn read(&self, ctx: RequestCtx, inode: Inode, handle: FileHandle, offset: u64, size: u32, reply: ReplyData);
    fn write(&self, ctx: RequestCtx, inode: Inode, handle: FileHandle, offset: u64, data: &[u8], reply: ReplyWrite);
    fn flush(&self, ctx: RequestCtx, inode: Inode, handle: FileHandle, reply: ReplyEmpty);
    fn fsync(&self, ctx: RequestCtx, inode: Inode, handle: FileHandle, reply: ReplyEmpty);
    fn release(&self, ctx: RequestCtx, inode: Inode, handle: FileHandle, reply: ReplyEmpty);
    fn access(&self, ctx: RequestCtx, inode: Inode, mask: u32, reply: ReplyEmpty);
}

/// C8. One instance per mount.
pub struct Dispatcher<M: MasterClient> {
    pub config: Config,
    pub master: Arc<M>,
    pub reader: Arc<dyn ChunkDataReader>,
    pub writer: Arc<dyn ChunkDataWriter>,
    pub negentry: Arc<NegEntryCache>,
    pub fdcache: Arc<FdCache>,
    pub chunkcache: Arc<crate::chunkcache::ChunkLocationCache>,
    pub inolen: Arc<InodeLengthRegistry>,
    pub groups: Arc<GroupsCache>,
    pub openfiles: Arc<OpenFileTable>,
    pub oplog: Arc<OpLog>,
    pub stats: Arc<dyn StatsTree>,
    oplog_subscribers: Mutex<HashMap<FileHandle, OpLogHandle>>,
    /// The length record each open regular-file handle holds for its
    /// lifetime (§3's `fleng_ref`): acquired once in `open`, released once in
    /// `release`, so it survives between a handle's individual read/write
    /// calls instead of being torn down and recreated on every one.
    length_handles: Mutex<HashMap<FileHandle, Arc<LengthRecord>>>,
    /// The tool proxy's bound loopback address, if one is running, set by the
    /// host process once it binds C7 (`masterinfo` substitutes this for the
    /// real master address per ยง4.7/ยง4.8 — see [`Self::set_tool_proxy_addr`]).
    proxy_addr: Mutex<Option<(std::net::Ipv4Addr, u16)>>,
    random: KissRng,
}

impl<M: MasterClient> Dispatcher<M> {
    #[must_use]
    pub fn new(
        config: Config,
        master: Arc<M>,
        reader: Arc<dyn ChunkDataReader>,
        writer: Arc<dyn ChunkDataWriter>,
        negentry: Arc<NegEntryCache>,
        fdcache: Arc<FdCache>,
        chunkcache: Arc<crate::chunkcache::ChunkLocationCache>,
        inolen: Arc<InodeLengthRegistry>,
        groups: Arc<GroupsCache>,
        openfiles: Arc<OpenFileTable>,
        oplog: Arc<OpLog>,
        stats: Arc<dyn StatsTree>,
    ) -> Self {
        Dispatcher {
            config,
            master,
            reader,
            writer,
            negentry,
            fdcache,
            chunkcache,
            inolen,
            groups,
            openfiles,
            oplog,
            stats,
            oplog_subscribers: Mutex::new(HashMap::new()),
            length_handles: Mutex::new(HashMap::new()),
            proxy_addr: Mutex::new(None),
            random: KissRng::default(),
        }
    }

    /// Records the tool proxy's bound loopback address so that `masterinfo`
    /// reads (ยง4.7 "broadcast the chosen host:port to the master-info special
    /// inode") can substitute it. Call with `None` once the proxy tears down.
    pub fn set_tool_proxy_addr(&self, addr: Option<std::net::SocketAddrV4>) {
        *self.proxy_addr.lock() = addr.map(|a| (*a.ip(), a.port()));
    }
}

impl<M: MasterClient> Dispatcher<M> {
    fn caller_groups(&self, ctx: RequestCtx) -> Groups {
        if self.config.full_permissions {
            self.groups.get(ctx.pid, ctx.uid, ctx.gid, false)
        } else {
            Groups::single(ctx.gid)
        }
    }

    fn reject_oversize_name(name: &[u8]) -> Result<(), Errno> {
        if name.len() > MFS_NAME_MAX {
            return Err(Errno::ENAMETOOLONG);
        }
        Ok(())
    }

    fn entry_reply_from(&self, inode: Inode, attr: Attr) -> EntryReply {
        EntryReply {
            inode,
            attr,
            entry_timeout: self.config.entry_cache_timeout,
            attr_timeout: self.config.attr_cache_timeout,
        }
    }

    /// Special-inode getattr: synthesized attributes with no master round
    /// trip and never `ENOENT` (ยง7 "User-visible failures").
    fn special_attr(&self, special: SpecialInode) -> Attr {
        let mode = if special.read_only() { 0o444 } else { 0o644 };
        Attr {
            mattr: 0,
            mode,
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

    /// Serves a read against one of the seven synthesized special inodes
    /// (ยง4.8): each produces its content in full and lets the generic
    /// `offset`/`size` windowing slice it, except `oplog`/`ophistory`, which
    /// stream forward from the subscription opened in [`Filesystem::open`].
    fn read_special(&self, special: SpecialInode, handle: FileHandle, offset: u64, size: u32, reply: ReplyData) {
        let window = |bytes: Vec<u8>| -> Vec<u8> {
            let start = (offset as usize).min(bytes.len());
            let end = (start + size as usize).min(bytes.len());
            bytes[start..end].to_vec()
        };

        match special {
            SpecialInode::MasterInfo => {
                let proxy_addr = *self.proxy_addr.lock();
                reply.ok(window(special::masterinfo_blob(self.master.info(), true, proxy_addr)))
            }
            SpecialInode::Stats => reply.ok(window(self.stats.dump().into_bytes())),
            SpecialInode::Params => reply.ok(window(self.config.render_params().into_bytes())),
            SpecialInode::MooseArt => reply.ok(window(special::mooseart().into_bytes())),
            SpecialInode::Random => {
                let mut buf = vec![0u8; size as usize];
                self.random.fill(&mut buf);
                reply.ok(buf);
            }
            SpecialInode::OpLog | SpecialInode::OpHistory => {
                let oplog_handle = self.oplog_subscribers.lock().get(&handle).copied();
                match oplog_handle {
                    Some(h) => match self.oplog.get_data(h, size as usize) {
                        Some(data) => reply.ok(data),
                        None => reply.error(Errno::EIO),
                    },
                    None => reply.error(Errno::EIO),
                }
            }
        }
    }
}

impl<M: MasterClient> Filesystem for Dispatcher<M> {
    fn lookup(&self, ctx: RequestCtx, parent: Inode, name: &[u8], reply: ReplyEntry) {
        if let Err(e) = Self::reject_oversize_name(name) {
            return reply.error(e);
        }

        if self.negentry.search(parent, name) {
            debug!("lookup: negative-entry hit for {parent}/{}", String::from_utf8_lossy(name));
            return reply.error(Errno::ENOENT);
        }

        let gids = self.caller_groups(ctx);
        self.stats.inc("lookup", 1);
        match self.master.lookup(parent, name, ctx.uid, &gids) {
            Ok(result) => {
                self.negentry.remove(parent, name);
                if let Some(chunk) = result.chunk_zero.clone() {
                    self.chunkcache.insert(result.inode, 0, chunk.clone());
                    self.fdcache.insert(result.inode, ctx.uid, ctx.gid, ctx.pid, result.attr, Some(chunk));
                } else {
                    self.fdcache.insert(result.inode, ctx.uid, ctx.gid, ctx.pid, result.attr, None);
                }
                reply.ok(self.entry_reply_from(result.inode, result.attr));
            }
            Err(MasterStatus::Enoent) => {
                self.negentry.insert(parent, name);
                reply.error(Errno::ENOENT);
            }
            Err(status) => {
                self.oplog.write_line(&format!("lookup: {parent}/{} : {status:?}", String::from_utf8_lossy(name)));
                reply.error(status.to_errno());
            }
        }
    }

    fn getattr(&self, ctx: RequestCtx, inode: Inode, reply: ReplyAttr) {
        if let Some(special) = inode.special() {
            return reply.ok(AttrReply {
                attr: self.special_attr(special),
                attr_timeout: Duration::from_secs(3600),
            });
        }
        if let Some(attr) = self.fdcache.find(inode, ctx.uid, ctx.gid, ctx.pid) {
            return reply.ok(AttrReply { attr, attr_timeout: self.config.attr_cache_timeout });
        }
        let gids = self.caller_groups(ctx);
        match self.master.getattr(inode, ctx.uid, &gids) {
            Ok(attr) => reply.ok(AttrReply { attr, attr_timeout: self.config.attr_cache_timeout }),
            Err(status) => reply.error(status.to_errno()),
        }
    }

    /// Non-size fields go through one `setattr` RPC; `SIZE` is split out into
    /// its own retry-with-backoff truncate loop (ยง7c), matching the original
    /// handler's two-part shape exactly.
    fn setattr(&self, ctx: RequestCtx, inode: Inode, mask: SetAttrMask, mut attr: Attr, reply: ReplyAttr) {
        if inode.special().is_some() {
            return reply.error(Errno::EACCES);
        }
        let gids = self.caller_groups(ctx);

        let non_size = mask - SetAttrMask::SIZE;
        if !non_size.is_empty() {
            if mask.contains(SetAttrMask::MTIME) {
                // a concurrent write must not clobber the mtime we're about to set.
                let length = self.inolen.acquire(inode, 0);
                let mut writer = self.writer.open(inode, length.get());
                let _ = writer.flush_pending();
                self.inolen.release(length);
            }
            match self.master.setattr(inode, non_size, attr, ctx.uid, &gids) {
                Ok(updated) => attr = updated,
                Err(status) => return reply.error(status.to_errno()),
            }
        }

        if mask.contains(SetAttrMask::SIZE) {
            if attr.length >= MAX_FILE_SIZE {
                return reply.error(Errno::EINVAL);
            }
            let size = attr.length;

            let length = self.inolen.acquire(inode, 0);
            let mut writer = self.writer.open(inode, length.get());
            let _ = writer.flush_pending();
            self.inolen.release(length);

            // ยง7 Propagation: invalidations happen before the result is known.
            self.chunkcache.clear_inode(inode, (size / chunk_size()) as u32);
            self.fdcache.invalidate(inode);

            let mut trycnt: u32 = 0;
            let result = loop {
                match self.master.truncate(inode, false, ctx.uid, &gids, size) {
                    Ok(updated) => break Ok(updated),
                    Err(status) if TRUNCATE_TERMINAL.contains(&status) => break Err(status),
                    Err(status) => {
                        if status != MasterStatus::Locked {
                            trycnt += 1;
                            if trycnt >= TRUNCATE_MAX_ATTEMPTS {
                                break Err(status);
                            }
                        }
                        let backoff_units = if trycnt < TRUNCATE_MAX_ATTEMPTS { trycnt / 3 } else { 10 };
                        std::thread::sleep(Duration::from_secs(1 + u64::from(backoff_units)));
                    }
                }
            };

            match result {
                // fleng only moves forward on a confirmed truncate (ยง7
                // Propagation: a failed setattr(SIZE) must not update it).
                Ok(updated) => {
                    self.inolen.update_length(inode, updated.length);
                    attr = updated;
                }
                Err(status) => return reply.error(status.to_errno()),
            }
        }

        reply.ok(AttrReply { attr, attr_timeout: self.config.attr_cache_timeout });
    }

    fn getxattr(&self, ctx: RequestCtx, inode: Inode, name: &[u8], reply: ReplyData) {
        if inode.special().is_some() {
            return reply.error(Errno::ENOTSUP);
        }
        let gids = if name == XATTR_APPLE_QUARANTINE {
            self.groups.get(ctx.pid, ctx.uid, ctx.gid, true)
        } else {
            self.caller_groups(ctx)
        };
        match self.master.getxattr(inode, name, ctx.uid, &gids) {
            Ok(value) => reply.ok(value),
            Err(status) => reply.error(status.to_errno()),
        }
    }

    fn setxattr(&self, ctx: RequestCtx, inode: Inode, name: &[u8], value: &[u8], reply: ReplyEmpty) {
        if inode.special().is_some() {
            return reply.error(Errno::EACCES);
        }
        if (name == XATTR_POSIX_ACL_ACCESS || name == XATTR_POSIX_ACL_DEFAULT) && crate::acl::Acl::decode(value).is_err() {
            return reply.error(Errno::EINVAL);
        }
        let gids = self.caller_groups(ctx);
        match self.master.setxattr(inode, name, value, ctx.uid, &gids) {
            Ok(()) => reply.ok(()),
            Err(status) => reply.error(status.to_errno()),
        }
    }

    fn open(&self, ctx: RequestCtx, inode: Inode, write: bool, read: bool, reply: ReplyOpen) {
        if let Some(special) = inode.special() {
            if write && special.read_only() {
                return reply.error(Errno::EACCES);
            }
            // special inodes force direct_io/no-cache per ยง4.8 and ยง7.
            let mode = if write && read {
                OpenMode::ReadWrite
            } else if write {
                OpenMode::WriteOnly
            } else {
                OpenMode::ReadOnly
            };
            let info = self.openfiles.open(inode, mode, false);
            let handle = info.handle();
            if matches!(special, SpecialInode::OpLog | SpecialInode::OpHistory) {
                let oplog_handle = self.oplog.new_handle(special == SpecialInode::OpHistory);
                self.oplog_subscribers.lock().insert(handle, oplog_handle);
            }
            return reply.ok(OpenReply { handle, direct_io: true, keep_cache: false });
        }

        let mode = if write && read {
            OpenMode::ReadWrite
        } else if write {
            OpenMode::WriteOnly
        } else {
            OpenMode::ReadOnly
        };

        // fast path: an FD-cache hit stands in for a master opencheck, and
        // the real opencheck is ratified out-of-band (ยง4.6.3).
        if let Some((attr, chunk_zero)) = self.fdcache.acquire(inode, ctx.uid, ctx.gid, ctx.pid) {
            if let Some(chunk) = chunk_zero {
                self.chunkcache.insert(inode, 0, chunk);
            }
            let info = self.openfiles.open(inode, mode, true);
            let handle = info.handle();
            self.length_handles.lock().insert(handle, self.inolen.acquire(inode, attr.length));
            let master = self.master.clone();
            let gids = self.caller_groups(ctx);
            let info_for_thread = info.clone();
            let uid = ctx.uid;
            std::thread::spawn(move || {
                let result = master.opencheck(inode, uid, &gids, write);
                if result.is_err() {
                    warn!("fast-path open for inode {inode} failed master opencheck");
                }
                info_for_thread.rw.mark_open_ratified();
            });
            return reply.ok(OpenReply { handle, direct_io: false, keep_cache: true });
        }

        let gids = self.caller_groups(ctx);
        match self.master.opencheck(inode, ctx.uid, &gids, write) {
            Ok(()) => {
                let info = self.openfiles.open(inode, mode, false);
                let handle = info.handle();
                self.length_handles.lock().insert(handle, self.inolen.acquire(inode, 0));
                reply.ok(OpenReply { handle, direct_io: false, keep_cache: true })
            }
            Err(status) => reply.error(status.to_errno()),
        }
    }

    fn read(&self, _ctx: RequestCtx, inode: Inode, handle: FileHandle, offset: u64, size: u32, reply: ReplyData) {
        if let Some(special) = inode.special() {
            return self.read_special(special, handle, offset, size, reply);
        }
        if offset >= MAX_FILE_SIZE || offset + u64::from(size) >= MAX_FILE_SIZE {
            return reply.error(Errno::EINVAL);
        }
        let Some(info) = self.openfiles.get(handle) else {
            return reply.error(Errno::EIO);
        };
        if info.inode != inode {
            return reply.error(Errno::EIO);
        }
        if !info.mode.allows_read() {
            return reply.error(Errno::EACCES);
        }

        info.rw.wait_open_ratified();
        let _read_guard = info.rw.read_acquire();

        let Some(length) = self.length_handles.lock().get(&handle).cloned() else {
            return reply.error(Errno::EIO);
        };
        let mut writer = self.writer.open(inode, length.get());
        if let Err(e) = writer.flush_pending() {
            warn!("read: flush-before-read failed for inode {inode}: {e}");
            return reply.error(Errno::EIO);
        }

        let mut session = self.reader.open(inode, length.get());
        match session.read(offset, size) {
            Ok(data) => reply.ok(data),
            Err(_) => reply.error(Errno::EIO),
        }
    }

    fn write(&self, ctx: RequestCtx, inode: Inode, handle: FileHandle, offset: u64, data: &[u8], reply: ReplyWrite) {
        if let Some(special) = inode.special() {
            // `open` already rejected write access to every read-only special
            // file, so reaching here means `stats`: any write resets the
            // counters, matching the original's "echo > stats" convention.
            debug_assert_eq!(special, SpecialInode::Stats);
            self.stats.reset();
            return reply.ok(data.len() as u32);
        }
        if offset >= MAX_FILE_SIZE || offset + data.len() as u64 >= MAX_FILE_SIZE {
            return reply.error(Errno::EINVAL);
        }
        let Some(info) = self.openfiles.get(handle) else {
            return reply.error(Errno::EIO);
        };
        if info.inode != inode {
            return reply.error(Errno::EIO);
        }
        if !info.mode.allows_write() {
            return reply.error(Errno::EACCES);
        }

        info.rw.wait_open_ratified();
        let _write_guard = info.rw.write_acquire();

        let Some(length) = self.length_handles.lock().get(&handle).cloned() else {
            return reply.error(Errno::EIO);
        };
        let mut session = self.writer.open(inode, length.get());
        match session.write(offset, data) {
            Ok(new_length) => {
                if let Some(new_length) = new_length {
                    length.set(new_length);
                    self.inolen.update_length(inode, new_length);
                }
                self.fdcache.invalidate(inode);
                self.chunkcache.invalidate(inode, (offset / chunk_size()) as u32);
                reply.ok(data.len() as u32);
            }
            Err(_) => reply.error(Errno::EIO),
        }
        let _ = ctx;
    }

    fn flush(&self, ctx: RequestCtx, inode: Inode, handle: FileHandle, reply: ReplyEmpty) {
        let Some(info) = self.openfiles.get(handle) else {
            return reply.error(Errno::EIO);
        };
        let _write_guard = info.rw.write_acquire();
        let Some(length) = self.length_handles.lock().get(&handle).cloned() else {
            return reply.error(Errno::EIO);
        };
        let mut session = self.writer.open(inode, length.get());
        let flushed = session.flush_full();

        // unwind locks owned by this handle (ยง4.6.6); process-wide
        // extra-owner sweep is handled by the caller via extra_pid_locks.
        for owner in info.locks.posix_owners() {
            if self.master.posix_unlock(inode, owner).is_ok() {
                info.locks.remove_posix(owner);
            }
        }
        let _ = self.config.open_file.extra_pid_locks;
        let _ = ctx.pid;

        match flushed {
            Ok(()) => reply.ok(()),
            Err(_) => reply.error(Errno::EIO),
        }
    }

    fn fsync(&self, _ctx: RequestCtx, inode: Inode, handle: FileHandle, reply: ReplyEmpty) {
        let Some(info) = self.openfiles.get(handle) else {
            return reply.error(Errno::EIO);
        };
        let _write_guard = info.rw.write_acquire();
        let Some(length) = self.length_handles.lock().get(&handle).cloned() else {
            return reply.error(Errno::EIO);
        };
        let mut session = self.writer.open(inode, length.get());
        let result = session.flush_full();
        self.fdcache.invalidate(inode);
        match result {
            Ok(()) => reply.ok(()),
            Err(_) => reply.error(Errno::EIO),
        }
    }

    fn release(&self, _ctx: RequestCtx, inode: Inode, handle: FileHandle, reply: ReplyEmpty) {
        if let Some(oplog_handle) = self.oplog_subscribers.lock().remove(&handle) {
            self.oplog.release_handle(oplog_handle);
        }
        if let Some(length) = self.length_handles.lock().remove(&handle) {
            self.inolen.release(length);
        }
        let Some((posix_owners, flock_owners)) = self.openfiles.release(handle) else {
            return reply.error(Errno::EIO);
        };
        // P9: replay an unlock for every remaining owner so process death
        // can't leak an advisory lock at the master.
        for owner in posix_owners {
            let _ = self.master.posix_unlock(inode, owner);
        }
        for owner in flock_owners {
            let _ = self.master.funlock(inode, owner);
        }
        reply.ok(())
    }

    fn access(&self, _ctx: RequestCtx, inode: Inode, mask: u32, reply: ReplyEmpty) {
        if let Some(_special) = inode.special() {
            // ยง7: W/X bits always fail on special inodes, everything else succeeds.
            const W_OK: u32 = 0b010;
            const X_OK: u32 = 0b001;
            if mask & (W_OK | X_OK) != 0 {
                return reply.error(Errno::EACCES);
            }
            return reply.ok(());
        }
        reply.ok(())
    }
}

/// Issues a blocking POSIX lock request, registering the interruption
/// spawner per ยง4.6.8 so the driver can cancel it. Exposed as a free
/// function rather than a `Filesystem` method since its signature (needing
/// a cancellation token) doesn't fit the reply-based trait above without
/// threading an extra generic through every other method.
pub fn setlk_blocking<M: MasterClient>(
    master: &Arc<M>,
    info: &crate::openfile::FileInfo,
    inode: Inode,
    owner: LockOwner,
    reqid: u64,
    cancelled: &std::sync::Arc<std::sync::atomic::AtomicBool>,
) -> Result<(), Errno> {
    info.locks.add_posix(owner);

    let refs = std::sync::Arc::new(CancelRefs { master: master.clone(), inode, owner, reqid });
    let refs_for_thread = refs.clone();
    let handle = crate::openfile::interrupt::spawn_interrupt_thread(refs_for_thread);

    let result = master.posix_lock(inode, owner, reqid, true);
    drop(refs); // release our half; the spawned thread now holds the last ref once this returns
    let _ = handle.join();

    match result {
        Ok(()) => Ok(()),
        Err(status) => {
            info.locks.remove_posix(owner);
            if cancelled.load(std::sync::atomic::Ordering::SeqCst) {
                Err(Errno::EINTR)
            } else {
                Err(status.to_errno())
            }
        }
    }
}

struct CancelRefs<M: MasterClient> {
    master: Arc<M>,
    inode: Inode,
    owner: LockOwner,
    reqid: u64,
}

impl<M: MasterClient> crate::openfile::interrupt::InterruptSink for CancelRefs<M> {
    fn send_interrupt(&self) {
        self.master.posix_lock_interrupt(self.inode, self.owner, self.reqid);
    }
}

/// Issues a blocking BSD `flock` request; the same shape as
/// [`setlk_blocking`] but over the flock owner set and `flock_interrupt`
/// (ยง4.6.8 names both POSIX and BSD blocking calls as cancellable).
pub fn flock_blocking<M: MasterClient>(
    master: &Arc<M>,
    info: &crate::openfile::FileInfo,
    inode: Inode,
    owner: LockOwner,
    reqid: u64,
    cancelled: &std::sync::Arc<std::sync::atomic::AtomicBool>,
) -> Result<(), Errno> {
    info.locks.add_flock(owner);

    let refs = std::sync::Arc::new(FlockCancelRefs { master: master.clone(), inode, owner, reqid });
    let refs_for_thread = refs.clone();
    let handle = crate::openfile::interrupt::spawn_interrupt_thread(refs_for_thread);

    let result = master.flock(inode, owner, reqid, true);
    drop(refs);
    let _ = handle.join();

    match result {
        Ok(()) => Ok(()),
        Err(status) => {
            info.locks.remove_flock(owner);
            if cancelled.load(std::sync::atomic::Ordering::SeqCst) {
                Err(Errno::EINTR)
            } else {
                Err(status.to_errno())
            }
        }
    }
}

struct FlockCancelRefs<M: MasterClient> {
    master: Arc<M>,
    inode: Inode,
    owner: LockOwner,
    reqid: u64,
}

impl<M: MasterClient> crate::openfile::interrupt::InterruptSink for FlockCancelRefs<M> {
    fn send_interrupt(&self) {
        self.master.flock_interrupt(self.inode, self.owner, self.reqid);
    }
}

fn chunk_size() -> u64 {
    // MooseFS's default chunk size; not itself part of the coordination
    // core's contract, only used here to pick a chunk index to invalidate.
    64 * 1024 * 1024
}
