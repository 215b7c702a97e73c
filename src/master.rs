//! The master-RPC boundary: consumed only through this trait (ยง1 Non-goals —
//! "the remote master protocol encoder/decoder" is a collaborator, not
//! something this crate implements).
//!
//! Every wire-protocol detail (frame layout, command numbering, connection
//! management/reconnection) belongs to whatever implements [`MasterClient`]
//! in a real deployment. This crate only needs to issue requests and
//! interpret [`crate::errors::MasterStatus`] replies.

use crate::attr::Attr;
use crate::chunkcache::ChunkLocation;
use crate::errors::MasterStatus;
use crate::groups::Groups;
use crate::inode::Inode;
use crate::openfile::locks::LockOwner;

/// Result of a successful lookup/getattr-style RPC: the resolved inode, its
/// attributes, and whatever lookup flags the master attached (caching
/// policy, embedded chunk-zero data, access rights already proven).
#[derive(Clone, Debug)]
pub struct LookupResult {
    pub inode: Inode,
    pub attr: Attr,
    pub lookup_flags: LookupFlags,
    pub chunk_zero: Option<ChunkLocation>,
}

bitflags::bitflags! {
    /// Bits the master attaches to a successful lookup reply (glossary:
    /// "Lookup flags").
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct LookupFlags: u8 {
        const ALLOW_READ = 0x01;
        const ALLOW_WRITE = 0x02;
        const CHUNK_ZERO_EMBEDDED = 0x04;
        const NO_ATTR_CACHE = 0x08;
    }
}

/// Command codes the tool-proxy (C7) needs to recognize on the wire. Real
/// numeric values are owned by the master protocol implementation supplied
/// at mount time; this crate only needs to be told which ones matter.
#[derive(Clone, Copy, Debug)]
pub struct ToolProxyCommandCodes {
    pub register: u32,
    pub register_reply: u32,
    pub nop: u32,
    pub snapshot: u32,
    pub snapshot_reply: u32,
}

/// Current master connection identity, used to populate the `masterinfo`
/// special file (ยง6).
#[derive(Clone, Copy, Debug)]
pub struct MasterInfo {
    pub ip: [u8; 4],
    pub port: u16,
    pub version: u32,
}

/// The seam between this crate's coordination logic and an actual
/// connection to the metadata server. No implementation lives in this
/// crate; a real mount supplies one.
pub trait MasterClient: Send + Sync + 'static {
    fn lookup(&self, parent: Inode, name: &[u8], uid: u32, gids: &Groups) -> Result<LookupResult, MasterStatus>;
    fn getattr(&self, inode: Inode, uid: u32, gids: &Groups) -> Result<Attr, MasterStatus>;
    fn setattr(&self, inode: Inode, mask: crate::attr::SetAttrMask, attr: Attr, uid: u32, gids: &Groups) -> Result<Attr, MasterStatus>;

    /// `fs_truncate` in the original: a dedicated RPC because the dispatcher
    /// retries it in a loop that treats `MasterStatus::Locked` specially
    /// (ยง7c), unlike the rest of `setattr`.
    fn truncate(&self, inode: Inode, has_handle: bool, uid: u32, gids: &Groups, size: u64) -> Result<Attr, MasterStatus>;

    fn opencheck(&self, inode: Inode, uid: u32, gids: &Groups, write: bool) -> Result<(), MasterStatus>;

    /// xattr read/write, consulted by the dispatcher's ACL marshalling (ยง6)
    /// and by plain user xattrs alike; this crate only decodes the handful
    /// of names it has opinions about (the two ACL names).
    fn getxattr(&self, inode: Inode, name: &[u8], uid: u32, gids: &Groups) -> Result<Vec<u8>, MasterStatus>;
    fn setxattr(&self, inode: Inode, name: &[u8], value: &[u8], uid: u32, gids: &Groups) -> Result<(), MasterStatus>;

    /// Resolves the chunk location for `(inode, chindx)`, consulted on a
    /// chunk-location cache miss.
    fn chunk_location(&self, inode: Inode, chindx: u32) -> Result<ChunkLocation, MasterStatus>;

    fn posix_lock(&self, inode: Inode, owner: LockOwner, reqid: u64, blocking: bool) -> Result<(), MasterStatus>;
    fn posix_lock_interrupt(&self, inode: Inode, owner: LockOwner, reqid: u64);
    fn posix_unlock(&self, inode: Inode, owner: LockOwner) -> Result<(), MasterStatus>;

    fn flock(&self, inode: Inode, owner: LockOwner, reqid: u64, blocking: bool) -> Result<(), MasterStatus>;
    fn flock_interrupt(&self, inode: Inode, owner: LockOwner, reqid: u64);
    fn funlock(&self, inode: Inode, owner: LockOwner) -> Result<(), MasterStatus>;

    /// Forwards an opaque tool-proxy command (C7) and returns the reply
    /// command id plus payload, mirroring `fs_custom` in the original.
    fn custom(&self, cmd: u32, payload: &[u8]) -> (u32, Vec<u8>);

    fn info(&self) -> MasterInfo;
    fn tool_proxy_commands(&self) -> ToolProxyCommandCodes;
}
