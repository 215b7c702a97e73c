//! Client-side caching and I/O coordination core for a distributed
//! filesystem mount.
//!
//! This crate owns the pieces that sit between a FUSE-style kernel driver
//! loop and a remote metadata master: the negative-entry cache, chunk-location
//! cache, fd/lookup cache, inode-length registry, supplementary-groups cache,
//! per-open-file coordinator, loopback tool-proxy and the dispatcher that
//! wires all of them together. The remote master protocol, chunk-server data
//! movement, CLI/mount-option parsing and daemonization, and cluster
//! management all live outside this crate; see `master` and `datamover` for
//! the seams a real mount implementation supplies.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod acl;
pub mod attr;
pub mod chunkcache;
pub mod config;
pub mod datamover;
pub mod dispatcher;
pub mod errors;
pub mod fdcache;
pub mod groups;
pub mod inode;
pub mod inolen;
pub mod master;
pub mod negentry;
pub mod openfile;
pub mod oplog;
pub mod reply;
pub mod special;
pub mod stats;
pub mod toolproxy;

pub use attr::Attr;
pub use config::Config;
pub use dispatcher::{Dispatcher, Filesystem, RequestCtx};
pub use errors::{Errno, MasterStatus};
pub use inode::{Inode, SpecialInode};
pub use master::MasterClient;
pub use openfile::FileHandle;
