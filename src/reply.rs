//! Reply plumbing for the `Filesystem` trait (ยง4.8).
//!
//! The teacher's `ReplyHandler` wraps a `Box<dyn ReplySender>` that must be
//! consumed exactly once, sending a kernel-ABI-encoded error if the handler
//! is dropped unconsumed instead. This crate doesn't carry that ABI encoder
//! (see DESIGN.md), but keeps the same shape: a generic [`Reply<T>`] that
//! must be completed with [`Reply::ok`] or [`Reply::error`], and which sends
//! `EIO` on drop if a caller forgets to reply at all — so a dispatcher bug
//! can never leave the kernel-facing host hanging forever.

use crate::errors::Errno;

type Sink<T> = Box<dyn FnOnce(Result<T, Errno>) + Send>;

/// A reply that must be completed exactly once.
pub struct Reply<T> {
    sink: Option<Sink<T>>,
}

impl<T> Reply<T> {
    #[must_use]
    pub fn new(sink: impl FnOnce(Result<T, Errno>) + Send + 'static) -> Self {
        Reply { sink: Some(Box::new(sink)) }
    }

    pub fn ok(mut self, value: T) {
        if let Some(sink) = self.sink.take() {
            sink(Ok(value));
        }
    }

    pub fn error(mut self, errno: Errno) {
        if let Some(sink) = self.sink.take() {
            sink(Err(errno));
        }
    }
}

impl<T> Drop for Reply<T> {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink(Err(Errno::EIO));
        }
    }
}

use crate::attr::Attr;
use crate::inode::Inode;
use crate::openfile::FileHandle;

/// Reply to `lookup`/`mkdir`/`create`/`symlink`/`link`: the resolved child.
#[derive(Clone, Copy, Debug)]
pub struct EntryReply {
    pub inode: Inode,
    pub attr: Attr,
    pub entry_timeout: std::time::Duration,
    pub attr_timeout: std::time::Duration,
}

pub type ReplyEntry = Reply<EntryReply>;

/// Reply to `getattr`/`setattr`.
#[derive(Clone, Copy, Debug)]
pub struct AttrReply {
    pub attr: Attr,
    pub attr_timeout: std::time::Duration,
}

pub type ReplyAttr = Reply<AttrReply>;

/// Reply to `open`/`opendir`.
#[derive(Clone, Copy, Debug)]
pub struct OpenReply {
    pub handle: FileHandle,
    pub direct_io: bool,
    pub keep_cache: bool,
}

pub type ReplyOpen = Reply<OpenReply>;

/// Reply to `read`.
pub type ReplyData = Reply<Vec<u8>>;

/// Reply to `write`: bytes actually written.
pub type ReplyWrite = Reply<u32>;

/// Reply to calls with no payload on success (`flush`, `release`, `fsync`,
/// `unlink`, `rmdir`, ...).
pub type ReplyEmpty = Reply<()>;
