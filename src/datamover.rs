//! The chunk-server read/write data-movers boundary (ยง1 Non-goals): this
//! crate coordinates *when* a read or write happens (C6) but never moves
//! chunk bytes itself. A real deployment supplies both movers; tests can
//! substitute trivial in-memory ones.

use crate::inode::Inode;

/// A lazily-created per-inode read session, grounded on `read_data_new`/
/// `read_data_end` in `original_source/mfsclient/mfs_fuse.c`'s read path.
pub trait ChunkDataReader: Send + Sync + 'static {
    /// Opens a read session for `inode` starting from the currently known
    /// file length (used to decide whether a read can be served purely from
    /// already-fetched chunk data).
    fn open(&self, inode: Inode, current_length: u64) -> Box<dyn ReadSession>;
}

pub trait ReadSession: Send {
    /// Reads up to `size` bytes at `offset`, returning however many bytes
    /// were actually produced. May block arbitrarily long on chunk servers
    /// (ยง5 "Suspension points").
    fn read(&mut self, offset: u64, size: u32) -> std::io::Result<Vec<u8>>;
}

/// A lazily-created per-inode write session, grounded on `write_data_new`/
/// `write_data`/`write_data_flush` in the same source file.
pub trait ChunkDataWriter: Send + Sync + 'static {
    fn open(&self, inode: Inode, current_length: u64) -> Box<dyn WriteSession>;
}

pub trait WriteSession: Send {
    /// Writes `data` at `offset`; on success returns the new known length if
    /// the write extended the file.
    fn write(&mut self, offset: u64, data: &[u8]) -> std::io::Result<Option<u64>>;

    /// Drains buffered writes without necessarily fully syncing — used by
    /// the read path before a read that must observe prior writes (ยง4.6.4
    /// step 6).
    fn flush_pending(&mut self) -> std::io::Result<()>;

    /// Full synchronous flush, used by `flush`/`fsync` (ยง4.6.6).
    fn flush_full(&mut self) -> std::io::Result<()>;
}
