//! The opaque wire attribute blob (ยง3) and its accessor predicates.
//!
//! The master hands back attributes as a fixed 35-byte blob rather than a
//! structured record; callers are only meant to decode the fields they need
//! and otherwise pass the blob through unchanged. This mirrors
//! `original_source/mfsclient/mfs_fuse.c`, which keeps `attr[35]` as a raw
//! byte array threaded through `fdcache`/`dirattrcache` rather than
//! unpacked into a struct ahead of time.

use crate::inode::Inode;

pub const ATTR_SIZE: usize = 35;

/// Mode-attribute flag bits packed into byte 0 of the blob.
///
/// `original_source/mfscommon` defines these as `MATTR_*` constants; the
/// header carrying their numeric values was not present in the filtered
/// source tree, so the bit positions below are inferred from the predicate
/// names `mfs_fuse.c` tests against byte 0 and kept stable as this crate's
/// own contract.
pub mod mattr {
    pub const NOACACHE: u8 = 0x01;
    pub const NOECACHE: u8 = 0x02;
    pub const ALLOWDATACACHE: u8 = 0x04;
    pub const DIRECTMODE: u8 = 0x08;
    pub const NOXATTR: u8 = 0x10;
}

/// A decoded view over the 35-byte attribute blob.
///
/// Construction always goes through [`Attr::decode`]; callers that only need
/// to forward the blob (e.g. `fdcache`'s embedded-attr fast path) can keep
/// working with `[u8; ATTR_SIZE]` directly.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Attr {
    pub mattr: u8,
    pub mode: u16,
    pub file_type: u8,
    pub uid: u32,
    pub gid: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
    pub nlink: u32,
    pub length: u64,
    pub rdev: u64,
}

impl Attr {
    #[must_use]
    pub fn decode(blob: &[u8; ATTR_SIZE]) -> Self {
        let mattr = blob[0];
        let file_type = blob[1];
        let mode = u16::from_be_bytes([blob[2], blob[3]]);
        let uid = u32::from_be_bytes([blob[4], blob[5], blob[6], blob[7]]);
        let gid = u32::from_be_bytes([blob[8], blob[9], blob[10], blob[11]]);
        let atime = u32::from_be_bytes([blob[12], blob[13], blob[14], blob[15]]);
        let mtime = u32::from_be_bytes([blob[16], blob[17], blob[18], blob[19]]);
        let ctime = u32::from_be_bytes([blob[20], blob[21], blob[22], blob[23]]);
        let nlink = u32::from_be_bytes([blob[24], blob[25], blob[26], blob[27]]);
        // length is 4 bytes wide in this layout to fit the 35-byte budget of
        // ยง3; rdev takes the remaining bytes.
        let length = u64::from(u32::from_be_bytes([blob[28], blob[29], blob[30], blob[31]]));
        let rdev = u64::from(u32::from_be_bytes([blob[32], blob[33], blob[34], 0]));
        Attr {
            mattr,
            mode,
            file_type,
            uid,
            gid,
            atime,
            mtime,
            ctime,
            nlink,
            length,
            rdev,
        }
    }

    #[must_use]
    pub fn no_attr_cache(&self) -> bool {
        self.mattr & mattr::NOACACHE != 0
    }

    #[must_use]
    pub fn no_entry_cache(&self) -> bool {
        self.mattr & mattr::NOECACHE != 0
    }

    #[must_use]
    pub fn allow_data_cache(&self) -> bool {
        self.mattr & mattr::ALLOWDATACACHE != 0
    }

    #[must_use]
    pub fn direct_mode(&self) -> bool {
        self.mattr & mattr::DIRECTMODE != 0
    }

    #[must_use]
    pub fn no_xattr(&self) -> bool {
        self.mattr & mattr::NOXATTR != 0
    }
}

bitflags::bitflags! {
    /// Which fields of a `setattr` call the caller actually wants changed,
    /// mirroring the kernel's `FUSE_SET_ATTR_*`/the original's `SET_*_FLAG`
    /// bits. `SIZE` is handled separately by the dispatcher (ยง7c's
    /// retry-with-backoff truncate path); the others go through a single
    /// non-retried `setattr` RPC.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct SetAttrMask: u32 {
        const MODE = 0x01;
        const UID = 0x02;
        const GID = 0x04;
        const SIZE = 0x08;
        const ATIME = 0x10;
        const MTIME = 0x20;
    }
}

/// Attribute lookup paired with the inode it describes, as returned by
/// lookup/getattr style calls.
#[derive(Clone, Copy, Debug)]
pub struct InodeAttr {
    pub inode: Inode,
    pub attr: Attr,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob_with(mattr: u8, length: u32) -> [u8; ATTR_SIZE] {
        let mut b = [0u8; ATTR_SIZE];
        b[0] = mattr;
        let len_bytes = length.to_be_bytes();
        b[28..32].copy_from_slice(&len_bytes);
        b
    }

    #[test]
    fn decodes_length_field() {
        let blob = blob_with(0, 4096);
        let attr = Attr::decode(&blob);
        assert_eq!(attr.length, 4096);
    }

    #[test]
    fn predicates_read_distinct_bits() {
        let blob = blob_with(mattr::NOACACHE | mattr::ALLOWDATACACHE, 0);
        let attr = Attr::decode(&blob);
        assert!(attr.no_attr_cache());
        assert!(attr.allow_data_cache());
        assert!(!attr.no_entry_cache());
        assert!(!attr.direct_mode());
        assert!(!attr.no_xattr());
    }
}
