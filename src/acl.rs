//! POSIX ACL blob marshalling (ยง6), exchanged through xattrs
//! (`system.posix_acl_access`/`system.posix_acl_default`), grounded on
//! `original_source/mfsmaster/posixacl.c`'s flat on-wire representation.

use crate::errors::Errno;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct AclTag: u16 {
        const USER = 1;
        const NAMED_USER = 2;
        const GROUP = 4;
        const NAMED_GROUP = 8;
        const MASK = 16;
        const OTHER = 32;
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct AclPerm: u16 {
        const READ = 0b100;
        const WRITE = 0b010;
        const EXECUTE = 0b001;
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AclEntry {
    pub tag: AclTag,
    pub perm: AclPerm,
    /// uid or gid for `NAMED_USER`/`NAMED_GROUP`; ignored otherwise.
    pub id: u32,
}

const BLOB_VERSION: u8 = 2;
const HEADER_LEN: usize = 4;
const ENTRY_LEN: usize = 8;

/// A decoded ACL: an ordered list of entries, as found in a single xattr
/// value.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Acl {
    pub entries: Vec<AclEntry>,
}

impl Acl {
    /// Encodes as `[version=2:1][flags=0:1][pad:2] N x [tag:u16 LE, perm:u16 LE, id:u32 LE]`.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.entries.len() * ENTRY_LEN);
        out.push(BLOB_VERSION);
        out.push(0); // flags
        out.extend_from_slice(&[0, 0]); // pad
        for entry in &self.entries {
            out.extend_from_slice(&entry.tag.bits().to_le_bytes());
            out.extend_from_slice(&entry.perm.bits().to_le_bytes());
            out.extend_from_slice(&entry.id.to_le_bytes());
        }
        out
    }

    /// Decodes a blob produced by [`encode`](Self::encode). Rejects an
    /// unrecognized version or a length that isn't a whole number of
    /// entries after the header.
    pub fn decode(blob: &[u8]) -> Result<Self, Errno> {
        if blob.len() < HEADER_LEN || blob[0] != BLOB_VERSION {
            return Err(Errno::EINVAL);
        }
        let body = &blob[HEADER_LEN..];
        if body.len() % ENTRY_LEN != 0 {
            return Err(Errno::EINVAL);
        }
        let mut entries = Vec::with_capacity(body.len() / ENTRY_LEN);
        for chunk in body.chunks_exact(ENTRY_LEN) {
            let tag_bits = u16::from_le_bytes([chunk[0], chunk[1]]);
            let perm_bits = u16::from_le_bytes([chunk[2], chunk[3]]);
            let id = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
            let tag = AclTag::from_bits(tag_bits).ok_or(Errno::EINVAL)?;
            let perm = AclPerm::from_bits_truncate(perm_bits);
            entries.push(AclEntry { tag, perm, id });
        }
        Ok(Acl { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Acl {
        Acl {
            entries: vec![
                AclEntry { tag: AclTag::USER, perm: AclPerm::READ | AclPerm::WRITE, id: 0 },
                AclEntry { tag: AclTag::NAMED_USER, perm: AclPerm::READ, id: 1000 },
                AclEntry { tag: AclTag::OTHER, perm: AclPerm::READ, id: 0 },
            ],
        }
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let acl = sample();
        let decoded = Acl::decode(&acl.encode()).unwrap();
        assert_eq!(decoded, acl);
    }

    #[test]
    fn rejects_unknown_version() {
        let mut blob = sample().encode();
        blob[0] = 9;
        assert_eq!(Acl::decode(&blob), Err(Errno::EINVAL));
    }

    #[test]
    fn rejects_truncated_entry() {
        let mut blob = sample().encode();
        blob.pop();
        assert_eq!(Acl::decode(&blob), Err(Errno::EINVAL));
    }
}
