//! Inode numbering and the special-inode reservations of ยง6.

use std::fmt;

/// Opaque filesystem inode identifier.
///
/// A small range at the top of the 32-bit space is reserved for synthesized
/// special files (`masterinfo`, `stats`, ...); see [`SpecialInode`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Inode(pub u32);

impl Inode {
    pub const ROOT: Inode = Inode(1);

    /// The first inode number reserved for special files.
    pub const SPECIAL_BASE: u32 = 0x7FFF_FFF0;

    #[must_use]
    pub fn is_special(self) -> bool {
        self.0 >= Self::SPECIAL_BASE
    }

    #[must_use]
    pub fn special(self) -> Option<SpecialInode> {
        SpecialInode::from_inode(self)
    }
}

impl From<u32> for Inode {
    fn from(v: u32) -> Self {
        Inode(v)
    }
}

impl fmt::Display for Inode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Reserved high-range inodes whose content is synthesized client-side (ยง4.8, ยง6).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum SpecialInode {
    Params = 0x7FFF_FFF5,
    Random = 0x7FFF_FFF4,
    MooseArt = 0x7FFF_FFF3,
    OpHistory = 0x7FFF_FFF2,
    OpLog = 0x7FFF_FFF1,
    Stats = 0x7FFF_FFF0,
    MasterInfo = 0x7FFF_FFFF,
}

impl SpecialInode {
    #[must_use]
    pub fn from_inode(inode: Inode) -> Option<Self> {
        Some(match inode.0 {
            0x7FFF_FFF5 => Self::Params,
            0x7FFF_FFF4 => Self::Random,
            0x7FFF_FFF3 => Self::MooseArt,
            0x7FFF_FFF2 => Self::OpHistory,
            0x7FFF_FFF1 => Self::OpLog,
            0x7FFF_FFF0 => Self::Stats,
            0x7FFF_FFFF => Self::MasterInfo,
            _ => return None,
        })
    }

    #[must_use]
    pub fn inode(self) -> Inode {
        Inode(self as u32)
    }

    /// True if writes to this special inode are rejected outright (ยง7 "User-visible failures").
    #[must_use]
    pub fn read_only(self) -> bool {
        !matches!(self, Self::Stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn special_base_boundary() {
        assert!(!Inode(Inode::SPECIAL_BASE - 1).is_special());
        assert!(Inode(Inode::SPECIAL_BASE).is_special());
    }

    #[test]
    fn round_trips_every_special_inode() {
        for special in [
            SpecialInode::Params,
            SpecialInode::Random,
            SpecialInode::MooseArt,
            SpecialInode::OpHistory,
            SpecialInode::OpLog,
            SpecialInode::Stats,
            SpecialInode::MasterInfo,
        ] {
            assert_eq!(SpecialInode::from_inode(special.inode()), Some(special));
        }
    }

    #[test]
    fn masterinfo_is_read_only() {
        assert!(SpecialInode::MasterInfo.read_only());
        assert!(!SpecialInode::Stats.read_only());
    }
}
