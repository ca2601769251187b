//! Page-table entry permission bits.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

bitflags! {
    /// Permission and software bits of a user page-table entry.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PteFlags: u32 {
        const PRESENT = 0x001;
        const WRITABLE = 0x002;
        const USER = 0x004;
        const WRITE_THROUGH = 0x008;
        const CACHE_DISABLE = 0x010;
        const ACCESSED = 0x020;
        const DIRTY = 0x040;
        /// Software bit: page is shared across fork, never made copy-on-write.
        const SHARE = 0x400;
        /// Software bit: page is copy-on-write.
        const COW = 0x800;
        /// Remaining software-available bit.
        const AVAIL = 0x200;
    }
}

impl PteFlags {
    /// Bits user code may request through page-mapping system calls.
    pub const SYSCALL: Self = Self::from_bits_retain(0xE07);

    /// Minimum bits every user mapping carries.
    pub const USER_PRESENT: Self = Self::from_bits_retain(0x005);

    /// User read/write page.
    pub const USER_RW: Self = Self::from_bits_retain(0x007);

    /// True when `self` is an acceptable permission set for a system call:
    /// it includes user+present and nothing outside [`PteFlags::SYSCALL`].
    pub fn is_valid_syscall_perm(self) -> bool {
        self.contains(Self::USER_PRESENT) && Self::SYSCALL.contains(self)
    }
}

// Serialized as the raw bit pattern.
impl Serialize for PteFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for PteFlags {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u32::deserialize(deserializer).map(Self::from_bits_retain)
    }
}
