//! Address newtypes.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::layout::{PGSHIFT, PGSIZE, UTOP};

/// A 32-bit user virtual address.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VirtAddr(pub u32);

impl VirtAddr {
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const fn is_page_aligned(self) -> bool {
        self.0 % PGSIZE == 0
    }

    pub const fn page_base(self) -> Self {
        Self(self.0 & !(PGSIZE - 1))
    }

    pub const fn page_offset(self) -> usize {
        (self.0 & (PGSIZE - 1)) as usize
    }

    /// Virtual page number.
    pub const fn vpn(self) -> u32 {
        self.0 >> PGSHIFT
    }

    /// True for addresses a system call is allowed to map a page at.
    pub const fn is_user_mappable(self) -> bool {
        self.0 < UTOP && self.is_page_aligned()
    }

    pub const fn checked_add(self, bytes: u32) -> Option<Self> {
        match self.0.checked_add(bytes) {
            Some(a) => Some(Self(a)),
            None => None,
        }
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#010x})", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl From<u32> for VirtAddr {
    fn from(addr: u32) -> Self {
        Self(addr)
    }
}

/// A physical page frame number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Frame(pub u32);

impl Frame {
    /// Physical address of the first byte of the frame.
    pub const fn addr(self) -> u64 {
        (self.0 as u64) << PGSHIFT
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_helpers() {
        let va = VirtAddr::new(0x0080_1234);
        assert!(!va.is_page_aligned());
        assert_eq!(va.page_base(), VirtAddr::new(0x0080_1000));
        assert_eq!(va.page_offset(), 0x234);
        assert_eq!(va.vpn(), 0x801);
    }

    #[test]
    fn test_user_mappable() {
        assert!(VirtAddr::new(0).is_user_mappable());
        assert!(VirtAddr::new(UTOP - PGSIZE).is_user_mappable());
        assert!(!VirtAddr::new(UTOP).is_user_mappable());
        assert!(!VirtAddr::new(0x1001).is_user_mappable());
    }

    #[test]
    fn test_serde_is_transparent_number() {
        let json = serde_json::to_string(&VirtAddr::new(4096)).unwrap();
        assert_eq!(json, "4096");
    }
}
