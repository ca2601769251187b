//! Virtual address-space layout shared by the kernel and user code.
//!
//! ```text
//!    4 Gig -------->  +------------------------------+
//!                     |   kernel (not user visible)  |
//!    KERNBASE ----->  +------------------------------+ 0xf0000000
//!                     |   kernel stacks / MMIO       |
//!    ULIM --------->  +------------------------------+ 0xef800000
//!                     |   page table window  R-/R-   |
//!    UVPT  -------->  +------------------------------+ 0xef400000
//!                     |   frame table window R-/R-   |
//!    UPAGES ------->  +------------------------------+ 0xef000000
//!                     |   process table window R-/R- |
//!    UTOP, UENVS -->  +------------------------------+ 0xeec00000
//!    UXSTACKTOP  /    |   user exception stack RW/RW | PGSIZE
//!                     +------------------------------+ 0xeebff000
//!                     |   empty guard page           |
//!    USTACKTOP ---->  +------------------------------+ 0xeebfe000
//!                     |   normal user stack  RW/RW   |
//!                     ~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~
//!                     |   program text, data, heap   |
//!    UTEXT -------->  +------------------------------+ 0x00800000
//!    PFTEMP ------->  |   fault-handler scratch page | 0x007ff000
//!    UTEMP -------->  +------------------------------+ 0x00400000
//!                     |   unmapped                   |
//!    0 ------------>  +------------------------------+
//! ```

/// Bytes per page.
pub const PGSIZE: u32 = 4096;
/// log2(PGSIZE)
pub const PGSHIFT: u32 = 12;
/// Bytes mapped by one page-table page.
pub const PTSIZE: u32 = 1024 * PGSIZE;

pub const KERNBASE: u32 = 0xF000_0000;
/// Top of user-visible memory; everything at or above is kernel only.
pub const ULIM: u32 = 0xEF80_0000;
pub const UVPT: u32 = ULIM - PTSIZE;
pub const UPAGES: u32 = UVPT - PTSIZE;
pub const UENVS: u32 = UPAGES - PTSIZE;

/// Top of user-writable memory. System calls never map pages at or above.
pub const UTOP: u32 = UENVS;
/// Top of the one-page user exception stack.
pub const UXSTACKTOP: u32 = UTOP;
/// Top of the normal user stack, one guard page below the exception stack.
pub const USTACKTOP: u32 = UTOP - 2 * PGSIZE;

pub const UTEXT: u32 = 2 * PTSIZE;
pub const UTEMP: u32 = PTSIZE;
/// Scratch page used by the copy-on-write fault handler.
pub const PFTEMP: u32 = UTEMP + PTSIZE - PGSIZE;

/// Rounds `addr` down to a page boundary.
pub const fn page_round_down(addr: u32) -> u32 {
    addr & !(PGSIZE - 1)
}

/// Rounds `addr` up to a page boundary, saturating at the last page.
pub const fn page_round_up(addr: u32) -> u32 {
    match addr.checked_add(PGSIZE - 1) {
        Some(a) => a & !(PGSIZE - 1),
        None => page_round_down(u32::MAX),
    }
}
