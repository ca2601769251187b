//! Hardware Abstraction Layer trait for the exo kernel
//!
//! This crate defines the HAL trait through which the kernel reaches every
//! collaborator it does not implement itself: the physical page allocator,
//! page-table primitives, the local interrupt controller, the clock, device
//! drivers and the console. It also owns the machine-level types both sides
//! agree on (addresses, page permissions, trap frames, the address-space
//! layout).
//!
//! # Platform Implementations
//!
//! - **Mock**: `exo-hal-mock`, a simulated machine for host tests
//! - **Bare Metal**: i386 paging + LAPIC (not part of this workspace)

#![no_std]
#![deny(unsafe_code)]

extern crate alloc;

use alloc::vec::Vec;
use core::fmt;

pub mod addr;
pub mod layout;
pub mod paging;
pub mod trap;

pub use addr::{Frame, VirtAddr};
pub use paging::PteFlags;
pub use trap::{PushRegs, TrapFrame, UTrapframe};

/// Index of a CPU, dense from 0.
pub type CpuId = usize;

/// Hardware Abstraction Layer trait
///
/// Implementations provide platform-specific functionality for:
/// - Physical page frames (allocation, reference counts, contents)
/// - Address spaces (creation, page insert/lookup/remove, activation)
/// - Interrupt controller (end-of-interrupt, inter-processor interrupts)
/// - Time
/// - Device interrupt bookkeeping
/// - Console output
///
/// Every method may be called concurrently from several CPUs.
///
/// # Associated Types
///
/// - `Space`: handle to one address space (a page directory on i386)
pub trait HAL: Send + Sync + 'static {
    /// Handle to an address space
    type Space: Copy + Eq + fmt::Debug + Send + Sync;

    // === Physical Frames ===

    /// Allocate a free physical frame
    ///
    /// The frame's reference count is 0 and its contents are unspecified.
    ///
    /// # Returns
    /// * `Ok(Frame)` - The allocated frame
    /// * `Err(HalError::OutOfMemory)` - No free frames
    fn frame_alloc(&self) -> Result<Frame, HalError>;

    /// Return an unreferenced frame to the allocator
    fn frame_free(&self, frame: Frame);

    /// Increment a frame's reference count
    fn frame_incref(&self, frame: Frame);

    /// Decrement a frame's reference count, freeing the frame at zero
    fn frame_decref(&self, frame: Frame);

    /// Current reference count of a frame
    fn frame_refcount(&self, frame: Frame) -> u32;

    /// Copy `data` into a frame starting at byte `offset`
    fn frame_write(&self, frame: Frame, offset: usize, data: &[u8]);

    /// Copy bytes out of a frame starting at byte `offset`
    fn frame_read(&self, frame: Frame, offset: usize, buf: &mut [u8]);

    /// Fill a frame with zeros
    fn frame_zero(&self, frame: Frame) {
        self.frame_write(frame, 0, &[0u8; layout::PGSIZE as usize]);
    }

    // === Address Spaces ===

    /// Create an address space holding only the fixed kernel-shared mappings
    ///
    /// # Returns
    /// * `Ok(Space)` - The new address space
    /// * `Err(HalError::OutOfMemory)` - No frame for the page directory
    fn space_create(&self) -> Result<Self::Space, HalError>;

    /// Destroy an address space, releasing its page tables and directory
    ///
    /// User mappings must already have been removed.
    fn space_destroy(&self, space: Self::Space);

    /// Map `frame` at `va` with `perm`
    ///
    /// Any frame already mapped at `va` is removed first. Remapping the same
    /// frame only changes the permissions. The frame's reference count is
    /// incremented on success.
    ///
    /// # Returns
    /// * `Ok(())` - Mapped
    /// * `Err(HalError::OutOfMemory)` - No frame for a page table
    fn page_insert(
        &self,
        space: Self::Space,
        frame: Frame,
        va: VirtAddr,
        perm: PteFlags,
    ) -> Result<(), HalError>;

    /// Look up the frame and permissions mapped at the page containing `va`
    fn page_lookup(&self, space: Self::Space, va: VirtAddr) -> Option<(Frame, PteFlags)>;

    /// Remove the mapping at `va`, decrementing the frame's reference count
    ///
    /// Silently does nothing when nothing is mapped.
    fn page_remove(&self, space: Self::Space, va: VirtAddr);

    /// Every mapping below `UTOP`, in ascending address order
    fn user_pages(&self, space: Self::Space) -> Vec<(VirtAddr, Frame, PteFlags)>;

    /// Load `space` (or the kernel-only space for `None`) on `cpu`
    fn activate(&self, cpu: CpuId, space: Option<Self::Space>);

    /// Faulting address of the most recent page fault on `cpu`
    fn fault_address(&self, cpu: CpuId) -> VirtAddr;

    // === Interrupt Controller ===

    /// Signal end-of-interrupt on `cpu`'s local interrupt controller
    fn eoi(&self, cpu: CpuId);

    /// Send an inter-processor interrupt with `vector` to `cpu`
    fn send_ipi(&self, cpu: CpuId, vector: u32);

    /// The CPU that booted the system and owns the clock
    fn boot_cpu(&self) -> CpuId {
        0
    }

    // === Time ===

    /// Advance the system clock by one timer period
    fn time_tick(&self);

    /// Milliseconds since boot
    fn time_msec(&self) -> u32;

    // === Devices ===

    /// Service a device interrupt (keyboard, serial, NIC, disk)
    ///
    /// # Returns
    /// * `Ok(())` - Serviced
    /// * `Err(HalError::NotSupported)` - No driver for `irq`
    fn device_interrupt(&self, irq: u32) -> Result<(), HalError>;

    // === Console ===

    /// Write text to the console
    fn console_write(&self, text: &str);
}

/// HAL errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HalError {
    /// Not enough physical memory available
    OutOfMemory,
    /// Operation not supported on this platform
    NotSupported,
    /// Invalid argument
    InvalidArgument,
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HalError::OutOfMemory => write!(f, "out of physical memory"),
            HalError::NotSupported => write!(f, "not supported"),
            HalError::InvalidArgument => write!(f, "invalid argument"),
        }
    }
}
