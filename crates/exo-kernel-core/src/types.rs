//! Core kernel types
//!
//! This module contains the fundamental types used throughout the kernel.
//! All types here are pure data - no behavior that depends on HAL.

use core::fmt;
use serde::{Deserialize, Serialize};

use exo_hal::{PteFlags, VirtAddr};

/// Bits of a process id that hold the table slot.
pub const SLOT_BITS: u32 = 12;
/// Largest process table an id can address.
pub const MAX_SLOTS: usize = 1 << SLOT_BITS;

const SLOT_MASK: u32 = (1 << SLOT_BITS) - 1;
/// Generation bits, kept small enough that every id is a positive `i32`.
const GENERATION_MASK: u32 = (1 << (31 - SLOT_BITS)) - 1;

/// Process identifier
///
/// The low [`SLOT_BITS`] bits are the table slot; the bits above are a
/// per-slot generation stamped at every allocation. A destroyed process's id
/// therefore never resolves to whatever reuses its slot. Issued ids are
/// always nonzero; 0 is reserved to mean "the caller" in system calls.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ProcessId(pub u32);

impl ProcessId {
    /// "The calling process" in system call arguments, and the parent of
    /// kernel-created processes.
    pub const SELF: ProcessId = ProcessId(0);

    pub const fn new(slot: usize, generation: u32) -> Self {
        Self(((generation & GENERATION_MASK) << SLOT_BITS) | (slot as u32 & SLOT_MASK))
    }

    pub const fn slot(self) -> usize {
        (self.0 & SLOT_MASK) as usize
    }

    pub const fn generation(self) -> u32 {
        self.0 >> SLOT_BITS
    }

    pub const fn is_self(self) -> bool {
        self.0 == 0
    }

    /// The id to issue from `slot` after `previous` (the last id issued
    /// there, or `SELF` if none). Generations wrap but skip zero.
    pub fn next_for_slot(previous: ProcessId, slot: usize) -> Self {
        let mut generation = previous.generation().wrapping_add(1) & GENERATION_MASK;
        if generation == 0 {
            generation = 1;
        }
        Self::new(slot, generation)
    }
}

impl fmt::Debug for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProcessId({:08x})", self.0)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Process status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessStatus {
    /// Slot is unused and on the free list
    #[default]
    Free,
    /// Ready to be dispatched
    Runnable,
    /// Bound to a CPU
    Running,
    /// Blocked (waiting in `ipc_recv`, or held by its parent)
    NotRunnable,
    /// Being torn down
    Dying,
}

impl ProcessStatus {
    pub const fn as_raw(self) -> u32 {
        match self {
            ProcessStatus::Free => 0,
            ProcessStatus::Runnable => 1,
            ProcessStatus::Running => 2,
            ProcessStatus::NotRunnable => 3,
            ProcessStatus::Dying => 4,
        }
    }

    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(ProcessStatus::Free),
            1 => Some(ProcessStatus::Runnable),
            2 => Some(ProcessStatus::Running),
            3 => Some(ProcessStatus::NotRunnable),
            4 => Some(ProcessStatus::Dying),
            _ => None,
        }
    }

    /// Allocated and not being torn down.
    pub const fn is_live(self) -> bool {
        !matches!(self, ProcessStatus::Free | ProcessStatus::Dying)
    }
}

/// Single-slot IPC rendezvous state of one process
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mailbox {
    /// Blocked in `ipc_recv`, willing to accept one message
    pub receiving: bool,
    /// Where the receiver wants a transferred page, if anywhere
    pub dst_va: Option<VirtAddr>,
    /// Sender of the last delivered message
    pub from: ProcessId,
    /// Value of the last delivered message
    pub value: u32,
    /// Permissions of the transferred page; empty if none was transferred
    pub perm: PteFlags,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_encoding() {
        let id = ProcessId::new(5, 3);
        assert_eq!(id.slot(), 5);
        assert_eq!(id.generation(), 3);
        assert_eq!(id.0, (3 << SLOT_BITS) | 5);
    }

    #[test]
    fn test_next_generation_differs_and_is_positive() {
        let first = ProcessId::next_for_slot(ProcessId::SELF, 0);
        assert_ne!(first, ProcessId::SELF);
        assert_eq!(first.slot(), 0);

        let second = ProcessId::next_for_slot(first, 0);
        assert_ne!(first, second);
        assert_eq!(second.slot(), 0);
        assert!((second.0 as i32) > 0);
    }

    #[test]
    fn test_generation_wraps_past_zero() {
        let last = ProcessId::new(7, GENERATION_MASK);
        assert!((last.0 as i32) > 0);
        let next = ProcessId::next_for_slot(last, 7);
        assert_eq!(next.generation(), 1);
        assert_eq!(next.slot(), 7);
    }

    #[test]
    fn test_status_raw_values() {
        for raw in 0..5 {
            let status = ProcessStatus::from_raw(raw).unwrap();
            assert_eq!(status.as_raw(), raw);
        }
        assert!(ProcessStatus::from_raw(5).is_none());
        assert!(ProcessStatus::Runnable.is_live());
        assert!(!ProcessStatus::Dying.is_live());
    }
}
