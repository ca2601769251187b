//! The process table.
//!
//! A fixed array of records, each behind its own spin lock, plus a table lock
//! guarding the free list and the scheduler cursor.
//!
//! # Lock order
//!
//! ```text
//! table state  ->  one process record  ->  one CPU record
//! ```
//!
//! No path holds two process records at once. Operations spanning two
//! processes (page_map, IPC page transfer) pin the frame with a reference
//! while they move from one record to the other.

use alloc::boxed::Box;
use alloc::vec::Vec;

use exo_hal::layout::USTACKTOP;
use exo_hal::{CpuId, TrapFrame};
use exo_kernel_core::{KernelError, Mailbox, ProcessId, ProcessStatus};
use exo_sync::{SpinGuard, SpinLock};

use crate::process::Process;

/// Allocation and scheduling state shared by the whole table
pub(crate) struct TableState {
    /// Free slots; the next allocation pops from the end
    pub free: Vec<usize>,
    /// Slot most recently dispatched by any CPU
    pub cursor: usize,
}

pub(crate) struct ProcessTable<S> {
    slots: Box<[SpinLock<Process<S>>]>,
    state: SpinLock<TableState>,
}

impl<S: Copy + Send> ProcessTable<S> {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| SpinLock::new(Process::vacant()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            // Reversed so slot 0 is handed out first.
            state: SpinLock::new(TableState {
                free: (0..capacity).rev().collect(),
                cursor: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Record for `slot`. Only call with slots taken from issued ids.
    pub fn slot(&self, slot: usize) -> &SpinLock<Process<S>> {
        &self.slots[slot]
    }

    pub fn state(&self) -> &SpinLock<TableState> {
        &self.state
    }

    /// Takes a free slot and initializes it for a new process.
    ///
    /// `create_space` runs with the table lock held; if it fails the slot
    /// stays on the free list and nothing changes.
    pub fn allocate(
        &self,
        parent: ProcessId,
        status: ProcessStatus,
        create_space: impl FnOnce() -> Result<S, KernelError>,
    ) -> Result<ProcessId, KernelError> {
        let mut state = self.state.lock();
        let slot = *state.free.last().ok_or(KernelError::NoFreeProcess)?;
        let mut rec = self.slots[slot].lock();
        let space = create_space()?;
        state.free.pop();

        let id = ProcessId::next_for_slot(rec.id, slot);
        *rec = Process {
            id,
            parent,
            status,
            space: Some(space),
            frame: TrapFrame::user_initial(USTACKTOP),
            pgfault_upcall: None,
            mailbox: Mailbox::default(),
            runs: 0,
            resident: None,
        };
        Ok(id)
    }

    /// Locks the record holding live process `id`.
    pub fn lock_live(&self, id: ProcessId) -> Result<SpinGuard<'_, Process<S>>, KernelError> {
        let rec = self
            .slots
            .get(id.slot())
            .ok_or(KernelError::BadProcess)?
            .lock();
        if rec.holds(id) {
            Ok(rec)
        } else {
            Err(KernelError::BadProcess)
        }
    }

    /// Resolves an id named by `caller`.
    ///
    /// `SELF` means the caller. With `check_perm`, only the process itself
    /// or its immediate parent may be named.
    pub fn lookup(
        &self,
        id: ProcessId,
        caller: ProcessId,
        check_perm: bool,
    ) -> Result<ProcessId, KernelError> {
        if id.is_self() {
            return Ok(caller);
        }
        let rec = self.lock_live(id)?;
        if check_perm && id != caller && rec.parent != caller {
            return Err(KernelError::PermissionDenied);
        }
        Ok(id)
    }

    /// First phase of freeing: marks `id` Dying and returns the CPU it is
    /// loaded on, if any. Returns `None` if `id` is not live, so a process is
    /// only ever torn down once.
    pub fn begin_free(&self, id: ProcessId) -> Option<Option<CpuId>> {
        let mut rec = self.lock_live(id).ok()?;
        rec.status = ProcessStatus::Dying;
        rec.mailbox.receiving = false;
        Some(rec.resident)
    }

    /// Detaches the address space of a Dying `id` whose binding is `holder`.
    ///
    /// Only the holder gets the space, so teardown happens once and never
    /// under a CPU that still has it loaded.
    pub fn take_dying(&self, id: ProcessId, holder: Option<CpuId>) -> Option<Option<S>> {
        let mut rec = self.slots.get(id.slot())?.lock();
        if rec.id != id || rec.status != ProcessStatus::Dying || rec.resident != holder {
            return None;
        }
        rec.resident = None;
        Some(rec.space.take())
    }

    /// Second phase: returns the slot of a Dying record to the free list.
    pub fn finish_free(&self, id: ProcessId) {
        let mut state = self.state.lock();
        let mut rec = self.slots[id.slot()].lock();
        if rec.id == id && rec.status == ProcessStatus::Dying {
            rec.status = ProcessStatus::Free;
            rec.pgfault_upcall = None;
            rec.mailbox = Mailbox::default();
            state.free.push(id.slot());
        }
    }

    /// Free slots in allocation order reversed (last is next)
    pub fn free_slots(&self) -> Vec<usize> {
        self.state.lock().free.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(n: usize) -> ProcessTable<u32> {
        ProcessTable::new(n)
    }

    fn alloc(t: &ProcessTable<u32>, parent: ProcessId) -> Result<ProcessId, KernelError> {
        t.allocate(parent, ProcessStatus::Runnable, || Ok(7))
    }

    #[test]
    fn test_slot_zero_first() {
        let t = table(4);
        let a = alloc(&t, ProcessId::SELF).unwrap();
        let b = alloc(&t, ProcessId::SELF).unwrap();
        assert_eq!(a.slot(), 0);
        assert_eq!(b.slot(), 1);
        assert_eq!(a.generation(), 1);
    }

    #[test]
    fn test_table_full() {
        let t = table(2);
        alloc(&t, ProcessId::SELF).unwrap();
        alloc(&t, ProcessId::SELF).unwrap();
        assert_eq!(alloc(&t, ProcessId::SELF), Err(KernelError::NoFreeProcess));
    }

    #[test]
    fn test_space_failure_leaves_slot_free() {
        let t = table(2);
        let r = t.allocate(ProcessId::SELF, ProcessStatus::Runnable, || {
            Err(KernelError::OutOfMemory)
        });
        assert_eq!(r, Err(KernelError::OutOfMemory));
        assert_eq!(t.free_slots().len(), 2);
        assert_eq!(alloc(&t, ProcessId::SELF).unwrap().slot(), 0);
    }

    #[test]
    fn test_reuse_bumps_generation() {
        let t = table(2);
        let a = alloc(&t, ProcessId::SELF).unwrap();
        assert_eq!(t.begin_free(a), Some(None));
        assert!(t.take_dying(a, None).is_some());
        t.finish_free(a);
        let b = alloc(&t, ProcessId::SELF).unwrap();
        assert_eq!(a.slot(), b.slot());
        assert_ne!(a, b);
        assert_eq!(t.lookup(a, b, false), Err(KernelError::BadProcess));
        assert_eq!(t.lookup(b, b, false), Ok(b));
    }

    #[test]
    fn test_free_twice_is_noop() {
        let t = table(2);
        let a = alloc(&t, ProcessId::SELF).unwrap();
        assert!(t.begin_free(a).is_some());
        assert!(t.begin_free(a).is_none());
        t.finish_free(a);
        t.finish_free(a);
        assert_eq!(t.free_slots().len(), 2);
    }

    #[test]
    fn test_lookup_permissions() {
        let t = table(4);
        let parent = alloc(&t, ProcessId::SELF).unwrap();
        let child = alloc(&t, parent).unwrap();
        let stranger = alloc(&t, ProcessId::SELF).unwrap();

        assert_eq!(t.lookup(ProcessId::SELF, child, true), Ok(child));
        assert_eq!(t.lookup(child, parent, true), Ok(child));
        assert_eq!(t.lookup(child, stranger, true), Err(KernelError::PermissionDenied));
        assert_eq!(t.lookup(child, stranger, false), Ok(child));
        assert_eq!(t.lookup(parent, child, true), Err(KernelError::PermissionDenied));
        assert_eq!(
            t.lookup(ProcessId::new(4000, 1), parent, false),
            Err(KernelError::BadProcess)
        );
    }

    #[test]
    fn test_dying_is_not_nameable() {
        let t = table(2);
        let a = alloc(&t, ProcessId::SELF).unwrap();
        t.begin_free(a);
        assert_eq!(t.lookup(a, a, false), Err(KernelError::BadProcess));
    }

    #[test]
    fn test_dying_space_goes_to_its_holder() {
        let t = table(2);
        let a = alloc(&t, ProcessId::SELF).unwrap();
        t.slot(a.slot()).lock().resident = Some(1);
        assert_eq!(t.begin_free(a), Some(Some(1)));
        assert_eq!(t.take_dying(a, None), None);
        assert_eq!(t.take_dying(a, Some(0)), None);
        assert_eq!(t.take_dying(a, Some(1)), Some(Some(7)));
        assert_eq!(t.take_dying(a, Some(1)), None);
        assert!(t.slot(a.slot()).lock().resident.is_none());
    }
}
