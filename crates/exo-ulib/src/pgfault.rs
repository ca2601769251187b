//! User-level page fault handling.
//!
//! The kernel reflects a user page fault onto the process's exception stack
//! and enters its upcall trampoline, which calls [`handle_cow_fault`] and
//! then resumes the faulting instruction.

use exo_hal::layout::{PFTEMP, PGSIZE, UXSTACKTOP};
use exo_hal::trap::FEC_WR;
use exo_hal::{PteFlags, UTrapframe, VirtAddr};
use exo_kernel_core::ProcessId;

use crate::error::LibError;
use crate::syscalls::Runtime;

/// Registers the caller's upcall trampoline, allocating its exception stack
/// on first use.
pub fn set_pgfault_handler<R: Runtime>(rt: &mut R) -> Result<(), LibError> {
    let xstack = VirtAddr::new(UXSTACKTOP - PGSIZE);
    if rt.pte(xstack).is_none() {
        rt.page_alloc(ProcessId::SELF, xstack, PteFlags::USER_RW)?;
    }
    let entry = rt.upcall_entry();
    rt.env_set_pgfault_upcall(ProcessId::SELF, entry)?;
    Ok(())
}

/// Resolves a write fault on a copy-on-write page by giving the caller a
/// private writable copy.
///
/// Any other fault is returned as [`LibError::UnexpectedFault`]; the
/// trampoline treats that as fatal.
pub fn handle_cow_fault<R: Runtime>(rt: &mut R, utf: &UTrapframe) -> Result<(), LibError> {
    let unexpected = LibError::UnexpectedFault {
        va: utf.fault_va,
        err: utf.err,
        eip: utf.eip,
    };
    let va = VirtAddr::new(utf.fault_va).page_base();
    let is_cow = rt.pte(va).is_some_and(|p| p.contains(PteFlags::COW));
    if utf.err & FEC_WR == 0 || !is_cow {
        return Err(unexpected);
    }

    let me = ProcessId::SELF;
    let tmp = VirtAddr::new(PFTEMP);
    rt.page_alloc(me, tmp, PteFlags::USER_RW)?;
    rt.copy_page(tmp, va)?;
    rt.page_map(me, tmp, me, va, PteFlags::USER_RW)?;
    rt.page_unmap(me, tmp)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeProcess;
    use exo_hal::layout::UTEXT;
    use exo_hal::trap::FEC_PR;
    use exo_kernel_core::{KernelError, Syscall};

    fn write_fault(va: u32) -> UTrapframe {
        UTrapframe {
            fault_va: va,
            err: FEC_WR | FEC_PR,
            eip: UTEXT + 0x20,
            ..UTrapframe::default()
        }
    }

    #[test]
    fn test_handler_allocates_stack_once() {
        let mut p = FakeProcess::new();
        set_pgfault_handler(&mut p).unwrap();
        set_pgfault_handler(&mut p).unwrap();

        let allocs = p
            .calls
            .iter()
            .filter(|c| matches!(c, Syscall::PageAlloc { .. }))
            .count();
        assert_eq!(allocs, 1);
        assert!(p.pte(VirtAddr::new(UXSTACKTOP - PGSIZE)).is_some());
    }

    #[test]
    fn test_cow_fault_copies_page() {
        let va = VirtAddr::new(UTEXT + PGSIZE);
        let mut p = FakeProcess::new().with_page(va, PteFlags::USER_PRESENT | PteFlags::COW);
        p.memory.insert(va, [7; PGSIZE as usize].into());

        handle_cow_fault(&mut p, &write_fault(va.as_u32() + 0x10)).unwrap();

        assert_eq!(p.pte(va), Some(PteFlags::USER_RW));
        assert_eq!(p.pte(VirtAddr::new(PFTEMP)), None);
        assert_eq!(p.memory[&va][0], 7);
    }

    #[test]
    fn test_read_fault_is_unexpected() {
        let va = VirtAddr::new(UTEXT + PGSIZE);
        let mut p = FakeProcess::new().with_page(va, PteFlags::USER_PRESENT | PteFlags::COW);
        let mut utf = write_fault(va.as_u32());
        utf.err = FEC_PR;

        assert!(matches!(
            handle_cow_fault(&mut p, &utf),
            Err(LibError::UnexpectedFault { .. })
        ));
        assert!(p.calls.is_empty());
    }

    #[test]
    fn test_write_to_plain_readonly_is_unexpected() {
        let va = VirtAddr::new(UTEXT);
        let mut p = FakeProcess::new().with_page(va, PteFlags::USER_PRESENT);
        assert!(matches!(
            handle_cow_fault(&mut p, &write_fault(va.as_u32())),
            Err(LibError::UnexpectedFault { .. })
        ));
    }

    #[test]
    fn test_out_of_memory_propagates() {
        let va = VirtAddr::new(UTEXT + PGSIZE);
        let mut p = FakeProcess::new().with_page(va, PteFlags::USER_PRESENT | PteFlags::COW);
        p.fail_page_alloc = Some(KernelError::OutOfMemory);
        assert_eq!(
            handle_cow_fault(&mut p, &write_fault(va.as_u32())),
            Err(LibError::Kernel(KernelError::OutOfMemory))
        );
    }
}
