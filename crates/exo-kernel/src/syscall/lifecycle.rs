//! Process lifecycle syscalls
//!
//! - destroy: tear down the caller or one of its children
//! - exofork: blank child with the caller's registers
//! - set_status: Runnable / NotRunnable
//! - set_trapframe: replace saved registers (sanitized)
//! - set_pgfault_upcall: register the fault entry point

use exo_hal::{CpuId, PteFlags, TrapFrame, VirtAddr, HAL};
use exo_kernel_core::{KernelError, ProcessId, ProcessStatus};

use super::SysOutcome;
use crate::kernel::Kernel;
use crate::memory::{copy_in, user_mem_check};
use crate::trap::Flow;
use crate::{kdebug, kinfo};

pub(in crate::syscall) fn execute_destroy<H: HAL>(
    kernel: &Kernel<H>,
    cpu: CpuId,
    caller: ProcessId,
    target: ProcessId,
) -> SysOutcome {
    let target = match kernel.table.lookup(target, caller, true) {
        Ok(id) => id,
        Err(e) => return SysOutcome::Return(Err(e)),
    };
    if target == caller {
        kinfo!(kernel, "[{}] exiting gracefully", caller);
    } else {
        kinfo!(kernel, "[{}] destroying {}", caller, target);
    }
    match kernel.destroy_on(cpu, target) {
        Flow::Schedule => SysOutcome::Reschedule,
        Flow::Continue => SysOutcome::Return(Ok(0)),
    }
}

/// The child starts NotRunnable with the caller's saved registers, except
/// that its `eax` is 0 so it sees fork return 0.
pub(in crate::syscall) fn execute_exofork<H: HAL>(
    kernel: &Kernel<H>,
    caller: ProcessId,
) -> Result<u32, KernelError> {
    let frame = kernel.table.lock_live(caller)?.frame;
    let child = kernel.allocate_with(caller, ProcessStatus::NotRunnable)?;
    let mut rec = kernel.table.lock_live(child)?;
    rec.frame = frame;
    rec.frame.regs.eax = 0;
    kdebug!(kernel, "[{}] exofork -> {}", caller, child);
    Ok(child.0)
}

pub(in crate::syscall) fn execute_set_status<H: HAL>(
    kernel: &Kernel<H>,
    caller: ProcessId,
    target: ProcessId,
    status: ProcessStatus,
) -> Result<u32, KernelError> {
    if !matches!(status, ProcessStatus::Runnable | ProcessStatus::NotRunnable) {
        return Err(KernelError::InvalidArgument);
    }
    let target = kernel.table.lookup(target, caller, true)?;
    let mut rec = kernel.table.lock_live(target)?;
    // A Running process keeps running until its own CPU notices.
    if rec.status == ProcessStatus::Running && status == ProcessStatus::Runnable {
        return Ok(0);
    }
    rec.status = status;
    if status == ProcessStatus::Runnable {
        // Forced awake: the pending receive is abandoned.
        rec.mailbox.receiving = false;
    }
    Ok(0)
}

pub(in crate::syscall) fn execute_set_trapframe<H: HAL>(
    kernel: &Kernel<H>,
    caller: ProcessId,
    target: ProcessId,
    frame_va: VirtAddr,
) -> SysOutcome {
    let target = match kernel.table.lookup(target, caller, true) {
        Ok(id) => id,
        Err(e) => return SysOutcome::Return(Err(e)),
    };
    let Some(space) = kernel.space_of(caller) else {
        return SysOutcome::Return(Err(KernelError::BadProcess));
    };
    let size = TrapFrame::SIZE;
    if let Err(bad) = user_mem_check(&kernel.hal, space, frame_va, size, PteFlags::empty()) {
        return SysOutcome::Fault(bad);
    }
    let mut bytes = [0u8; TrapFrame::SIZE as usize];
    if let Err(bad) = copy_in(&kernel.hal, space, frame_va, &mut bytes) {
        return SysOutcome::Fault(bad);
    }
    let mut frame = TrapFrame::from_bytes(&bytes);
    frame.sanitize_for_user();

    match kernel.table.lock_live(target) {
        Ok(mut rec) => {
            rec.frame = frame;
            SysOutcome::Return(Ok(0))
        }
        Err(e) => SysOutcome::Return(Err(e)),
    }
}

pub(in crate::syscall) fn execute_set_pgfault_upcall<H: HAL>(
    kernel: &Kernel<H>,
    caller: ProcessId,
    target: ProcessId,
    entry: VirtAddr,
) -> Result<u32, KernelError> {
    let target = kernel.table.lookup(target, caller, true)?;
    kernel.table.lock_live(target)?.pgfault_upcall = Some(entry);
    Ok(0)
}
