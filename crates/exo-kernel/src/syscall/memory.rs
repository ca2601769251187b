//! Memory-mapping syscalls
//!
//! - page_alloc: fresh zeroed page
//! - page_map: share a page between two processes
//! - page_unmap: remove a mapping
//!
//! All three require the caller to be the target or its parent, a page
//! aligned address below UTOP, and permissions within `PteFlags::SYSCALL`
//! that include USER | PRESENT.

use exo_hal::{Frame, PteFlags, VirtAddr, HAL};
use exo_kernel_core::{KernelError, ProcessId};

use crate::kernel::Kernel;

fn check_perm(perm: PteFlags) -> Result<(), KernelError> {
    if perm.is_valid_syscall_perm() {
        Ok(())
    } else {
        Err(KernelError::InvalidArgument)
    }
}

fn check_va(va: VirtAddr) -> Result<(), KernelError> {
    if va.is_user_mappable() {
        Ok(())
    } else {
        Err(KernelError::InvalidArgument)
    }
}

pub(in crate::syscall) fn execute_page_alloc<H: HAL>(
    kernel: &Kernel<H>,
    caller: ProcessId,
    target: ProcessId,
    va: VirtAddr,
    perm: PteFlags,
) -> Result<u32, KernelError> {
    check_va(va)?;
    check_perm(perm)?;
    let target = kernel.table.lookup(target, caller, true)?;
    let rec = kernel.table.lock_live(target)?;
    let space = rec.space.ok_or(KernelError::BadProcess)?;
    kernel.map_zeroed(space, va, perm)?;
    Ok(0)
}

/// The source frame is pinned with a reference while the destination record
/// is locked, so the source may be unmapped or destroyed meanwhile.
pub(in crate::syscall) fn execute_page_map<H: HAL>(
    kernel: &Kernel<H>,
    caller: ProcessId,
    src: ProcessId,
    src_va: VirtAddr,
    dst: ProcessId,
    dst_va: VirtAddr,
    perm: PteFlags,
) -> Result<u32, KernelError> {
    check_va(src_va)?;
    check_va(dst_va)?;
    check_perm(perm)?;
    let src = kernel.table.lookup(src, caller, true)?;
    let dst = kernel.table.lookup(dst, caller, true)?;

    let frame = pin_source(kernel, src, src_va, perm)?;
    let result = map_pinned(kernel, dst, dst_va, frame, perm);
    kernel.hal.frame_decref(frame);
    result.map(|()| 0)
}

fn pin_source<H: HAL>(
    kernel: &Kernel<H>,
    src: ProcessId,
    src_va: VirtAddr,
    perm: PteFlags,
) -> Result<Frame, KernelError> {
    let rec = kernel.table.lock_live(src)?;
    let space = rec.space.ok_or(KernelError::BadProcess)?;
    let (frame, mapped) = kernel
        .hal
        .page_lookup(space, src_va)
        .ok_or(KernelError::InvalidArgument)?;
    if perm.contains(PteFlags::WRITABLE) && !mapped.contains(PteFlags::WRITABLE) {
        return Err(KernelError::InvalidArgument);
    }
    kernel.hal.frame_incref(frame);
    Ok(frame)
}

fn map_pinned<H: HAL>(
    kernel: &Kernel<H>,
    dst: ProcessId,
    dst_va: VirtAddr,
    frame: Frame,
    perm: PteFlags,
) -> Result<(), KernelError> {
    let rec = kernel.table.lock_live(dst)?;
    let space = rec.space.ok_or(KernelError::BadProcess)?;
    kernel.hal.page_insert(space, frame, dst_va, perm)?;
    Ok(())
}

pub(in crate::syscall) fn execute_page_unmap<H: HAL>(
    kernel: &Kernel<H>,
    caller: ProcessId,
    target: ProcessId,
    va: VirtAddr,
) -> Result<u32, KernelError> {
    check_va(va)?;
    let target = kernel.table.lookup(target, caller, true)?;
    let rec = kernel.table.lock_live(target)?;
    let space = rec.space.ok_or(KernelError::BadProcess)?;
    kernel.hal.page_remove(space, va);
    Ok(0)
}
