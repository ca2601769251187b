//! Typed system calls.
//!
//! A process implements [`Syscalls::syscall`] as its trap instruction; the
//! provided methods encode arguments and decode results.

use alloc::vec::Vec;

use exo_hal::{PteFlags, VirtAddr};
use exo_kernel_core::{decode_result, KernelError, Mailbox, ProcessId, ProcessStatus, Syscall};

use crate::error::LibError;
use crate::fork::Fork;

fn unit(ret: i32) -> Result<(), KernelError> {
    decode_result(ret).map(|_| ())
}

pub trait Syscalls {
    /// Trap into the kernel; returns the raw `eax`.
    fn syscall(&mut self, call: Syscall) -> i32;

    fn cputs(&mut self, va: VirtAddr, len: u32) -> Result<(), KernelError> {
        unit(self.syscall(Syscall::Cputs { va, len }))
    }

    fn getenvid(&mut self) -> ProcessId {
        ProcessId(self.syscall(Syscall::GetProcessId) as u32)
    }

    fn env_destroy(&mut self, target: ProcessId) -> Result<(), KernelError> {
        unit(self.syscall(Syscall::Destroy { target }))
    }

    fn yield_cpu(&mut self) {
        self.syscall(Syscall::Yield);
    }

    /// Returns twice: [`Fork::Parent`] in the caller and [`Fork::Child`] in
    /// the new process once it runs.
    fn exofork(&mut self) -> Result<Fork, KernelError> {
        Fork::from_return(self.syscall(Syscall::Exofork))
    }

    fn env_set_status(
        &mut self,
        target: ProcessId,
        status: ProcessStatus,
    ) -> Result<(), KernelError> {
        unit(self.syscall(Syscall::SetStatus { target, status }))
    }

    fn env_set_trapframe(
        &mut self,
        target: ProcessId,
        frame_va: VirtAddr,
    ) -> Result<(), KernelError> {
        unit(self.syscall(Syscall::SetTrapframe { target, frame_va }))
    }

    fn env_set_pgfault_upcall(
        &mut self,
        target: ProcessId,
        entry: VirtAddr,
    ) -> Result<(), KernelError> {
        unit(self.syscall(Syscall::SetPgfaultUpcall { target, entry }))
    }

    fn page_alloc(
        &mut self,
        target: ProcessId,
        va: VirtAddr,
        perm: PteFlags,
    ) -> Result<(), KernelError> {
        unit(self.syscall(Syscall::PageAlloc { target, va, perm }))
    }

    fn page_map(
        &mut self,
        src: ProcessId,
        src_va: VirtAddr,
        dst: ProcessId,
        dst_va: VirtAddr,
        perm: PteFlags,
    ) -> Result<(), KernelError> {
        unit(self.syscall(Syscall::PageMap {
            src,
            src_va,
            dst,
            dst_va,
            perm,
        }))
    }

    fn page_unmap(&mut self, target: ProcessId, va: VirtAddr) -> Result<(), KernelError> {
        unit(self.syscall(Syscall::PageUnmap { target, va }))
    }

    /// One delivery attempt. `Ok(true)` if a page was mapped into the
    /// receiver.
    fn ipc_try_send(
        &mut self,
        target: ProcessId,
        value: u32,
        src_va: Option<VirtAddr>,
        perm: PteFlags,
    ) -> Result<bool, KernelError> {
        decode_result(self.syscall(Syscall::IpcTrySend {
            target,
            value,
            src_va,
            perm,
        }))
        .map(|mapped| mapped == 1)
    }

    /// Blocks until a message arrives. The message itself is read from the
    /// mailbox afterwards; see [`crate::ipc_recv`].
    fn ipc_wait(&mut self, dst_va: Option<VirtAddr>) -> Result<(), KernelError> {
        unit(self.syscall(Syscall::IpcRecv { dst_va }))
    }

    fn time_msec(&mut self) -> u32 {
        self.syscall(Syscall::TimeMsec) as u32
    }
}

/// What a process can see of itself without a system call: its page table
/// through the read-only user mapping, its own memory, and its own process
/// record.
pub trait Runtime: Syscalls {
    /// Permissions of the caller's mapping at `va`, if any
    fn pte(&self, va: VirtAddr) -> Option<PteFlags>;

    /// Every mapped page below `UTOP`, ascending
    fn mapped_pages(&self) -> Vec<(VirtAddr, PteFlags)>;

    /// Copies one page of the caller's memory from `src` to `dst`
    fn copy_page(&mut self, dst: VirtAddr, src: VirtAddr) -> Result<(), LibError>;

    /// The caller's mailbox as last written by the kernel
    fn mailbox(&self) -> Mailbox;

    /// Address of the assembly trampoline that calls the fault handler and
    /// restores the faulting context
    fn upcall_entry(&self) -> VirtAddr;
}
