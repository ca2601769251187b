//! System call ABI
//!
//! A system call traps with its number in `eax` and up to five arguments in
//! `edx, ecx, ebx, edi, esi`; the result comes back in `eax` (negative
//! values are errors, see [`crate::error`]).

use exo_hal::{PteFlags, VirtAddr};

use crate::error::KernelError;
use crate::types::{ProcessId, ProcessStatus};

pub const SYS_CPUTS: u32 = 0;
pub const SYS_GETENVID: u32 = 1;
pub const SYS_ENV_DESTROY: u32 = 2;
pub const SYS_YIELD: u32 = 3;
pub const SYS_EXOFORK: u32 = 4;
pub const SYS_ENV_SET_STATUS: u32 = 5;
pub const SYS_ENV_SET_TRAPFRAME: u32 = 6;
pub const SYS_ENV_SET_PGFAULT_UPCALL: u32 = 7;
pub const SYS_PAGE_ALLOC: u32 = 8;
pub const SYS_PAGE_MAP: u32 = 9;
pub const SYS_PAGE_UNMAP: u32 = 10;
pub const SYS_IPC_TRY_SEND: u32 = 11;
pub const SYS_IPC_RECV: u32 = 12;
pub const SYS_TIME_MSEC: u32 = 13;

/// Address argument meaning "no page" for the IPC calls.
pub const NO_PAGE: u32 = u32::MAX;

/// A decoded system call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Syscall {
    /// Print `len` bytes at `va` to the console
    Cputs { va: VirtAddr, len: u32 },
    /// Caller's own id
    GetProcessId,
    /// Destroy `target` (the caller or one of its children)
    Destroy { target: ProcessId },
    /// Give up the CPU
    Yield,
    /// Create a blank child that resumes from the caller's registers
    Exofork,
    /// Set `target` Runnable or NotRunnable
    SetStatus { target: ProcessId, status: ProcessStatus },
    /// Replace `target`'s saved registers with a frame read from caller memory
    SetTrapframe { target: ProcessId, frame_va: VirtAddr },
    /// Register `target`'s page-fault upcall entry
    SetPgfaultUpcall { target: ProcessId, entry: VirtAddr },
    /// Allocate a zeroed page at `va` in `target`
    PageAlloc {
        target: ProcessId,
        va: VirtAddr,
        perm: PteFlags,
    },
    /// Map `src`'s page at `src_va` into `dst` at `dst_va`
    PageMap {
        src: ProcessId,
        src_va: VirtAddr,
        dst: ProcessId,
        dst_va: VirtAddr,
        perm: PteFlags,
    },
    /// Remove `target`'s mapping at `va`
    PageUnmap { target: ProcessId, va: VirtAddr },
    /// Deliver `value` (and optionally a page) to a waiting receiver
    IpcTrySend {
        target: ProcessId,
        value: u32,
        src_va: Option<VirtAddr>,
        perm: PteFlags,
    },
    /// Block until a message arrives, accepting a page at `dst_va`
    IpcRecv { dst_va: Option<VirtAddr> },
    /// Milliseconds since boot
    TimeMsec,
}

fn page_arg(raw: u32) -> Option<VirtAddr> {
    (raw != NO_PAGE).then_some(VirtAddr::new(raw))
}

fn page_raw(va: Option<VirtAddr>) -> u32 {
    va.map_or(NO_PAGE, VirtAddr::as_u32)
}

impl Syscall {
    /// Decode a trapped request
    ///
    /// # Returns
    /// * `Ok(Syscall)` - Well-formed request
    /// * `Err(KernelError::InvalidArgument)` - Unknown number or status value
    pub fn decode(num: u32, args: [u32; 5]) -> Result<Self, KernelError> {
        let [a1, a2, a3, a4, a5] = args;
        let call = match num {
            SYS_CPUTS => Syscall::Cputs {
                va: VirtAddr::new(a1),
                len: a2,
            },
            SYS_GETENVID => Syscall::GetProcessId,
            SYS_ENV_DESTROY => Syscall::Destroy {
                target: ProcessId(a1),
            },
            SYS_YIELD => Syscall::Yield,
            SYS_EXOFORK => Syscall::Exofork,
            SYS_ENV_SET_STATUS => Syscall::SetStatus {
                target: ProcessId(a1),
                status: ProcessStatus::from_raw(a2).ok_or(KernelError::InvalidArgument)?,
            },
            SYS_ENV_SET_TRAPFRAME => Syscall::SetTrapframe {
                target: ProcessId(a1),
                frame_va: VirtAddr::new(a2),
            },
            SYS_ENV_SET_PGFAULT_UPCALL => Syscall::SetPgfaultUpcall {
                target: ProcessId(a1),
                entry: VirtAddr::new(a2),
            },
            SYS_PAGE_ALLOC => Syscall::PageAlloc {
                target: ProcessId(a1),
                va: VirtAddr::new(a2),
                perm: PteFlags::from_bits_retain(a3),
            },
            SYS_PAGE_MAP => Syscall::PageMap {
                src: ProcessId(a1),
                src_va: VirtAddr::new(a2),
                dst: ProcessId(a3),
                dst_va: VirtAddr::new(a4),
                perm: PteFlags::from_bits_retain(a5),
            },
            SYS_PAGE_UNMAP => Syscall::PageUnmap {
                target: ProcessId(a1),
                va: VirtAddr::new(a2),
            },
            SYS_IPC_TRY_SEND => Syscall::IpcTrySend {
                target: ProcessId(a1),
                value: a2,
                src_va: page_arg(a3),
                perm: PteFlags::from_bits_retain(a4),
            },
            SYS_IPC_RECV => Syscall::IpcRecv {
                dst_va: page_arg(a1),
            },
            SYS_TIME_MSEC => Syscall::TimeMsec,
            _ => return Err(KernelError::InvalidArgument),
        };
        Ok(call)
    }

    /// Encode for trapping: the number and the five argument registers
    pub fn encode(&self) -> (u32, [u32; 5]) {
        match *self {
            Syscall::Cputs { va, len } => (SYS_CPUTS, [va.as_u32(), len, 0, 0, 0]),
            Syscall::GetProcessId => (SYS_GETENVID, [0; 5]),
            Syscall::Destroy { target } => (SYS_ENV_DESTROY, [target.0, 0, 0, 0, 0]),
            Syscall::Yield => (SYS_YIELD, [0; 5]),
            Syscall::Exofork => (SYS_EXOFORK, [0; 5]),
            Syscall::SetStatus { target, status } => {
                (SYS_ENV_SET_STATUS, [target.0, status.as_raw(), 0, 0, 0])
            }
            Syscall::SetTrapframe { target, frame_va } => {
                (SYS_ENV_SET_TRAPFRAME, [target.0, frame_va.as_u32(), 0, 0, 0])
            }
            Syscall::SetPgfaultUpcall { target, entry } => (
                SYS_ENV_SET_PGFAULT_UPCALL,
                [target.0, entry.as_u32(), 0, 0, 0],
            ),
            Syscall::PageAlloc { target, va, perm } => {
                (SYS_PAGE_ALLOC, [target.0, va.as_u32(), perm.bits(), 0, 0])
            }
            Syscall::PageMap {
                src,
                src_va,
                dst,
                dst_va,
                perm,
            } => (
                SYS_PAGE_MAP,
                [src.0, src_va.as_u32(), dst.0, dst_va.as_u32(), perm.bits()],
            ),
            Syscall::PageUnmap { target, va } => (SYS_PAGE_UNMAP, [target.0, va.as_u32(), 0, 0, 0]),
            Syscall::IpcTrySend {
                target,
                value,
                src_va,
                perm,
            } => (
                SYS_IPC_TRY_SEND,
                [target.0, value, page_raw(src_va), perm.bits(), 0],
            ),
            Syscall::IpcRecv { dst_va } => (SYS_IPC_RECV, [page_raw(dst_va), 0, 0, 0, 0]),
            Syscall::TimeMsec => (SYS_TIME_MSEC, [0; 5]),
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Syscall::Cputs { .. } => "cputs",
            Syscall::GetProcessId => "getenvid",
            Syscall::Destroy { .. } => "env_destroy",
            Syscall::Yield => "yield",
            Syscall::Exofork => "exofork",
            Syscall::SetStatus { .. } => "env_set_status",
            Syscall::SetTrapframe { .. } => "env_set_trapframe",
            Syscall::SetPgfaultUpcall { .. } => "env_set_pgfault_upcall",
            Syscall::PageAlloc { .. } => "page_alloc",
            Syscall::PageMap { .. } => "page_map",
            Syscall::PageUnmap { .. } => "page_unmap",
            Syscall::IpcTrySend { .. } => "ipc_try_send",
            Syscall::IpcRecv { .. } => "ipc_recv",
            Syscall::TimeMsec => "time_msec",
        }
    }
}
