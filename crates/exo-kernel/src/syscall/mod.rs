//! System call dispatch.
//!
//! Arguments come from the caller's saved frame (`eax` = number, then `edx,
//! ecx, ebx, edi, esi`). Results go back into the saved `eax` as a
//! non-negative value or a negated error code.
//!
//! # Handlers
//!
//! - `lifecycle` - getenvid, destroy, exofork, set_status, set_trapframe,
//!   set_pgfault_upcall
//! - `memory` - page_alloc, page_map, page_unmap
//! - console, time, yield and IPC are dispatched here directly
//!
//! Every request and response is recorded in the audit log.

mod lifecycle;
mod memory;

use alloc::vec;

use exo_audit::TerminationCause;
use exo_hal::{CpuId, PteFlags, VirtAddr, HAL};
use exo_kernel_core::{encode_result, KernelError, ProcessId, ProcessStatus, Syscall};

use crate::kernel::Kernel;
use crate::memory::{copy_in, user_mem_check};
use crate::trap::Flow;
use crate::{ktrace, kwarn};

/// Outcome of one system call
pub(crate) enum SysOutcome {
    /// Store the result in the caller's `eax` and carry on
    Return(Result<u32, KernelError>),
    /// The caller gave up the CPU; nothing is returned now
    Reschedule,
    /// A buffer argument is not accessible to the caller
    Fault(VirtAddr),
}

impl<H: HAL> Kernel<H> {
    pub(crate) fn dispatch_syscall(&self, cpu: CpuId, caller: ProcessId) -> Flow {
        let (num, args) = match self.table.lock_live(caller) {
            Ok(rec) => rec.frame.syscall_args(),
            Err(_) => return Flow::Continue,
        };

        let mut request = 0;
        self.audit(|log, now| request = log.log_request(caller.0, num, args, now));

        let outcome = match Syscall::decode(num, args) {
            Ok(call) => {
                ktrace!(self, "[{}] {}", caller, call.name());
                self.execute(cpu, caller, call)
            }
            Err(e) => {
                kwarn!(self, "[{}] bad syscall {}", caller, num);
                SysOutcome::Return(Err(e))
            }
        };

        match outcome {
            SysOutcome::Return(result) => {
                let ret = encode_result(result);
                if let Ok(mut rec) = self.table.lock_live(caller) {
                    if rec.resident == Some(cpu) {
                        rec.frame.regs.eax = ret as u32;
                    }
                }
                self.audit(|log, now| log.log_response(caller.0, request, Some(ret), now));
                Flow::Continue
            }
            SysOutcome::Reschedule => {
                self.audit(|log, now| log.log_response(caller.0, request, None, now));
                Flow::Schedule
            }
            SysOutcome::Fault(va) => {
                kwarn!(self, "[{}] user_mem_check assertion failure for va {}", caller, va);
                self.audit(|log, now| {
                    log.log_response(caller.0, request, None, now);
                    log.log_termination(
                        caller.0,
                        TerminationCause::BadUserBuffer { va: va.as_u32() },
                        now,
                    );
                });
                self.destroy_on(cpu, caller)
            }
        }
    }

    fn execute(&self, cpu: CpuId, caller: ProcessId, call: Syscall) -> SysOutcome {
        use SysOutcome::Return;

        match call {
            Syscall::Cputs { va, len } => self.sys_cputs(caller, va, len),
            Syscall::GetProcessId => Return(Ok(caller.0)),
            Syscall::Destroy { target } => lifecycle::execute_destroy(self, cpu, caller, target),
            Syscall::Yield => {
                self.yield_cpu(cpu, caller);
                SysOutcome::Reschedule
            }
            Syscall::Exofork => Return(lifecycle::execute_exofork(self, caller)),
            Syscall::SetStatus { target, status } => {
                Return(lifecycle::execute_set_status(self, caller, target, status))
            }
            Syscall::SetTrapframe { target, frame_va } => {
                lifecycle::execute_set_trapframe(self, caller, target, frame_va)
            }
            Syscall::SetPgfaultUpcall { target, entry } => {
                Return(lifecycle::execute_set_pgfault_upcall(self, caller, target, entry))
            }
            Syscall::PageAlloc { target, va, perm } => {
                Return(memory::execute_page_alloc(self, caller, target, va, perm))
            }
            Syscall::PageMap {
                src,
                src_va,
                dst,
                dst_va,
                perm,
            } => Return(memory::execute_page_map(
                self, caller, src, src_va, dst, dst_va, perm,
            )),
            Syscall::PageUnmap { target, va } => {
                Return(memory::execute_page_unmap(self, caller, target, va))
            }
            Syscall::IpcTrySend {
                target,
                value,
                src_va,
                perm,
            } => Return(self.ipc_try_send(caller, target, value, src_va, perm)),
            Syscall::IpcRecv { dst_va } => match self.ipc_recv(cpu, caller, dst_va) {
                Ok(()) => SysOutcome::Reschedule,
                Err(e) => Return(Err(e)),
            },
            Syscall::TimeMsec => Return(Ok(self.hal.time_msec())),
        }
    }

    fn sys_cputs(&self, caller: ProcessId, va: VirtAddr, len: u32) -> SysOutcome {
        let Some(space) = self.space_of(caller) else {
            return SysOutcome::Return(Err(KernelError::BadProcess));
        };
        if let Err(bad) = user_mem_check(&self.hal, space, va, len, PteFlags::empty()) {
            return SysOutcome::Fault(bad);
        }
        let mut buf = vec![0u8; len as usize];
        if let Err(bad) = copy_in(&self.hal, space, va, &mut buf) {
            return SysOutcome::Fault(bad);
        }
        self.console_print(&alloc::string::String::from_utf8_lossy(&buf));
        SysOutcome::Return(Ok(0))
    }

    /// Gives up the CPU, staying Runnable.
    fn yield_cpu(&self, cpu: CpuId, caller: ProcessId) {
        if let Ok(mut rec) = self.table.lock_live(caller) {
            if rec.status == ProcessStatus::Running {
                rec.status = ProcessStatus::Runnable;
            }
            self.unbind(cpu, &mut rec);
        }
    }
}
