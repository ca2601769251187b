//! Trap entry and dispatch.
//!
//! ```text
//!                 trap(cpu, frame)
//!                        │
//!          ┌─────────────┴──────────────┐
//!     kernel mode                   user mode
//!   (CPU was idle)                      │
//!          │                save frame into current
//!   interrupt: eoi,                     │
//!   schedule; other:       ┌──────┬─────┴─────┬──────────┐
//!   halt                 fault  syscall    interrupt   other
//!                          │      │           │          │
//!                       upcall  handler   timer: preempt destroy
//!                          │      │        device: eoi   │
//!                          └──────┴─────┬─────┘          │
//!                                       ▼                ▼
//!                  still Running here? resume it : schedule
//! ```
//!
//! A trap never "returns" into the kernel: the outcome is a [`Resume`] the
//! CPU acts on.

use core::fmt;

use exo_audit::TerminationCause;
use exo_hal::trap::{
    trap_name, IRQ_ERROR, IRQ_OFFSET, IRQ_SPURIOUS, IRQ_TIMER, T_PGFLT, T_RESCHEDULE, T_SYSCALL,
};
use exo_hal::{CpuId, TrapFrame, VirtAddr, HAL};
use exo_kernel_core::{ProcessId, ProcessStatus};

use crate::kernel::Kernel;
use crate::{kdebug, kerr, kfatal, kinfo, kwarn};

/// What a CPU does after the kernel finishes with a trap
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resume {
    /// Enter user mode in `process` with `frame`
    User { process: ProcessId, frame: TrapFrame },
    /// Nothing to run: halt with interrupts enabled until the next one
    Idle,
    /// Unrecoverable kernel error
    Halt(KernelPanic),
}

impl Resume {
    pub fn process(&self) -> Option<ProcessId> {
        match self {
            Resume::User { process, .. } => Some(*process),
            _ => None,
        }
    }
}

/// Unrecoverable kernel conditions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelPanic {
    /// The kernel itself faulted
    KernelPageFault { va: VirtAddr, eip: u32 },
    /// An exception in kernel mode other than an interrupt
    UnhandledKernelTrap { trapno: u32, eip: u32 },
    /// A user-mode trap arrived on a CPU with no process bound
    UserTrapWithoutProcess { cpu: CpuId, trapno: u32 },
    /// Trap reported for a CPU the kernel has no record of
    UnknownCpu { cpu: CpuId },
}

impl fmt::Display for KernelPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelPanic::KernelPageFault { va, eip } => {
                write!(f, "kernel page fault at {} (eip {:#010x})", va, eip)
            }
            KernelPanic::UnhandledKernelTrap { trapno, eip } => write!(
                f,
                "unhandled trap {} ({}) in kernel at {:#010x}",
                trapno,
                trap_name(*trapno),
                eip
            ),
            KernelPanic::UserTrapWithoutProcess { cpu, trapno } => {
                write!(f, "cpu {}: user trap {} with no current process", cpu, trapno)
            }
            KernelPanic::UnknownCpu { cpu } => write!(f, "unknown cpu {}", cpu),
        }
    }
}

/// Trap classification
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrapCause {
    PageFault,
    Syscall,
    Timer,
    Reschedule,
    Spurious,
    LapicError,
    Device(u32),
    Unexpected(u32),
}

impl TrapCause {
    pub fn classify(trapno: u32) -> Self {
        match trapno {
            T_PGFLT => TrapCause::PageFault,
            T_SYSCALL => TrapCause::Syscall,
            T_RESCHEDULE => TrapCause::Reschedule,
            n if n == IRQ_OFFSET + IRQ_TIMER => TrapCause::Timer,
            n if n == IRQ_OFFSET + IRQ_SPURIOUS => TrapCause::Spurious,
            n if n == IRQ_OFFSET + IRQ_ERROR => TrapCause::LapicError,
            n if (IRQ_OFFSET..IRQ_OFFSET + 16).contains(&n) => TrapCause::Device(n - IRQ_OFFSET),
            n => TrapCause::Unexpected(n),
        }
    }

    fn is_interrupt(self) -> bool {
        matches!(
            self,
            TrapCause::Timer
                | TrapCause::Reschedule
                | TrapCause::Spurious
                | TrapCause::LapicError
                | TrapCause::Device(_)
        )
    }
}

/// How a handler wants the trap to finish
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Flow {
    /// Resume the current process if it is still Running here
    Continue,
    /// The current process gave up the CPU
    Schedule,
}

impl<H: HAL> Kernel<H> {
    /// Handles one trap on `cpu`.
    pub fn trap(&self, cpu: CpuId, frame: TrapFrame) -> Resume {
        let Some(cpu_rec) = self.cpus.get(cpu) else {
            return Resume::Halt(KernelPanic::UnknownCpu { cpu });
        };
        let current = {
            let mut rec = cpu_rec.lock();
            rec.traps += 1;
            rec.current
        };
        let cause = TrapCause::classify(frame.trapno);

        if !frame.is_user() {
            return self.kernel_trap(cpu, current, cause, &frame);
        }

        let Some(id) = current else {
            let panic = KernelPanic::UserTrapWithoutProcess {
                cpu,
                trapno: frame.trapno,
            };
            kfatal!(self, "{}", panic);
            return Resume::Halt(panic);
        };

        if !self.save_frame(cpu, id, &frame) {
            // Destroyed by another CPU since we last ran it; the teardown
            // was left to us.
            kdebug!(self, "cpu {}: {} is gone", cpu, id);
            self.drop_stale(cpu, id);
            if cause.is_interrupt() {
                self.acknowledge(cpu, cause);
            }
            return self.schedule(cpu);
        }

        let flow = match cause {
            TrapCause::PageFault => self.page_fault(cpu, id, &frame),
            TrapCause::Syscall => self.dispatch_syscall(cpu, id),
            TrapCause::Timer => {
                self.acknowledge(cpu, cause);
                self.preempt(cpu, id);
                Flow::Schedule
            }
            TrapCause::Reschedule | TrapCause::Spurious | TrapCause::LapicError
            | TrapCause::Device(_) => {
                self.acknowledge(cpu, cause);
                Flow::Continue
            }
            TrapCause::Unexpected(trapno) => {
                kerr!(
                    self,
                    "[{}] unhandled trap {} ({})\n{}",
                    id,
                    trapno,
                    trap_name(trapno),
                    frame
                );
                self.log_termination(
                    id,
                    TerminationCause::UnhandledTrap {
                        trapno,
                        eip: frame.eip,
                    },
                );
                self.destroy_on(cpu, id)
            }
        };

        self.finish(cpu, id, flow)
    }

    /// A trap taken while the CPU was in the kernel, which only happens
    /// while it is halted waiting for work.
    fn kernel_trap(
        &self,
        cpu: CpuId,
        current: Option<ProcessId>,
        cause: TrapCause,
        frame: &TrapFrame,
    ) -> Resume {
        if cause.is_interrupt() {
            self.acknowledge(cpu, cause);
            if let Some(id) = current {
                self.preempt(cpu, id);
            }
            return self.schedule(cpu);
        }

        let panic = if cause == TrapCause::PageFault {
            KernelPanic::KernelPageFault {
                va: self.hal.fault_address(cpu),
                eip: frame.eip,
            }
        } else {
            KernelPanic::UnhandledKernelTrap {
                trapno: frame.trapno,
                eip: frame.eip,
            }
        };
        kfatal!(self, "{}\n{}", panic, frame);
        Resume::Halt(panic)
    }

    /// Services an interrupt and signals end-of-interrupt.
    fn acknowledge(&self, cpu: CpuId, cause: TrapCause) {
        match cause {
            TrapCause::Timer if cpu == self.hal.boot_cpu() => self.hal.time_tick(),
            TrapCause::Spurious => kinfo!(self, "spurious interrupt on irq {}", IRQ_SPURIOUS),
            TrapCause::Device(irq) => {
                if let Err(e) = self.hal.device_interrupt(irq) {
                    kwarn!(self, "irq {}: {}", irq, e);
                }
            }
            _ => {}
        }
        self.hal.eoi(cpu);
    }

    /// Saves the user frame into the process `cpu` is running.
    ///
    /// False if the binding is stale.
    fn save_frame(&self, cpu: CpuId, id: ProcessId, frame: &TrapFrame) -> bool {
        match self.table.lock_live(id) {
            Ok(mut rec) if rec.resident == Some(cpu) => {
                rec.frame = *frame;
                true
            }
            _ => false,
        }
    }

    /// Puts a Running process back in the run queue and unbinds it.
    fn preempt(&self, cpu: CpuId, id: ProcessId) {
        match self.table.lock_live(id) {
            Ok(mut rec) => {
                if rec.status == ProcessStatus::Running && rec.resident == Some(cpu) {
                    rec.status = ProcessStatus::Runnable;
                }
                self.unbind(cpu, &mut rec);
            }
            Err(_) => self.drop_stale(cpu, id),
        }
    }

    fn finish(&self, cpu: CpuId, id: ProcessId, flow: Flow) -> Resume {
        match flow {
            Flow::Schedule => {
                // A live caller has already unbound itself; this only acts
                // if it was destroyed under us.
                self.drop_stale(cpu, id);
                self.schedule(cpu)
            }
            Flow::Continue => {
                match self.table.lock_live(id) {
                    Ok(mut rec) => {
                        if rec.status == ProcessStatus::Running && rec.resident == Some(cpu) {
                            return Resume::User {
                                process: id,
                                frame: rec.frame,
                            };
                        }
                        self.unbind(cpu, &mut rec);
                    }
                    Err(_) => self.drop_stale(cpu, id),
                }
                self.schedule(cpu)
            }
        }
    }
}
