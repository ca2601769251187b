//! User page faults.
//!
//! A process that registered an upcall gets the fault reflected back to it:
//! the kernel writes a [`UTrapframe`] onto the user exception stack and
//! resumes the process at the upcall with `esp` pointing at that frame.
//! Anything that prevents this destroys the process.

use core::fmt;

use exo_audit::TerminationCause;
use exo_hal::layout::UXSTACKTOP;
use exo_hal::{CpuId, PteFlags, TrapFrame, UTrapframe, VirtAddr, HAL};
use exo_kernel_core::{plan_upcall, ProcessId};

use crate::kernel::Kernel;
use crate::memory::{copy_out, user_mem_check};
use crate::trap::Flow;
use crate::{kdebug, kwarn};

/// Why a fault could not be reflected
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpcallFailure {
    NoUpcall,
    /// The exception stack page is missing or not user-writable
    NoExceptionStack,
    /// The upcall entry is not user-accessible
    BadEntry(VirtAddr),
    /// Recursive faults ran off the bottom of the exception stack
    ExceptionStackOverflow,
    /// Process vanished while the fault was being handled
    Gone,
}

impl fmt::Display for UpcallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpcallFailure::NoUpcall => write!(f, "no page fault upcall"),
            UpcallFailure::NoExceptionStack => write!(f, "exception stack not writable"),
            UpcallFailure::BadEntry(va) => write!(f, "upcall entry {} not accessible", va),
            UpcallFailure::ExceptionStackOverflow => write!(f, "exception stack overflow"),
            UpcallFailure::Gone => write!(f, "process gone"),
        }
    }
}

impl<H: HAL> Kernel<H> {
    pub(crate) fn page_fault(&self, cpu: CpuId, id: ProcessId, tf: &TrapFrame) -> Flow {
        let fault_va = self.hal.fault_address(cpu);
        match self.reflect_fault(id, tf, fault_va) {
            Ok(frame_va) => {
                kdebug!(
                    self,
                    "[{}] fault va {} ip {:#010x} -> upcall, frame at {}",
                    id,
                    fault_va,
                    tf.eip,
                    frame_va
                );
                Flow::Continue
            }
            Err(reason) => {
                kwarn!(
                    self,
                    "[{}] user fault va {} ip {:#010x}: {}",
                    id,
                    fault_va,
                    tf.eip,
                    reason
                );
                self.log_termination(
                    id,
                    TerminationCause::PageFault {
                        va: fault_va.as_u32(),
                        eip: tf.eip,
                    },
                );
                self.destroy_on(cpu, id)
            }
        }
    }

    /// Pushes the upcall frame and redirects the saved frame to the upcall.
    /// Returns where the frame went.
    fn reflect_fault(
        &self,
        id: ProcessId,
        tf: &TrapFrame,
        fault_va: VirtAddr,
    ) -> Result<VirtAddr, UpcallFailure> {
        let mut rec = self.table.lock_live(id).map_err(|_| UpcallFailure::Gone)?;
        let entry = rec.pgfault_upcall.ok_or(UpcallFailure::NoUpcall)?;
        let space = rec.space.ok_or(UpcallFailure::Gone)?;

        user_mem_check(
            &self.hal,
            space,
            VirtAddr::new(UXSTACKTOP - 1),
            1,
            PteFlags::WRITABLE,
        )
        .map_err(|_| UpcallFailure::NoExceptionStack)?;
        user_mem_check(&self.hal, space, entry, 1, PteFlags::empty())
            .map_err(|_| UpcallFailure::BadEntry(entry))?;

        let plan = plan_upcall(tf.esp).map_err(|_| UpcallFailure::ExceptionStackOverflow)?;
        let utf = UTrapframe::from_trap(tf, fault_va.as_u32());
        copy_out(&self.hal, space, plan.frame_va, &utf.to_bytes())
            .map_err(|_| UpcallFailure::NoExceptionStack)?;

        rec.frame.eip = entry.as_u32();
        rec.frame.esp = plan.frame_va.as_u32();
        Ok(plan.frame_va)
    }
}
