//! Round-robin scheduling.
//!
//! One lap over the table starting after the shared cursor, skipping the idle
//! process in slot 0. The first Runnable record not bound to any CPU wins.
//! Slot 0 only runs when the lap finds nothing, and a CPU with nothing to run
//! at all halts until its next interrupt.

use exo_hal::{CpuId, HAL};
use exo_kernel_core::{Lap, ProcessStatus};
use exo_sync::SpinGuard;

use crate::kernel::Kernel;
use crate::process::Process;
use crate::trap::{KernelPanic, Resume};
use crate::ktrace;

/// Slot of the idle process
pub const IDLE_SLOT: usize = 0;

fn dispatchable<S>(rec: &Process<S>) -> bool {
    rec.status == ProcessStatus::Runnable && rec.resident.is_none()
}

impl<H: HAL> Kernel<H> {
    /// Picks the next process for `cpu` and binds it.
    ///
    /// The caller must already have released whatever `cpu` was running.
    pub fn schedule(&self, cpu: CpuId) -> Resume {
        if cpu >= self.cpus.len() {
            return Resume::Halt(KernelPanic::UnknownCpu { cpu });
        }

        {
            let mut state = self.table.state().lock();
            for slot in Lap::new(state.cursor, self.table.capacity()) {
                let rec = self.table.slot(slot).lock();
                if dispatchable(&rec) {
                    state.cursor = slot;
                    drop(state);
                    return self.dispatch(cpu, rec);
                }
            }
        }

        for _ in 0..self.config.idle_poll_limit {
            let rec = self.table.slot(IDLE_SLOT).lock();
            if dispatchable(&rec) {
                return self.dispatch(cpu, rec);
            }
            drop(rec);
            core::hint::spin_loop();
        }

        ktrace!(self, "cpu {}: nothing to run, halting", cpu);
        self.hal.activate(cpu, None);
        Resume::Idle
    }

    fn dispatch(&self, cpu: CpuId, mut rec: SpinGuard<'_, Process<H::Space>>) -> Resume {
        rec.status = ProcessStatus::Running;
        rec.resident = Some(cpu);
        rec.runs = rec.runs.wrapping_add(1);
        self.hal.activate(cpu, rec.space);
        self.cpus[cpu].lock().current = Some(rec.id);
        ktrace!(self, "cpu {}: run {}", cpu, rec.id);
        Resume::User {
            process: rec.id,
            frame: rec.frame,
        }
    }
}
