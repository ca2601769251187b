//! The kernel object: process lifecycle, loading and diagnostics.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use exo_audit::{SysEvent, SysLog, TerminationCause};
use exo_hal::layout::{page_round_down, page_round_up, PGSIZE, USTACKTOP};
use exo_hal::trap::T_RESCHEDULE;
use exo_hal::{CpuId, PteFlags, VirtAddr, HAL};
use exo_kernel_core::{KernelError, KernelSnapshot, ProcessId, ProcessInfo, ProcessStatus};
use exo_sync::SpinLock;

use crate::config::{ConfigError, KernelConfig};
use crate::cpu::CpuRecord;
use crate::log::LogLevel;
use crate::memory::copy_out;
use crate::process::{Process, ProgramImage};
use crate::table::ProcessTable;
use crate::trap::Flow;
use crate::{kdebug, kinfo};

/// A multiprocessor exokernel over a HAL.
///
/// Shared by reference between CPUs; every method takes `&self`.
pub struct Kernel<H: HAL> {
    pub(crate) hal: H,
    pub(crate) config: KernelConfig,
    pub(crate) table: ProcessTable<H::Space>,
    pub(crate) cpus: Box<[SpinLock<CpuRecord>]>,
    console: SpinLock<()>,
    syslog: SpinLock<SysLog>,
}

impl<H: HAL> Kernel<H> {
    pub fn new(hal: H, config: KernelConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let cpus = (0..config.cpus)
            .map(|_| SpinLock::new(CpuRecord::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(Self {
            table: ProcessTable::new(config.max_processes),
            syslog: SpinLock::new(SysLog::with_capacity(config.syslog_capacity)),
            console: SpinLock::new(()),
            cpus,
            config,
            hal,
        })
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Writes one log line if `level` is enabled.
    pub fn log(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        if level > self.config.log_level {
            return;
        }
        let line = alloc::format!("[{}] {}\n", level.name(), args);
        self.console_print(&line);
    }

    /// Raw console output, serialized with log lines.
    pub(crate) fn console_print(&self, text: &str) {
        let _guard = self.console.lock();
        self.hal.console_write(text);
    }

    /// Brings a CPU online with no address space active.
    pub fn boot_cpu(&self, cpu: CpuId) -> Result<(), KernelError> {
        let mut rec = self.cpus.get(cpu).ok_or(KernelError::InvalidArgument)?.lock();
        rec.booted = true;
        rec.current = None;
        drop(rec);
        self.hal.activate(cpu, None);
        kinfo!(self, "SMP: CPU {} starting", cpu);
        Ok(())
    }

    // === Lifecycle ===

    /// Creates a Runnable process with an empty address space.
    pub fn allocate(&self, parent: ProcessId) -> Result<ProcessId, KernelError> {
        let id = self.allocate_with(parent, ProcessStatus::Runnable)?;
        kdebug!(self, "[{}] new process {}", parent, id);
        Ok(id)
    }

    pub(crate) fn allocate_with(
        &self,
        parent: ProcessId,
        status: ProcessStatus,
    ) -> Result<ProcessId, KernelError> {
        self.table
            .allocate(parent, status, || self.hal.space_create().map_err(KernelError::from))
    }

    /// Creates a process from a program image and makes it Runnable.
    ///
    /// On failure nothing is left behind.
    pub fn spawn(&self, image: &ProgramImage) -> Result<ProcessId, KernelError> {
        image.validate()?;
        let id = self.allocate_with(ProcessId::SELF, ProcessStatus::NotRunnable)?;
        match self.load(id, image) {
            Ok(()) => {
                self.table.lock_live(id)?.status = ProcessStatus::Runnable;
                kinfo!(self, "[{}] spawned at {}", id, image.entry);
                Ok(id)
            }
            Err(e) => {
                self.free(id);
                Err(e)
            }
        }
    }

    fn load(&self, id: ProcessId, image: &ProgramImage) -> Result<(), KernelError> {
        let mut rec = self.table.lock_live(id)?;
        let space = rec.space.ok_or(KernelError::BadProcess)?;

        for segment in &image.segments {
            let start = page_round_down(segment.va.as_u32());
            let end = page_round_up(segment.va.as_u32() + segment.mem_size);
            let perm = if segment.writable {
                PteFlags::USER_RW
            } else {
                PteFlags::USER_PRESENT
            };
            for page in (start..end).step_by(PGSIZE as usize) {
                let va = VirtAddr::new(page);
                match self.hal.page_lookup(space, va) {
                    // Segments sharing a page: the page gets the union.
                    Some((frame, old)) if !old.contains(perm) => {
                        self.hal.page_insert(space, frame, va, old | perm)?
                    }
                    Some(_) => {}
                    None => self.map_zeroed(space, va, perm)?,
                }
            }
            copy_out(&self.hal, space, segment.va, &segment.data)
                .map_err(|_| KernelError::InvalidArgument)?;
        }

        self.map_zeroed(space, VirtAddr::new(USTACKTOP - PGSIZE), PteFlags::USER_RW)?;
        rec.frame.eip = image.entry.as_u32();
        rec.frame.esp = USTACKTOP;
        Ok(())
    }

    /// Maps a fresh zeroed frame at `va`.
    pub(crate) fn map_zeroed(
        &self,
        space: H::Space,
        va: VirtAddr,
        perm: PteFlags,
    ) -> Result<(), KernelError> {
        let frame = self.hal.frame_alloc()?;
        self.hal.frame_zero(frame);
        if let Err(e) = self.hal.page_insert(space, frame, va, perm) {
            self.hal.frame_free(frame);
            return Err(e.into());
        }
        Ok(())
    }

    /// Tears down `id`, which no CPU has loaded, and returns its slot to the
    /// free list.
    pub(crate) fn free(&self, id: ProcessId) {
        if self.table.begin_free(id).is_some() {
            self.reap(id, None);
        }
    }

    /// Destroys `id` on behalf of code running on `cpu`.
    ///
    /// A process loaded on another CPU is only marked Dying; that CPU is
    /// interrupted and finishes the teardown once it has switched away.
    /// Destroying what `cpu` itself runs asks for a reschedule.
    pub(crate) fn destroy_on(&self, cpu: CpuId, id: ProcessId) -> Flow {
        match self.table.begin_free(id) {
            Some(Some(other)) if other != cpu => {
                kdebug!(self, "[{}] dying, left to cpu {}", id, other);
                self.hal.send_ipi(other, T_RESCHEDULE);
                Flow::Continue
            }
            Some(Some(_)) => {
                self.drop_stale(cpu, id);
                Flow::Schedule
            }
            Some(None) => {
                self.reap(id, None);
                Flow::Continue
            }
            None => Flow::Continue,
        }
    }

    /// Destroys a live process.
    ///
    /// `cpu` is the CPU performing the destroy. Returns `true` if it was
    /// running the victim, in which case it must call [`Kernel::schedule`]
    /// next.
    pub fn destroy(&self, cpu: CpuId, id: ProcessId) -> Result<bool, KernelError> {
        drop(self.table.lock_live(id)?);
        Ok(self.destroy_on(cpu, id) == Flow::Schedule)
    }

    /// Called when `cpu` finds that `id`, which it had loaded, is no longer
    /// live. Finishes the teardown if it was left to this CPU.
    pub(crate) fn drop_stale(&self, cpu: CpuId, id: ProcessId) {
        self.release_claim(cpu, id);
        self.reap(id, Some(cpu));
    }

    /// Second half of a destroy: unmaps everything, destroys the address
    /// space and frees the slot. `holder` must be the CPU the Dying record
    /// is still bound to, or `None`.
    fn reap(&self, id: ProcessId, holder: Option<CpuId>) {
        let Some(space) = self.table.take_dying(id, holder) else {
            return;
        };
        if let Some(cpu) = holder {
            self.hal.activate(cpu, None);
        }
        if let Some(space) = space {
            for (va, _, _) in self.hal.user_pages(space) {
                self.hal.page_remove(space, va);
            }
            self.hal.space_destroy(space);
        }
        self.table.finish_free(id);
        kdebug!(self, "[{}] free process", id);
    }

    /// Resolves `id` as `caller` would see it.
    pub fn lookup(
        &self,
        id: ProcessId,
        caller: ProcessId,
        check_perm: bool,
    ) -> Result<ProcessId, KernelError> {
        self.table.lookup(id, caller, check_perm)
    }

    // === CPU bindings ===

    /// Process `cpu` has bound, if any.
    pub fn current(&self, cpu: CpuId) -> Option<ProcessId> {
        self.cpus.get(cpu).and_then(|c| c.lock().current)
    }

    pub(crate) fn release_claim(&self, cpu: CpuId, id: ProcessId) {
        let mut rec = self.cpus[cpu].lock();
        if rec.current == Some(id) {
            rec.current = None;
        }
    }

    /// Unbinds a record from `cpu`. The caller holds the record lock.
    ///
    /// Once unbound the record may be torn down by any CPU, so `cpu` stops
    /// using its address space here rather than at the next dispatch.
    pub(crate) fn unbind(&self, cpu: CpuId, rec: &mut Process<H::Space>) {
        if rec.resident == Some(cpu) {
            rec.resident = None;
            self.hal.activate(cpu, None);
        }
        self.release_claim(cpu, rec.id);
    }

    // === Audit ===

    pub(crate) fn audit(&self, f: impl FnOnce(&mut SysLog, u32)) {
        let now = self.hal.time_msec();
        let mut log = self.syslog.lock();
        f(&mut log, now);
    }

    pub(crate) fn log_termination(&self, id: ProcessId, cause: TerminationCause) {
        self.audit(|log, now| log.log_termination(id.0, cause, now));
    }

    /// Copy of the audit log
    pub fn syslog_events(&self) -> Vec<SysEvent> {
        self.syslog.lock().events().to_vec()
    }

    // === Diagnostics ===

    /// Copies the whole table and every CPU record.
    ///
    /// Consistent only while no CPU is inside the kernel.
    pub fn snapshot(&self) -> KernelSnapshot {
        let state = self.table.state().lock();
        let processes = (0..self.table.capacity())
            .map(|slot| self.table.slot(slot).lock().info(slot))
            .collect();
        let cpus = self
            .cpus
            .iter()
            .enumerate()
            .map(|(cpu, rec)| rec.lock().info(cpu))
            .collect();
        KernelSnapshot {
            processes,
            cpus,
            free_slots: state.free.clone(),
            cursor: state.cursor,
        }
    }

    pub fn process_info(&self, id: ProcessId) -> Option<ProcessInfo> {
        self.table.lock_live(id).ok().map(|rec| rec.info(id.slot()))
    }

    pub fn space_of(&self, id: ProcessId) -> Option<H::Space> {
        self.table.lock_live(id).ok().and_then(|rec| rec.space)
    }

    /// Free slots, the next to be allocated last
    pub fn free_slots(&self) -> Vec<usize> {
        self.table.free_slots()
    }
}
