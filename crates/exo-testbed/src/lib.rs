//! exo Testbed
//!
//! Runs user code against a real [`Kernel`] on the [`MockMachine`]. Each
//! simulated CPU holds the trap frame of the process it is running; user
//! code acts through that frame:
//!
//! - system calls become `T_SYSCALL` traps ([`Testbed::syscall`])
//! - memory accesses go through the simulated MMU; a refused access becomes
//!   a `T_PGFLT` trap, and if the kernel enters the process's upcall the
//!   testbed plays the trampoline: it reads the [`UTrapframe`], runs
//!   [`exo_ulib::handle_cow_fault`], restores the faulting context and
//!   retries ([`Testbed::store`], [`Testbed::load`])
//! - [`Testbed::user`] hands out a [`UserCtx`] implementing the user
//!   library's [`Runtime`], so `exo_ulib::fork` and friends run unchanged
//!
//! Everything is single-threaded and deterministic; tests choose when
//! timers fire and which process runs next.

use core::fmt;

use exo_hal::layout::{PGSIZE, UTEXT, UTOP};
use exo_hal::trap::{IRQ_OFFSET, IRQ_TIMER, T_PGFLT, T_SYSCALL};
use exo_hal::{CpuId, PteFlags, TrapFrame, UTrapframe, VirtAddr, HAL};
use exo_hal_mock::{MmuFault, MockMachine, DEFAULT_FRAMES};
use exo_kernel::{
    ConfigError, Kernel, KernelConfig, KernelError, KernelPanic, ProcessId, ProgramImage,
    Resume, Segment, Syscall,
};
use exo_kernel_core::Mailbox;
use exo_ulib::{LibError, Runtime, Syscalls};

/// Writable data page of the standard image, initially holding [`DATA_INIT`]
pub const DATA_VA: u32 = UTEXT + PGSIZE;
pub const DATA_INIT: u8 = 1;
/// Upcall trampoline entry inside the text page
pub const UPCALL_ENTRY: u32 = UTEXT + 0x100;

/// Nested faults a single access may take before giving up
const MAX_FAULTS: usize = 4;

/// Text page plus one writable data page.
pub fn standard_image() -> ProgramImage {
    ProgramImage::new(UTEXT)
        .with_segment(Segment::text(UTEXT, &[0xCC; 0x200]))
        .with_segment(Segment::data(DATA_VA, &[DATA_INIT], PGSIZE))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestbedError {
    Config(ConfigError),
    Kernel(KernelError),
}

impl From<ConfigError> for TestbedError {
    fn from(e: ConfigError) -> Self {
        TestbedError::Config(e)
    }
}

impl From<KernelError> for TestbedError {
    fn from(e: KernelError) -> Self {
        TestbedError::Kernel(e)
    }
}

impl fmt::Display for TestbedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestbedError::Config(e) => write!(f, "config: {}", e),
            TestbedError::Kernel(e) => write!(f, "kernel: {}", e),
        }
    }
}

/// What a CPU does after a trap
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// The trapping process continues with this `eax`
    Returned(i32),
    /// Another process (or nothing) now runs on the CPU
    Switched(Option<ProcessId>),
    Halted(KernelPanic),
}

/// Why a user memory access did not complete
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessError {
    /// No process is running on the CPU
    Idle,
    /// The kernel destroyed the process
    Terminated,
    /// The fault handler refused the fault; the process destroyed itself
    Handler(LibError),
    Halted(KernelPanic),
}

pub struct Testbed {
    kernel: Kernel<MockMachine>,
    live: Vec<Option<(ProcessId, TrapFrame)>>,
}

impl Testbed {
    /// Boots every CPU and spawns the idle process into slot 0.
    pub fn new(config: KernelConfig) -> Result<Self, TestbedError> {
        let cpus = config.cpus;
        let kernel = Kernel::new(MockMachine::new(cpus, DEFAULT_FRAMES), config)?;
        for cpu in 0..cpus {
            kernel.boot_cpu(cpu)?;
        }
        kernel.spawn(&standard_image())?;
        Ok(Self {
            kernel,
            live: vec![None; cpus],
        })
    }

    /// One CPU, `slots` process slots.
    pub fn single(slots: usize) -> Result<Self, TestbedError> {
        Self::new(KernelConfig {
            max_processes: slots,
            cpus: 1,
            idle_poll_limit: 4,
            ..KernelConfig::default()
        })
    }

    pub fn kernel(&self) -> &Kernel<MockMachine> {
        &self.kernel
    }

    pub fn spawn(&self) -> Result<ProcessId, KernelError> {
        self.kernel.spawn(&standard_image())
    }

    /// Runs the scheduler on an idle CPU.
    pub fn start(&mut self, cpu: CpuId) -> Option<ProcessId> {
        let resume = self.kernel.schedule(cpu);
        self.enter(cpu, resume).ok().flatten()
    }

    pub fn current(&self, cpu: CpuId) -> Option<ProcessId> {
        self.live.get(cpu).copied().flatten().map(|(id, _)| id)
    }

    /// Saved registers of the process running on `cpu`
    pub fn frame(&self, cpu: CpuId) -> Option<TrapFrame> {
        self.live.get(cpu).copied().flatten().map(|(_, frame)| frame)
    }

    pub fn syscall(&mut self, cpu: CpuId, call: Syscall) -> Step {
        let Some((caller, mut frame)) = self.live.get(cpu).copied().flatten() else {
            return Step::Switched(None);
        };
        let (num, args) = call.encode();
        frame.set_syscall_args(num, args);
        frame.trapno = T_SYSCALL;
        let resume = self.kernel.trap(cpu, frame);
        self.step(cpu, caller, resume)
    }

    /// Fires the timer on `cpu`, in user mode if a process is running there.
    pub fn timer(&mut self, cpu: CpuId) -> Option<ProcessId> {
        let vector = IRQ_OFFSET + IRQ_TIMER;
        let frame = match self.frame(cpu) {
            Some(mut frame) => {
                frame.trapno = vector;
                frame
            }
            None => TrapFrame::kernel(vector),
        };
        let resume = self.kernel.trap(cpu, frame);
        self.enter(cpu, resume).ok().flatten()
    }

    /// Fires timers on `cpu` until `id` runs there again. `false` if it
    /// does not come back within one pass over the table.
    pub fn run_until(&mut self, cpu: CpuId, id: ProcessId) -> bool {
        for _ in 0..=self.kernel.config().max_processes {
            if self.current(cpu) == Some(id) {
                return true;
            }
            self.timer(cpu);
        }
        self.current(cpu) == Some(id)
    }

    /// Writes `data` at `va` as the process running on `cpu`.
    pub fn store(&mut self, cpu: CpuId, va: u32, data: &[u8]) -> Result<(), AccessError> {
        self.access(cpu, |hal, space| hal.user_write(space, VirtAddr::new(va), data))
    }

    /// Reads `len` bytes at `va` as the process running on `cpu`.
    pub fn load(&mut self, cpu: CpuId, va: u32, len: usize) -> Result<Vec<u8>, AccessError> {
        let mut buf = vec![0; len];
        self.access(cpu, |hal, space| hal.user_read(space, VirtAddr::new(va), &mut buf))?;
        Ok(buf)
    }

    /// User-library view of the process running on `cpu`
    pub fn user(&mut self, cpu: CpuId) -> Option<UserCtx<'_>> {
        let process = self.current(cpu)?;
        Some(UserCtx {
            bed: self,
            cpu,
            process,
        })
    }

    fn access(
        &mut self,
        cpu: CpuId,
        mut op: impl FnMut(&MockMachine, exo_hal_mock::SpaceId) -> Result<(), MmuFault>,
    ) -> Result<(), AccessError> {
        for _ in 0..MAX_FAULTS {
            let (id, mut frame) = self
                .live
                .get(cpu)
                .copied()
                .flatten()
                .ok_or(AccessError::Idle)?;
            let space = self.kernel.space_of(id).ok_or(AccessError::Terminated)?;
            let fault = match op(self.kernel.hal(), space) {
                Ok(()) => return Ok(()),
                Err(fault) => fault,
            };

            self.kernel.hal().set_fault_address(cpu, fault.va);
            frame.trapno = T_PGFLT;
            frame.err = fault.err;
            let resume = self.kernel.trap(cpu, frame);
            match self.enter(cpu, resume) {
                Err(panic) => return Err(AccessError::Halted(panic)),
                Ok(Some(now)) if now == id => {}
                Ok(_) => return Err(AccessError::Terminated),
            }
            self.trampoline(cpu, id, space)?;
        }
        Err(AccessError::Terminated)
    }

    /// Plays the upcall trampoline for a process just entered at
    /// [`UPCALL_ENTRY`]: handle the fault, then resume the faulting context.
    fn trampoline(
        &mut self,
        cpu: CpuId,
        id: ProcessId,
        space: exo_hal_mock::SpaceId,
    ) -> Result<(), AccessError> {
        let Some(entered) = self.frame(cpu) else {
            return Err(AccessError::Terminated);
        };
        if entered.eip != UPCALL_ENTRY {
            return Err(AccessError::Terminated);
        }
        let mut raw = [0u8; UTrapframe::SIZE as usize];
        self.kernel
            .hal()
            .user_read(space, VirtAddr::new(entered.esp), &mut raw)
            .map_err(|_| AccessError::Terminated)?;
        let utf = UTrapframe::from_bytes(&raw);

        let handled = match self.user(cpu) {
            Some(mut ctx) => exo_ulib::handle_cow_fault(&mut ctx, &utf),
            None => return Err(AccessError::Terminated),
        };
        if let Err(e) = handled {
            self.syscall(
                cpu,
                Syscall::Destroy {
                    target: ProcessId::SELF,
                },
            );
            return Err(AccessError::Handler(e));
        }

        match self.live.get_mut(cpu) {
            Some(Some((now, frame))) if *now == id => {
                frame.regs = utf.regs;
                frame.eip = utf.eip;
                frame.eflags = utf.eflags;
                frame.esp = utf.esp;
                Ok(())
            }
            _ => Err(AccessError::Terminated),
        }
    }

    fn step(&mut self, cpu: CpuId, caller: ProcessId, resume: Resume) -> Step {
        match self.enter(cpu, resume) {
            Err(panic) => Step::Halted(panic),
            Ok(Some(now)) if now == caller => match self.frame(cpu) {
                Some(frame) => Step::Returned(frame.regs.eax as i32),
                None => Step::Switched(None),
            },
            Ok(now) => Step::Switched(now),
        }
    }

    fn enter(&mut self, cpu: CpuId, resume: Resume) -> Result<Option<ProcessId>, KernelPanic> {
        let next = match resume {
            Resume::User { process, frame } => Some((process, frame)),
            Resume::Idle => None,
            Resume::Halt(panic) => {
                self.live[cpu] = None;
                return Err(panic);
            }
        };
        self.live[cpu] = next;
        Ok(next.map(|(id, _)| id))
    }
}

/// One process's view of the machine, for the user library
pub struct UserCtx<'a> {
    bed: &'a mut Testbed,
    cpu: CpuId,
    process: ProcessId,
}

impl UserCtx<'_> {
    pub fn id(&self) -> ProcessId {
        self.process
    }

    fn space(&self) -> Option<exo_hal_mock::SpaceId> {
        self.bed.kernel.space_of(self.process)
    }
}

impl Syscalls for UserCtx<'_> {
    /// Traps, and if the process is switched out, fires timers until it runs
    /// again. A process that is destroyed or blocked for good sees
    /// `BadProcess`.
    fn syscall(&mut self, call: Syscall) -> i32 {
        match self.bed.syscall(self.cpu, call) {
            Step::Returned(ret) => ret,
            Step::Halted(_) => KernelError::BadProcess.code(),
            Step::Switched(_) => {
                if self.bed.run_until(self.cpu, self.process) {
                    self.bed
                        .frame(self.cpu)
                        .map_or(KernelError::BadProcess.code(), |f| f.regs.eax as i32)
                } else {
                    KernelError::BadProcess.code()
                }
            }
        }
    }
}

impl Runtime for UserCtx<'_> {
    fn pte(&self, va: VirtAddr) -> Option<PteFlags> {
        let space = self.space()?;
        self.bed
            .kernel
            .hal()
            .page_lookup(space, va)
            .map(|(_, perm)| perm)
    }

    fn mapped_pages(&self) -> Vec<(VirtAddr, PteFlags)> {
        let Some(space) = self.space() else {
            return Vec::new();
        };
        let mut pages: Vec<_> = self
            .bed
            .kernel
            .hal()
            .user_pages(space)
            .into_iter()
            .filter(|(va, _, _)| va.as_u32() < UTOP)
            .map(|(va, _, perm)| (va, perm))
            .collect();
        pages.sort_by_key(|(va, _)| *va);
        pages
    }

    fn copy_page(&mut self, dst: VirtAddr, src: VirtAddr) -> Result<(), LibError> {
        let space = self.space().ok_or(LibError::Kernel(KernelError::BadProcess))?;
        let eip = self.bed.frame(self.cpu).map_or(0, |f| f.eip);
        let fault = |f: MmuFault| LibError::UnexpectedFault {
            va: f.va.as_u32(),
            err: f.err,
            eip,
        };
        let hal = self.bed.kernel.hal();
        let mut page = vec![0u8; PGSIZE as usize];
        hal.user_read(space, src, &mut page).map_err(fault)?;
        hal.user_write(space, dst, &page).map_err(fault)?;
        Ok(())
    }

    fn mailbox(&self) -> Mailbox {
        self.bed
            .kernel
            .process_info(self.process)
            .map(|info| info.mailbox)
            .unwrap_or_default()
    }

    fn upcall_entry(&self) -> VirtAddr {
        VirtAddr::new(UPCALL_ENTRY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_spawns_idle_in_slot_zero() {
        let bed = Testbed::single(8).unwrap();
        let snap = bed.kernel().snapshot();
        assert_eq!(snap.processes[0].status, exo_kernel::ProcessStatus::Runnable);
        assert_eq!(bed.kernel().free_slots().len(), 7);
    }

    #[test]
    fn test_rejects_bad_config() {
        let err = Testbed::single(1).err();
        assert!(matches!(err, Some(TestbedError::Config(_))));
    }

    #[test]
    fn test_syscall_returns_to_caller() {
        let mut bed = Testbed::single(8).unwrap();
        let id = bed.spawn().unwrap();
        assert_eq!(bed.start(0), Some(id));
        assert_eq!(
            bed.syscall(0, Syscall::GetProcessId),
            Step::Returned(id.0 as i32)
        );
    }

    #[test]
    fn test_load_initial_data() {
        let mut bed = Testbed::single(8).unwrap();
        bed.spawn().unwrap();
        bed.start(0);
        assert_eq!(bed.load(0, DATA_VA, 1), Ok(vec![DATA_INIT]));
    }
}
