//! Several CPUs trapping into one kernel at once.
//!
//! Each thread plays one CPU and feeds random system calls and timer ticks
//! from whatever process it is running. Children created by one CPU get
//! destroyed while possibly running on another, which exercises the
//! reschedule IPI and stale-claim paths. No CPU may ever be left on a
//! destroyed address space, and structural invariants must hold afterwards.

use std::thread;

use exo_hal::layout::PGSIZE;
use exo_hal::trap::{IRQ_OFFSET, IRQ_TIMER, T_SYSCALL};
use exo_hal::{CpuId, PteFlags, TrapFrame, VirtAddr};
use exo_hal_mock::MockMachine;
use exo_kernel::{
    check_all_invariants, Kernel, KernelConfig, ProcessId, ProcessStatus, Resume, Syscall,
};
use exo_testbed::Testbed;

const CPUS: usize = 4;
const STEPS: usize = 2_000;

struct XorShift(u32);

impl XorShift {
    fn next(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }
}

fn timer_frame(resume: &Resume) -> TrapFrame {
    let vector = IRQ_OFFSET + IRQ_TIMER;
    match resume {
        Resume::User { frame, .. } => {
            let mut frame = *frame;
            frame.trapno = vector;
            frame
        }
        _ => TrapFrame::kernel(vector),
    }
}

/// The page tables `cpu` runs on were not freed under it.
fn assert_space_alive(kernel: &Kernel<MockMachine>, cpu: CpuId) {
    if let Some(space) = kernel.hal().active_space(cpu) {
        assert!(
            kernel.hal().space_exists(space),
            "cpu {} runs on destroyed {:?}",
            cpu,
            space
        );
    }
}

fn drive(kernel: &Kernel<MockMachine>, cpu: usize, seed: u32) {
    let mut rng = XorShift(seed);
    // Children this CPU created, with their parent
    let mut children: Vec<(ProcessId, ProcessId)> = Vec::new();
    let mut resume = kernel.schedule(cpu);

    for _ in 0..STEPS {
        let (me, mut frame) = match resume {
            Resume::User { process, frame } => (process, frame),
            Resume::Idle => {
                resume = kernel.trap(cpu, timer_frame(&resume));
                continue;
            }
            Resume::Halt(panic) => panic!("cpu {} halted: {}", cpu, panic),
        };

        let own_child = children.iter().position(|&(_, parent)| parent == me);
        let call = match rng.next() % 7 {
            0 => Syscall::GetProcessId,
            1 => Syscall::Yield,
            2 => Syscall::PageAlloc {
                target: ProcessId::SELF,
                va: VirtAddr::new(0x0100_0000 + (rng.next() % 32) * PGSIZE),
                perm: PteFlags::USER_RW,
            },
            3 => Syscall::Exofork,
            4 => match own_child {
                Some(i) => Syscall::SetStatus {
                    target: children[i].0,
                    status: ProcessStatus::Runnable,
                },
                None => Syscall::TimeMsec,
            },
            5 => match own_child {
                Some(i) => Syscall::Destroy {
                    target: children.swap_remove(i).0,
                },
                None => Syscall::GetProcessId,
            },
            _ => {
                resume = kernel.trap(cpu, timer_frame(&resume));
                continue;
            }
        };

        let (num, args) = call.encode();
        frame.set_syscall_args(num, args);
        frame.trapno = T_SYSCALL;
        resume = kernel.trap(cpu, frame);
        assert_space_alive(kernel, cpu);

        if let Resume::User { process, frame } = &resume {
            if *process != me {
                continue;
            }
            let ret = frame.regs.eax as i32;
            match call {
                Syscall::GetProcessId => assert_eq!(ret as u32, me.0),
                Syscall::Exofork if ret > 0 => children.push((ProcessId(ret as u32), me)),
                _ => {}
            }
        }
    }
}

#[test]
fn test_smp_random_traps_keep_invariants() {
    let bed = Testbed::new(KernelConfig {
        max_processes: 32,
        cpus: CPUS,
        idle_poll_limit: 16,
        ..KernelConfig::default()
    })
    .unwrap();
    for _ in 0..6 {
        bed.spawn().unwrap();
    }
    let kernel = bed.kernel();

    thread::scope(|s| {
        for cpu in 0..CPUS {
            s.spawn(move || drive(kernel, cpu, 0x9E37_79B9 ^ (cpu as u32 + 1)));
        }
    });

    let snap = kernel.snapshot();
    let violations = check_all_invariants(&snap);
    assert!(violations.is_empty(), "{:?}", violations);
    // Every identity handed out is unique among live processes.
    let mut live: Vec<_> = snap
        .processes
        .iter()
        .filter(|p| p.status.is_live())
        .map(|p| p.id)
        .collect();
    let n = live.len();
    live.sort();
    live.dedup();
    assert_eq!(live.len(), n);
}
