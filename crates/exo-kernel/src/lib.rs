//! exo Kernel
//!
//! A multiprocessor exokernel: a fixed table of user processes, each with its
//! own address space, multiplexed round-robin over any number of CPUs. The
//! kernel exports low-level primitives (raw page mapping, blank process
//! creation, register-state replacement, page-fault upcalls, synchronous IPC)
//! and leaves policy such as copy-on-write fork to user space.
//!
//! # Architecture
//!
//! ```text
//!   CPU 0        CPU 1   ...   CPU n
//!     │            │             │
//!     └─── trap(cpu, frame) ─────┘        one entry point per trap
//!                  │
//!   ┌──────────────┴───────────────────────────────────────┐
//!   │                      Kernel<H>                       │
//!   │                                                      │
//!   │  trap ──► syscall ──► lifecycle / memory / ipc       │
//!   │    │  └─► fault (upcall)                             │
//!   │    ▼                                                 │
//!   │  sched ──► ProcessTable ◄── SpinLock per record      │
//!   │                                                      │
//!   │  SysLog (audit)          console (leveled log)       │
//!   └──────────────────────────┬───────────────────────────┘
//!                              │ HAL
//!                              ▼
//!          frames, address spaces, LAPIC, clock, console
//! ```
//!
//! Every trap ends in a [`Resume`]: enter a user process, halt idle, or
//! stop the machine.
//!
//! # Module Organization
//!
//! - `config` - KernelConfig
//! - `log` - leveled console logging macros
//! - `process` - process records and program images
//! - `table` - the locked process table and its free list
//! - `kernel` - Kernel object, lifecycle, loader, diagnostics
//! - `sched` - round-robin scheduler
//! - `trap` - trap classification and dispatch
//! - `syscall` - system call handlers
//! - `ipc` - mailbox rendezvous
//! - `fault` - page-fault upcalls
//! - `memory` - checked access to user memory

#![no_std]
#![deny(unsafe_code)]
extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod config;
pub mod log;
mod cpu;
pub mod fault;
mod ipc;
pub mod kernel;
pub mod memory;
pub mod process;
pub mod sched;
mod syscall;
mod table;
pub mod trap;

pub use config::{ConfigError, KernelConfig};
pub use fault::UpcallFailure;
pub use kernel::Kernel;
pub use log::LogLevel;
pub use process::{ProgramImage, Segment};
pub use sched::IDLE_SLOT;
pub use trap::{KernelPanic, Resume, TrapCause};

pub use exo_kernel_core::{
    check_all_invariants, InvariantViolation, KernelError, KernelSnapshot, ProcessId,
    ProcessInfo, ProcessStatus, Syscall,
};
