//! exo Kernel Core - pure types and decisions
//!
//! This crate contains the **HAL-call-free** parts of the exo kernel: the
//! data every other layer agrees on, and the small decisions that can be made
//! without touching hardware. It uses the machine types from `exo-hal` but
//! never calls the HAL trait.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    exo-kernel-core                          │
//! │                                                             │
//! │   ┌───────────────┐    ┌───────────────┐                    │
//! │   │  ProcessId    │    │   Syscall     │                    │
//! │   │  status       │    │  decode/      │                    │
//! │   │  Mailbox      │    │  encode (ABI) │                    │
//! │   └───────────────┘    └───────────────┘                    │
//! │                                                             │
//! │   ┌───────────────┐    ┌───────────────┐  ┌──────────────┐  │
//! │   │  sched::Lap   │    │ plan_upcall   │  │  Invariants  │  │
//! │   │  scan order   │    │ frame address │  │  over a      │  │
//! │   └───────────────┘    └───────────────┘  │  snapshot    │  │
//! │                                           └──────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!                 │                              │
//!                 │ used by                      │ used by
//!                 ▼                              ▼
//! ┌───────────────────────────────┐  ┌──────────────────────────┐
//! │          exo-kernel           │  │         exo-ulib         │
//! │  process table, scheduler,    │  │  typed syscalls, fork,   │
//! │  IPC, traps (HAL integration) │  │  COW handler, IPC loops  │
//! └───────────────────────────────┘  └──────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! - `types` - ProcessId, ProcessStatus, Mailbox
//! - `error` - KernelError and its syscall encoding
//! - `syscall` - Syscall numbers and the decoded request enum
//! - `sched` - Round-robin lap order
//! - `upcall` - Page-fault upcall frame placement
//! - `snapshot` - Serializable copies of kernel state
//! - `invariants` - Structural invariant checks

#![no_std]
#![deny(unsafe_code)]
extern crate alloc;

pub mod error;
pub mod invariants;
pub mod sched;
pub mod snapshot;
pub mod syscall;
pub mod types;
pub mod upcall;

pub use error::{decode_result, encode_result, errno, KernelError};
pub use invariants::{check_all_invariants, InvariantViolation};
pub use sched::Lap;
pub use snapshot::{CpuInfo, KernelSnapshot, ProcessInfo};
pub use syscall::{Syscall, NO_PAGE};
pub use types::{Mailbox, ProcessId, ProcessStatus, MAX_SLOTS, SLOT_BITS};
pub use upcall::{plan_upcall, ExceptionStackOverflow, UpcallPlan};
