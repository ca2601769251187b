//! User-space library for exo processes
//!
//! The kernel exports mechanisms only. This crate builds the usual process
//! services on top of them, entirely in user mode:
//!
//! - [`Syscalls`]: typed wrappers over the raw trap interface
//! - [`fork()`]: copy-on-write fork from exofork, page_map and a fault handler
//! - [`handle_cow_fault`]: the page-fault handler that makes COW work
//! - [`ipc_send`] / [`ipc_recv`]: retrying send and blocking receive
//!
//! Everything is generic over the [`Runtime`] a process runs in, so the same
//! code drives a real process or a simulated one in tests.

#![no_std]
#![deny(unsafe_code)]
extern crate alloc;

pub mod error;
pub mod fork;
pub mod ipc;
pub mod pgfault;
pub mod syscalls;

#[cfg(test)]
mod fake;

pub use error::LibError;
pub use fork::{duppage, fork, Fork};
pub use ipc::{ipc_recv, ipc_send, Delivery, Received};
pub use pgfault::{handle_cow_fault, set_pgfault_handler};
pub use syscalls::{Runtime, Syscalls};
