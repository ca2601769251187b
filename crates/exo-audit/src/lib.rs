//! exo Audit - kernel audit trail
//!
//! Records every syscall a process makes (request and response) and every
//! process the kernel terminates on its own initiative. The log is bounded:
//! once it holds `capacity` events the oldest are dropped.

#![no_std]
#![deny(unsafe_code)]

extern crate alloc;

pub mod syslog;

pub use syslog::{EventId, SysEvent, SysEventType, SysLog, TerminationCause, DEFAULT_CAPACITY};
