//! System Event Log (SysLog)
//!
//! Records all syscalls (request + response) and kernel-initiated
//! terminations for an audit trail. Process identities are stored as raw
//! 32-bit ids so this crate stays independent of the kernel types.

use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

/// Monotonic event identifier
pub type EventId = u64;

/// Events kept when no capacity is configured
pub const DEFAULT_CAPACITY: usize = 10000;

/// A system event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysEvent {
    /// Unique event ID (monotonic)
    pub id: EventId,
    /// Process the event concerns
    pub process: u32,
    /// Milliseconds since boot
    pub timestamp: u32,
    /// What happened
    pub event_type: SysEventType,
}

/// Type of system event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SysEventType {
    /// Syscall request from a process
    Request {
        /// Syscall number
        syscall_num: u32,
        /// Syscall arguments
        args: [u32; 5],
    },
    /// Syscall response to a process
    Response {
        /// ID of the request this responds to
        request_id: EventId,
        /// Syscall result (negative = error); `None` when the caller gave up
        /// the CPU without a return value
        result: Option<i32>,
    },
    /// The kernel destroyed the process
    Terminated {
        /// Why
        cause: TerminationCause,
    },
}

/// Why the kernel terminated a process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationCause {
    /// Page fault with no usable upcall
    PageFault { va: u32, eip: u32 },
    /// Exception the kernel does not handle for user code
    UnhandledTrap { trapno: u32, eip: u32 },
    /// A syscall buffer argument outside the caller's accessible memory
    BadUserBuffer { va: u32 },
}

/// System event log for auditing.
///
/// Events are append-only with monotonic IDs.
pub struct SysLog {
    /// Event entries (append-only)
    events: Vec<SysEvent>,
    /// Next event ID to assign
    next_id: EventId,
    /// Maximum events retained
    capacity: usize,
}

impl SysLog {
    /// Create a new empty SysLog keeping at most `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::new(),
            next_id: 0,
            capacity,
        }
    }

    /// Log a syscall request.
    ///
    /// Returns the event ID for correlating with the response.
    pub fn log_request(
        &mut self,
        process: u32,
        syscall_num: u32,
        args: [u32; 5],
        timestamp: u32,
    ) -> EventId {
        self.push(process, timestamp, SysEventType::Request { syscall_num, args })
    }

    /// Log a syscall response.
    pub fn log_response(
        &mut self,
        process: u32,
        request_id: EventId,
        result: Option<i32>,
        timestamp: u32,
    ) {
        self.push(process, timestamp, SysEventType::Response { request_id, result });
    }

    /// Log a kernel-initiated termination.
    pub fn log_termination(&mut self, process: u32, cause: TerminationCause, timestamp: u32) {
        self.push(process, timestamp, SysEventType::Terminated { cause });
    }

    /// Get all events.
    pub fn events(&self) -> &[SysEvent] {
        &self.events
    }

    /// Events concerning one process.
    pub fn for_process(&self, process: u32) -> Vec<&SysEvent> {
        self.events.iter().filter(|e| e.process == process).collect()
    }

    /// Get the number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Get the next event ID.
    pub fn next_id(&self) -> EventId {
        self.next_id
    }

    fn push(&mut self, process: u32, timestamp: u32, event_type: SysEventType) -> EventId {
        let id = self.next_id;
        self.next_id += 1;

        self.events.push(SysEvent {
            id,
            process,
            timestamp,
            event_type,
        });

        self.trim_if_needed();
        id
    }

    /// Trim old events if exceeding capacity.
    fn trim_if_needed(&mut self) {
        if self.events.len() > self.capacity {
            let drain_count = self.events.len() - self.capacity;
            self.events.drain(0..drain_count);
        }
    }
}
