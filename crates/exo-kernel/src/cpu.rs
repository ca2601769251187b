//! Per-CPU records.

use exo_hal::CpuId;
use exo_kernel_core::{CpuInfo, ProcessId};

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct CpuRecord {
    pub booted: bool,
    /// Process this CPU last dispatched and has not yet given up. May be
    /// stale if another CPU destroyed the process, in which case this CPU
    /// still owes the teardown.
    pub current: Option<ProcessId>,
    pub traps: u64,
}

impl CpuRecord {
    pub fn info(&self, cpu: CpuId) -> CpuInfo {
        CpuInfo {
            cpu,
            booted: self.booted,
            current: self.current,
            traps: self.traps,
        }
    }
}
