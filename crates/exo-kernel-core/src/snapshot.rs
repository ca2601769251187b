//! Point-in-time copies of kernel state, for diagnostics and invariant checks.

use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use exo_hal::{CpuId, VirtAddr};

use crate::types::{Mailbox, ProcessId, ProcessStatus};

/// One process-table slot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub slot: usize,
    /// Last id issued from this slot (stays after the slot is freed)
    pub id: ProcessId,
    pub parent: ProcessId,
    pub status: ProcessStatus,
    pub has_space: bool,
    /// CPU that has this process bound as current
    pub resident: Option<CpuId>,
    pub pgfault_upcall: Option<VirtAddr>,
    pub mailbox: Mailbox,
    pub runs: u32,
}

/// One CPU
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuInfo {
    pub cpu: CpuId,
    pub booted: bool,
    pub current: Option<ProcessId>,
    pub traps: u64,
}

/// Whole-kernel snapshot
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSnapshot {
    pub processes: Vec<ProcessInfo>,
    pub cpus: Vec<CpuInfo>,
    /// Free slots, next to be allocated last
    pub free_slots: Vec<usize>,
    /// Scheduler cursor
    pub cursor: usize,
}

impl KernelSnapshot {
    /// The live process with exactly this id
    pub fn process(&self, id: ProcessId) -> Option<&ProcessInfo> {
        self.processes
            .get(id.slot())
            .filter(|p| p.id == id && p.status != ProcessStatus::Free)
    }

    /// Count of processes in `status`
    pub fn count(&self, status: ProcessStatus) -> usize {
        self.processes.iter().filter(|p| p.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn slot(slot: usize, generation: u32, status: ProcessStatus) -> ProcessInfo {
        ProcessInfo {
            slot,
            id: ProcessId::new(slot, generation),
            parent: ProcessId::SELF,
            status,
            has_space: status.is_live(),
            resident: None,
            pgfault_upcall: None,
            mailbox: Mailbox::default(),
            runs: 0,
        }
    }

    fn snapshot() -> KernelSnapshot {
        KernelSnapshot {
            processes: vec![
                slot(0, 1, ProcessStatus::Runnable),
                slot(1, 3, ProcessStatus::NotRunnable),
                slot(2, 1, ProcessStatus::Free),
            ],
            cpus: vec![CpuInfo {
                cpu: 0,
                booted: true,
                current: None,
                traps: 12,
            }],
            free_slots: vec![2],
            cursor: 1,
        }
    }

    #[test]
    fn test_process_matches_generation() {
        let snap = snapshot();
        assert!(snap.process(ProcessId::new(1, 3)).is_some());
        assert!(snap.process(ProcessId::new(1, 2)).is_none());
        // Freed slots keep their last id but are not live.
        assert!(snap.process(ProcessId::new(2, 1)).is_none());
        assert_eq!(snap.count(ProcessStatus::Free), 1);
    }

    #[test]
    fn test_json_export() {
        let snap = snapshot();
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"NotRunnable\""));
        let back: KernelSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
    }
}
