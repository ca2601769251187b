//! Structural invariants of the process table
//!
//! These are checked over a [`KernelSnapshot`] in tests, after concurrent
//! runs, and on demand for diagnostics.
//!
//! # Invariants
//!
//! 1. **Free List Consistency**: a slot is Free exactly when it is on the free list
//! 2. **Identity Consistency**: every live id is nonzero and encodes its own slot
//! 3. **Single Residency**: no two CPUs claim one process; a Running process is
//!    claimed by the CPU it records as resident
//! 4. **Address Space Lifetime**: a live process has an address space, a Free one has none,
//!    and a Dying one keeps it only while a CPU still has it loaded
//! 5. **Mailbox Consistency**: a receiving process is NotRunnable

use alloc::string::String;
use alloc::vec::Vec;

use crate::snapshot::KernelSnapshot;
use crate::types::ProcessStatus;

/// An invariant violation with details
#[derive(Clone, Debug)]
pub struct InvariantViolation {
    /// Name of the violated invariant
    pub invariant: &'static str,
    /// Description of what went wrong
    pub description: String,
}

/// Check all kernel invariants.
///
/// Returns a list of violations (empty if all invariants hold).
pub fn check_all_invariants(snapshot: &KernelSnapshot) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    violations.extend(check_free_list_consistency(snapshot));
    violations.extend(check_identity_consistency(snapshot));
    violations.extend(check_single_residency(snapshot));
    violations.extend(check_space_lifetime(snapshot));
    violations.extend(check_mailbox_consistency(snapshot));

    violations
}

/// Invariant 1: Free ⇔ on the free list, and no slot listed twice
fn check_free_list_consistency(snapshot: &KernelSnapshot) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    let mut listed = alloc::vec![0usize; snapshot.processes.len()];

    for &slot in &snapshot.free_slots {
        match listed.get_mut(slot) {
            Some(n) => *n += 1,
            None => violations.push(InvariantViolation {
                invariant: "free_list_consistency",
                description: alloc::format!("Free list names slot {} outside the table", slot),
            }),
        }
    }

    for p in &snapshot.processes {
        let on_list = listed.get(p.slot).copied().unwrap_or(0);
        if on_list > 1 {
            violations.push(InvariantViolation {
                invariant: "free_list_consistency",
                description: alloc::format!("Slot {} is on the free list {} times", p.slot, on_list),
            });
        }
        let is_free = p.status == ProcessStatus::Free;
        if is_free != (on_list > 0) {
            violations.push(InvariantViolation {
                invariant: "free_list_consistency",
                description: alloc::format!(
                    "Slot {} has status {:?} but free-list membership is {}",
                    p.slot,
                    p.status,
                    on_list > 0
                ),
            });
        }
    }

    violations
}

/// Invariant 2: live ids are nonzero and encode their slot
fn check_identity_consistency(snapshot: &KernelSnapshot) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    for p in snapshot.processes.iter().filter(|p| p.status.is_live()) {
        if p.id.is_self() || p.id.slot() != p.slot {
            violations.push(InvariantViolation {
                invariant: "identity_consistency",
                description: alloc::format!("Slot {} holds live id {}", p.slot, p.id),
            });
        }
    }

    violations
}

/// Invariant 3: at most one CPU per process, and residency agrees both ways
fn check_single_residency(snapshot: &KernelSnapshot) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    for (i, a) in snapshot.cpus.iter().enumerate() {
        let Some(id) = a.current else { continue };
        for b in &snapshot.cpus[i + 1..] {
            if b.current == Some(id) {
                violations.push(InvariantViolation {
                    invariant: "single_residency",
                    description: alloc::format!(
                        "CPUs {} and {} both claim process {}",
                        a.cpu,
                        b.cpu,
                        id
                    ),
                });
            }
        }
    }

    for p in &snapshot.processes {
        if let Some(cpu) = p.resident {
            let claimed = snapshot.cpus.get(cpu).and_then(|c| c.current);
            if claimed != Some(p.id) {
                violations.push(InvariantViolation {
                    invariant: "single_residency",
                    description: alloc::format!(
                        "Process {} says it is resident on CPU {} which claims {:?}",
                        p.id,
                        cpu,
                        claimed
                    ),
                });
            }
        } else if p.status == ProcessStatus::Running {
            violations.push(InvariantViolation {
                invariant: "single_residency",
                description: alloc::format!("Process {} is Running on no CPU", p.id),
            });
        }
    }

    violations
}

/// Invariant 4: address space exists exactly while the process is live
fn check_space_lifetime(snapshot: &KernelSnapshot) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    for p in &snapshot.processes {
        let bad = match p.status {
            ProcessStatus::Free => p.has_space,
            ProcessStatus::Dying => p.has_space && p.resident.is_none(),
            _ => !p.has_space,
        };
        if bad {
            violations.push(InvariantViolation {
                invariant: "space_lifetime",
                description: alloc::format!(
                    "Slot {} is {:?} with has_space = {}",
                    p.slot,
                    p.status,
                    p.has_space
                ),
            });
        }
    }

    violations
}

/// Invariant 5: a receiving process is blocked
fn check_mailbox_consistency(snapshot: &KernelSnapshot) -> Vec<InvariantViolation> {
    snapshot
        .processes
        .iter()
        .filter(|p| p.mailbox.receiving && p.status != ProcessStatus::NotRunnable)
        .map(|p| InvariantViolation {
            invariant: "mailbox_consistency",
            description: alloc::format!("Process {} is receiving while {:?}", p.id, p.status),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{CpuInfo, ProcessInfo};
    use crate::types::{Mailbox, ProcessId};

    fn slot(slot: usize, status: ProcessStatus) -> ProcessInfo {
        ProcessInfo {
            slot,
            id: if status == ProcessStatus::Free {
                ProcessId::SELF
            } else {
                ProcessId::new(slot, 1)
            },
            parent: ProcessId::SELF,
            status,
            has_space: status.is_live(),
            resident: None,
            pgfault_upcall: None,
            mailbox: Mailbox::default(),
            runs: 0,
        }
    }

    fn healthy() -> KernelSnapshot {
        let mut running = slot(1, ProcessStatus::Running);
        running.resident = Some(0);
        KernelSnapshot {
            processes: alloc::vec![
                slot(0, ProcessStatus::Runnable),
                running,
                slot(2, ProcessStatus::Free),
            ],
            cpus: alloc::vec![CpuInfo {
                cpu: 0,
                booted: true,
                current: Some(ProcessId::new(1, 1)),
                traps: 0,
            }],
            free_slots: alloc::vec![2],
            cursor: 1,
        }
    }

    #[test]
    fn test_healthy_snapshot_passes() {
        assert!(check_all_invariants(&healthy()).is_empty());
    }

    #[test]
    fn test_free_slot_missing_from_list() {
        let mut s = healthy();
        s.free_slots.clear();
        let v = check_all_invariants(&s);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].invariant, "free_list_consistency");
    }

    #[test]
    fn test_double_claim_detected() {
        let mut s = healthy();
        s.cpus.push(CpuInfo {
            cpu: 1,
            booted: true,
            current: Some(ProcessId::new(1, 1)),
            traps: 0,
        });
        let v = check_all_invariants(&s);
        assert!(v.iter().any(|x| x.invariant == "single_residency"));
    }

    #[test]
    fn test_running_without_cpu_detected() {
        let mut s = healthy();
        s.processes[1].resident = None;
        s.cpus[0].current = None;
        let v = check_all_invariants(&s);
        assert!(v.iter().any(|x| x.invariant == "single_residency"));
    }

    #[test]
    fn test_receiving_while_runnable_detected() {
        let mut s = healthy();
        s.processes[0].mailbox.receiving = true;
        let v = check_all_invariants(&s);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].invariant, "mailbox_consistency");
    }

    #[test]
    fn test_freed_slot_keeping_space_detected() {
        let mut s = healthy();
        s.processes[2].has_space = true;
        let v = check_all_invariants(&s);
        assert!(v.iter().any(|x| x.invariant == "space_lifetime"));
    }

    #[test]
    fn test_dying_keeps_space_only_while_loaded() {
        let mut s = healthy();
        s.processes[1].status = ProcessStatus::Dying;
        assert!(check_all_invariants(&s).is_empty());

        s.processes[1].resident = None;
        s.cpus[0].current = None;
        let v = check_all_invariants(&s);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].invariant, "space_lifetime");
    }
}
