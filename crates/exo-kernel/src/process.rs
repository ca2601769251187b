//! Process records and loadable program images.

use alloc::vec::Vec;

use exo_hal::layout::{PGSIZE, USTACKTOP, UTOP};
use exo_hal::{CpuId, TrapFrame, VirtAddr};
use exo_kernel_core::{KernelError, Mailbox, ProcessId, ProcessInfo, ProcessStatus};

/// One process-table record.
///
/// A slot's record is reused across processes; `id` keeps the last id issued
/// from the slot even after it is freed so the next allocation can bump the
/// generation.
#[derive(Clone, Debug)]
pub struct Process<S> {
    pub id: ProcessId,
    /// Creator, or `ProcessId::SELF` for processes the kernel spawned
    pub parent: ProcessId,
    pub status: ProcessStatus,
    pub space: Option<S>,
    /// Saved user register state, restored when the process next runs
    pub frame: TrapFrame,
    pub pgfault_upcall: Option<VirtAddr>,
    pub mailbox: Mailbox,
    /// Number of times the scheduler dispatched this process
    pub runs: u32,
    /// CPU the process is bound to, if any
    pub resident: Option<CpuId>,
}

impl<S: Copy> Process<S> {
    /// An unused record
    pub fn vacant() -> Self {
        Self {
            id: ProcessId::SELF,
            parent: ProcessId::SELF,
            status: ProcessStatus::Free,
            space: None,
            frame: TrapFrame::default(),
            pgfault_upcall: None,
            mailbox: Mailbox::default(),
            runs: 0,
            resident: None,
        }
    }

    /// True if this record currently holds the live process `id`.
    pub fn holds(&self, id: ProcessId) -> bool {
        self.id == id && self.status.is_live()
    }

    pub fn info(&self, slot: usize) -> ProcessInfo {
        ProcessInfo {
            slot,
            id: self.id,
            parent: self.parent,
            status: self.status,
            has_space: self.space.is_some(),
            resident: self.resident,
            pgfault_upcall: self.pgfault_upcall,
            mailbox: self.mailbox,
            runs: self.runs,
        }
    }
}

/// A contiguous piece of a program image.
///
/// `data` is copied to `va`; the rest of the `mem_size` bytes are zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub va: VirtAddr,
    pub data: Vec<u8>,
    pub mem_size: u32,
    pub writable: bool,
}

impl Segment {
    /// Read-only segment sized to its data
    pub fn text(va: u32, data: &[u8]) -> Self {
        Self {
            va: VirtAddr::new(va),
            data: data.to_vec(),
            mem_size: data.len() as u32,
            writable: false,
        }
    }

    /// Writable segment with `mem_size` bytes, the first `data.len()` of
    /// them initialized
    pub fn data(va: u32, data: &[u8], mem_size: u32) -> Self {
        Self {
            va: VirtAddr::new(va),
            data: data.to_vec(),
            mem_size,
            writable: true,
        }
    }

    fn end(&self) -> Option<u32> {
        self.va.as_u32().checked_add(self.mem_size)
    }
}

/// An already-parsed program, ready to be mapped into a fresh process.
///
/// The loader maps every segment, one zeroed stack page just below
/// `USTACKTOP`, and starts the process at `entry`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramImage {
    pub entry: VirtAddr,
    pub segments: Vec<Segment>,
}

impl ProgramImage {
    pub fn new(entry: u32) -> Self {
        Self {
            entry: VirtAddr::new(entry),
            segments: Vec::new(),
        }
    }

    pub fn with_segment(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }

    /// Every segment must lie below the user stack and hold no more data
    /// than its memory size.
    pub fn validate(&self) -> Result<(), KernelError> {
        if self.entry.as_u32() >= UTOP {
            return Err(KernelError::InvalidArgument);
        }
        for segment in &self.segments {
            let fits = segment.data.len() as u64 <= segment.mem_size as u64
                && matches!(segment.end(), Some(end) if end <= USTACKTOP - PGSIZE);
            if !fits {
                return Err(KernelError::InvalidArgument);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exo_hal::layout::UTEXT;

    #[test]
    fn test_vacant_record() {
        let p: Process<u32> = Process::vacant();
        assert_eq!(p.status, ProcessStatus::Free);
        assert!(!p.holds(ProcessId::SELF));
        assert!(!p.info(3).has_space);
    }

    #[test]
    fn test_image_validation() {
        let ok = ProgramImage::new(UTEXT)
            .with_segment(Segment::text(UTEXT, &[0x90; 16]))
            .with_segment(Segment::data(UTEXT + 0x1000, &[1, 2], 0x2000));
        assert!(ok.validate().is_ok());

        let overfull = ProgramImage::new(UTEXT).with_segment(Segment {
            va: VirtAddr::new(UTEXT),
            data: alloc::vec![0; 8],
            mem_size: 4,
            writable: false,
        });
        assert_eq!(overfull.validate(), Err(KernelError::InvalidArgument));

        let into_stack = ProgramImage::new(UTEXT).with_segment(Segment::data(USTACKTOP - 8, &[], 8));
        assert_eq!(into_stack.validate(), Err(KernelError::InvalidArgument));

        let wraps = ProgramImage::new(UTEXT).with_segment(Segment::data(0xFFFF_F000, &[], 0x2000));
        assert_eq!(wraps.validate(), Err(KernelError::InvalidArgument));
    }
}
