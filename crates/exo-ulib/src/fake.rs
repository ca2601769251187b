//! Scripted process for unit tests.
//!
//! Records every system call. Calls that target the process itself update a
//! private page map; calls on other processes only succeed.

use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;

use exo_hal::layout::{PGSIZE, UTEXT, UTOP};
use exo_hal::{PteFlags, VirtAddr};
use exo_kernel_core::{encode_result, KernelError, Mailbox, ProcessId, Syscall};

use crate::error::LibError;
use crate::syscalls::{Runtime, Syscalls};

pub struct FakeProcess {
    pub id: ProcessId,
    pub calls: Vec<Syscall>,
    pub pages: BTreeMap<VirtAddr, PteFlags>,
    pub memory: BTreeMap<VirtAddr, Vec<u8>>,
    pub exofork_result: i32,
    pub fail_page_alloc: Option<KernelError>,
    /// Number of sends answered with `ReceiverNotWaiting` before one lands
    pub refuse_sends: u32,
    pub send_error: Option<KernelError>,
    /// Written to the mailbox by the next receive
    pub incoming: Option<Mailbox>,
    mailbox: Mailbox,
}

impl FakeProcess {
    pub fn new() -> Self {
        Self {
            id: ProcessId(0x1001),
            calls: Vec::new(),
            pages: BTreeMap::new(),
            memory: BTreeMap::new(),
            exofork_result: 0,
            fail_page_alloc: None,
            refuse_sends: 0,
            send_error: None,
            incoming: None,
            mailbox: Mailbox::default(),
        }
    }

    pub fn with_page(mut self, va: VirtAddr, perm: PteFlags) -> Self {
        self.pages.insert(va, perm);
        self
    }

    fn is_self(&self, id: ProcessId) -> bool {
        id == ProcessId::SELF || id == self.id
    }

    fn execute(&mut self, call: Syscall) -> Result<u32, KernelError> {
        match call {
            Syscall::GetProcessId => Ok(self.id.0),
            Syscall::Exofork => Ok(self.exofork_result as u32),
            Syscall::PageAlloc { target, va, perm } => {
                if let Some(e) = self.fail_page_alloc {
                    return Err(e);
                }
                if self.is_self(target) {
                    self.pages.insert(va, perm);
                    self.memory.insert(va, vec![0; PGSIZE as usize]);
                }
                Ok(0)
            }
            Syscall::PageMap {
                src,
                src_va,
                dst,
                dst_va,
                perm,
            } => {
                if self.is_self(src) && !self.pages.contains_key(&src_va) {
                    return Err(KernelError::InvalidArgument);
                }
                if self.is_self(dst) {
                    self.pages.insert(dst_va, perm);
                    if let Some(bytes) = self.memory.get(&src_va).cloned() {
                        self.memory.insert(dst_va, bytes);
                    }
                }
                Ok(0)
            }
            Syscall::PageUnmap { target, va } => {
                if self.is_self(target) {
                    self.pages.remove(&va);
                    self.memory.remove(&va);
                }
                Ok(0)
            }
            Syscall::IpcTrySend { src_va, .. } => {
                if let Some(e) = self.send_error {
                    return Err(e);
                }
                if self.refuse_sends > 0 {
                    self.refuse_sends -= 1;
                    return Err(KernelError::ReceiverNotWaiting);
                }
                Ok(u32::from(src_va.is_some()))
            }
            Syscall::IpcRecv { .. } => {
                if let Some(mailbox) = self.incoming.take() {
                    self.mailbox = mailbox;
                }
                Ok(0)
            }
            _ => Ok(0),
        }
    }
}

impl Syscalls for FakeProcess {
    fn syscall(&mut self, call: Syscall) -> i32 {
        self.calls.push(call);
        encode_result(self.execute(call))
    }
}

impl Runtime for FakeProcess {
    fn pte(&self, va: VirtAddr) -> Option<PteFlags> {
        self.pages.get(&va).copied()
    }

    fn mapped_pages(&self) -> Vec<(VirtAddr, PteFlags)> {
        self.pages
            .range(..VirtAddr::new(UTOP))
            .map(|(&va, &perm)| (va, perm))
            .collect()
    }

    fn copy_page(&mut self, dst: VirtAddr, src: VirtAddr) -> Result<(), LibError> {
        let bytes = self
            .memory
            .get(&src)
            .cloned()
            .unwrap_or_else(|| vec![0; PGSIZE as usize]);
        self.memory.insert(dst, bytes);
        Ok(())
    }

    fn mailbox(&self) -> Mailbox {
        self.mailbox
    }

    fn upcall_entry(&self) -> VirtAddr {
        VirtAddr::new(UTEXT + 0x100)
    }
}
