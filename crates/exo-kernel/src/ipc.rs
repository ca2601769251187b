//! Synchronous IPC.
//!
//! A receiver blocks in `ipc_recv` with its mailbox open. A sender's
//! `ipc_try_send` either finds the mailbox open and delivers one value (and
//! optionally one page), or fails with `ReceiverNotWaiting` without touching
//! the receiver. Senders retry in user space.
//!
//! A target that is not waiting is refused before the page argument is
//! looked at. Every argument is checked before the receiver is modified, so
//! a failed send leaves no trace.

use exo_hal::{CpuId, Frame, PteFlags, VirtAddr, HAL};
use exo_kernel_core::{KernelError, Mailbox, ProcessId, ProcessStatus};

use crate::kernel::Kernel;
use crate::ktrace;

impl<H: HAL> Kernel<H> {
    /// Returns 1 if a page was transferred, 0 otherwise.
    pub(crate) fn ipc_try_send(
        &self,
        caller: ProcessId,
        target: ProcessId,
        value: u32,
        src_va: Option<VirtAddr>,
        perm: PteFlags,
    ) -> Result<u32, KernelError> {
        let target = self.table.lookup(target, caller, false)?;
        if !self.table.lock_live(target)?.mailbox.receiving {
            return Err(KernelError::ReceiverNotWaiting);
        }

        let page = match src_va {
            Some(va) => Some(self.pin_send_page(caller, va, perm)?),
            None => None,
        };
        let result = self.deliver(caller, target, value, page, perm);
        if let Some(frame) = page {
            self.hal.frame_decref(frame);
        }
        result
    }

    /// Validates the sender's page and takes a reference on its frame.
    fn pin_send_page(
        &self,
        caller: ProcessId,
        va: VirtAddr,
        perm: PteFlags,
    ) -> Result<Frame, KernelError> {
        if !va.is_user_mappable() || !perm.is_valid_syscall_perm() {
            return Err(KernelError::InvalidArgument);
        }
        let rec = self.table.lock_live(caller)?;
        let space = rec.space.ok_or(KernelError::BadProcess)?;
        let (frame, mapped) = self
            .hal
            .page_lookup(space, va)
            .ok_or(KernelError::InvalidArgument)?;
        if perm.contains(PteFlags::WRITABLE) && !mapped.contains(PteFlags::WRITABLE) {
            return Err(KernelError::InvalidArgument);
        }
        self.hal.frame_incref(frame);
        Ok(frame)
    }

    fn deliver(
        &self,
        caller: ProcessId,
        target: ProcessId,
        value: u32,
        page: Option<Frame>,
        perm: PteFlags,
    ) -> Result<u32, KernelError> {
        // Checked again: the target may have been served in between.
        let mut rec = self.table.lock_live(target)?;
        if !rec.mailbox.receiving {
            return Err(KernelError::ReceiverNotWaiting);
        }

        let mut transferred = PteFlags::empty();
        if let (Some(frame), Some(dst_va)) = (page, rec.mailbox.dst_va) {
            let space = rec.space.ok_or(KernelError::BadProcess)?;
            self.hal.page_insert(space, frame, dst_va, perm)?;
            transferred = perm;
        }

        rec.mailbox = Mailbox {
            receiving: false,
            dst_va: None,
            from: caller,
            value,
            perm: transferred,
        };
        rec.status = ProcessStatus::Runnable;
        ktrace!(self, "[{}] ipc {:#x} -> {}", caller, value, target);
        Ok(u32::from(!transferred.is_empty()))
    }

    /// Blocks the caller until a message arrives.
    ///
    /// The saved `eax` is preset to 0 so the call returns success when the
    /// receiver is next dispatched.
    pub(crate) fn ipc_recv(
        &self,
        cpu: CpuId,
        caller: ProcessId,
        dst_va: Option<VirtAddr>,
    ) -> Result<(), KernelError> {
        if let Some(va) = dst_va {
            if !va.is_user_mappable() {
                return Err(KernelError::InvalidArgument);
            }
        }
        let mut rec = self.table.lock_live(caller)?;
        rec.mailbox.receiving = true;
        rec.mailbox.dst_va = dst_va;
        rec.status = ProcessStatus::NotRunnable;
        rec.frame.regs.eax = 0;
        self.unbind(cpu, &mut rec);
        Ok(())
    }
}
