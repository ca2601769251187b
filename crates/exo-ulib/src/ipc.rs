//! Blocking IPC on top of the kernel's single-attempt send.

use exo_hal::{PteFlags, VirtAddr};
use exo_kernel_core::{KernelError, ProcessId};

use crate::syscalls::{Runtime, Syscalls};

/// Outcome of a successful send
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Only the value was delivered
    Value,
    /// The page was mapped into the receiver as well
    PageMapped,
}

/// A message taken from the caller's mailbox
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Received {
    pub value: u32,
    pub from: ProcessId,
    /// Permissions of the page mapped at the receive address; empty if no
    /// page was transferred
    pub perm: PteFlags,
}

/// Sends `value`, and optionally the caller's page at `va` with `perm`,
/// yielding until `to` is waiting to receive.
///
/// Errors other than the receiver not waiting are returned at once.
pub fn ipc_send<S: Syscalls>(
    sys: &mut S,
    to: ProcessId,
    value: u32,
    page: Option<(VirtAddr, PteFlags)>,
) -> Result<Delivery, KernelError> {
    let (src_va, perm) = match page {
        Some((va, perm)) => (Some(va), perm),
        None => (None, PteFlags::empty()),
    };
    loop {
        match sys.ipc_try_send(to, value, src_va, perm) {
            Ok(true) => return Ok(Delivery::PageMapped),
            Ok(false) => return Ok(Delivery::Value),
            Err(KernelError::ReceiverNotWaiting) => sys.yield_cpu(),
            Err(e) => return Err(e),
        }
    }
}

/// Waits for one message, accepting a page at `dst_va` if given.
pub fn ipc_recv<R: Runtime>(rt: &mut R, dst_va: Option<VirtAddr>) -> Result<Received, KernelError> {
    rt.ipc_wait(dst_va)?;
    let mailbox = rt.mailbox();
    Ok(Received {
        value: mailbox.value,
        from: mailbox.from,
        perm: mailbox.perm,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeProcess;
    use exo_kernel_core::{Mailbox, Syscall};

    const PEER: ProcessId = ProcessId(0x1003);

    fn yields(p: &FakeProcess) -> usize {
        p.calls.iter().filter(|c| **c == Syscall::Yield).count()
    }

    #[test]
    fn test_send_retries_until_receiver_waits() {
        let mut p = FakeProcess::new();
        p.refuse_sends = 3;
        assert_eq!(ipc_send(&mut p, PEER, 42, None), Ok(Delivery::Value));
        assert_eq!(yields(&p), 3);
    }

    #[test]
    fn test_send_with_page() {
        let va = VirtAddr::new(0x0080_0000);
        let mut p = FakeProcess::new().with_page(va, PteFlags::USER_RW);
        assert_eq!(
            ipc_send(&mut p, PEER, 1, Some((va, PteFlags::USER_PRESENT))),
            Ok(Delivery::PageMapped)
        );
    }

    #[test]
    fn test_send_other_errors_stop() {
        let mut p = FakeProcess::new();
        p.send_error = Some(KernelError::BadProcess);
        assert_eq!(
            ipc_send(&mut p, PEER, 1, None),
            Err(KernelError::BadProcess)
        );
        assert_eq!(yields(&p), 0);
    }

    #[test]
    fn test_recv_reads_mailbox() {
        let mut p = FakeProcess::new();
        p.incoming = Some(Mailbox {
            receiving: false,
            dst_va: None,
            from: PEER,
            value: 0xbeef,
            perm: PteFlags::empty(),
        });
        let msg = ipc_recv(&mut p, None).unwrap();
        assert_eq!(msg.value, 0xbeef);
        assert_eq!(msg.from, PEER);
        assert!(msg.perm.is_empty());
    }
}
