//! Library errors.

use core::fmt;

use exo_kernel_core::KernelError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LibError {
    /// A system call failed
    Kernel(KernelError),
    /// A page fault the COW handler does not own: not a write, or not to a
    /// copy-on-write page
    UnexpectedFault { va: u32, err: u32, eip: u32 },
}

impl From<KernelError> for LibError {
    fn from(e: KernelError) -> Self {
        LibError::Kernel(e)
    }
}

impl fmt::Display for LibError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibError::Kernel(e) => write!(f, "{}", e),
            LibError::UnexpectedFault { va, err, eip } => write!(
                f,
                "unexpected fault va {:#010x} err {:#x} ip {:#010x}",
                va, err, eip
            ),
        }
    }
}
