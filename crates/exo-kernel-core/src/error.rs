//! Kernel error type and its system call encoding.
//!
//! On the wire a failed system call returns the negated error number.

use core::fmt;

use exo_hal::HalError;

/// Error numbers as returned (negated) to user code
pub mod errno {
    /// Process does not exist or is stale
    pub const E_BAD_ENV: i32 = 2;
    /// Invalid parameter
    pub const E_INVAL: i32 = 3;
    /// Request failed due to memory shortage
    pub const E_NO_MEM: i32 = 4;
    /// Attempt to create a process beyond the table size
    pub const E_NO_FREE_ENV: i32 = 5;
    /// Memory fault
    pub const E_FAULT: i32 = 6;
    /// Target is not blocked in `ipc_recv`
    pub const E_IPC_NOT_RECV: i32 = 7;
    /// Caller may not operate on the target
    pub const E_PERM: i32 = 8;
}

/// Kernel errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelError {
    /// Identity does not name a live process
    BadProcess,
    /// Malformed argument
    InvalidArgument,
    /// Physical memory exhausted
    OutOfMemory,
    /// Process table full
    NoFreeProcess,
    /// Buffer argument outside the caller's accessible memory
    MemoryAccessViolation,
    /// IPC target is not waiting to receive
    ReceiverNotWaiting,
    /// Caller is neither the target nor its parent
    PermissionDenied,
}

impl KernelError {
    /// Negative system call return value
    pub const fn code(self) -> i32 {
        -(match self {
            KernelError::BadProcess => errno::E_BAD_ENV,
            KernelError::InvalidArgument => errno::E_INVAL,
            KernelError::OutOfMemory => errno::E_NO_MEM,
            KernelError::NoFreeProcess => errno::E_NO_FREE_ENV,
            KernelError::MemoryAccessViolation => errno::E_FAULT,
            KernelError::ReceiverNotWaiting => errno::E_IPC_NOT_RECV,
            KernelError::PermissionDenied => errno::E_PERM,
        })
    }

    pub const fn from_code(code: i32) -> Option<Self> {
        match code.wrapping_neg() {
            errno::E_BAD_ENV => Some(KernelError::BadProcess),
            errno::E_INVAL => Some(KernelError::InvalidArgument),
            errno::E_NO_MEM => Some(KernelError::OutOfMemory),
            errno::E_NO_FREE_ENV => Some(KernelError::NoFreeProcess),
            errno::E_FAULT => Some(KernelError::MemoryAccessViolation),
            errno::E_IPC_NOT_RECV => Some(KernelError::ReceiverNotWaiting),
            errno::E_PERM => Some(KernelError::PermissionDenied),
            _ => None,
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KernelError::BadProcess => "bad process",
            KernelError::InvalidArgument => "invalid parameter",
            KernelError::OutOfMemory => "out of memory",
            KernelError::NoFreeProcess => "out of processes",
            KernelError::MemoryAccessViolation => "segmentation fault",
            KernelError::ReceiverNotWaiting => "receiver not waiting",
            KernelError::PermissionDenied => "permission denied",
        };
        f.write_str(msg)
    }
}

impl From<HalError> for KernelError {
    fn from(e: HalError) -> Self {
        match e {
            HalError::OutOfMemory => KernelError::OutOfMemory,
            HalError::NotSupported | HalError::InvalidArgument => KernelError::InvalidArgument,
        }
    }
}

/// Splits a raw system call return value into success or error.
///
/// Unknown negative values map to `InvalidArgument`.
pub fn decode_result(ret: i32) -> Result<u32, KernelError> {
    if ret < 0 {
        Err(KernelError::from_code(ret).unwrap_or(KernelError::InvalidArgument))
    } else {
        Ok(ret as u32)
    }
}

/// Packs a handler result into the return register.
pub fn encode_result(result: Result<u32, KernelError>) -> i32 {
    match result {
        Ok(v) => v as i32,
        Err(e) => e.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [KernelError; 7] = [
        KernelError::BadProcess,
        KernelError::InvalidArgument,
        KernelError::OutOfMemory,
        KernelError::NoFreeProcess,
        KernelError::MemoryAccessViolation,
        KernelError::ReceiverNotWaiting,
        KernelError::PermissionDenied,
    ];

    #[test]
    fn test_codes_are_negative_and_distinct() {
        for (i, a) in ALL.iter().enumerate() {
            assert!(a.code() < 0);
            assert_eq!(KernelError::from_code(a.code()), Some(*a));
            for b in &ALL[i + 1..] {
                assert_ne!(a.code(), b.code());
            }
        }
    }

    #[test]
    fn test_decode_result() {
        assert_eq!(decode_result(0), Ok(0));
        assert_eq!(decode_result(0x1001), Ok(0x1001));
        assert_eq!(decode_result(-7), Err(KernelError::ReceiverNotWaiting));
        assert_eq!(decode_result(-99), Err(KernelError::InvalidArgument));
        assert_eq!(encode_result(Err(KernelError::BadProcess)), -2);
    }

    #[test]
    fn test_hal_error_mapping() {
        assert_eq!(KernelError::from(HalError::OutOfMemory), KernelError::OutOfMemory);
    }
}
