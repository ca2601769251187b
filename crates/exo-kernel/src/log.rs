//! Leveled kernel logging.
//!
//! [`klog!`] and the per-level macros (`kinfo!`, `kwarn!`, ...) take the
//! kernel as their first argument. Messages above the configured level are
//! dropped; the rest go to the HAL console under the console lock, one line
//! each, so output from different CPUs never interleaves mid-line.

use serde::{Deserialize, Serialize};

/// Kernel log severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum LogLevel {
    /// Fatal: unrecoverable error, system will halt.
    Fatal = 0,
    /// Error: something failed but the system may continue.
    Error = 1,
    /// Warning: unexpected condition, not necessarily an error.
    Warn = 2,
    /// Informational: high-level progress messages.
    Info = 3,
    /// Debug: detailed diagnostic information.
    Debug = 4,
    /// Trace: very verbose, low-level tracing.
    Trace = 5,
}

impl LogLevel {
    /// Returns the human-readable name (fixed-width for aligned output).
    pub const fn name(self) -> &'static str {
        match self {
            Self::Fatal => "FATAL",
            Self::Error => "ERROR",
            Self::Warn => "WARN ",
            Self::Info => "INFO ",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }
}

/// Logs a message at the given level.
///
/// ```ignore
/// klog!(kernel, LogLevel::Warn, "cpu {} idle", cpu);
/// ```
#[macro_export]
macro_rules! klog {
    ($k:expr, $level:expr, $($arg:tt)*) => {
        $k.log($level, format_args!($($arg)*))
    };
}

/// Logs at [`LogLevel::Fatal`].
#[macro_export]
macro_rules! kfatal {
    ($k:expr, $($arg:tt)*) => { $crate::klog!($k, $crate::log::LogLevel::Fatal, $($arg)*) };
}

/// Logs at [`LogLevel::Error`].
#[macro_export]
macro_rules! kerr {
    ($k:expr, $($arg:tt)*) => { $crate::klog!($k, $crate::log::LogLevel::Error, $($arg)*) };
}

/// Logs at [`LogLevel::Warn`].
#[macro_export]
macro_rules! kwarn {
    ($k:expr, $($arg:tt)*) => { $crate::klog!($k, $crate::log::LogLevel::Warn, $($arg)*) };
}

/// Logs at [`LogLevel::Info`].
#[macro_export]
macro_rules! kinfo {
    ($k:expr, $($arg:tt)*) => { $crate::klog!($k, $crate::log::LogLevel::Info, $($arg)*) };
}

/// Logs at [`LogLevel::Debug`].
#[macro_export]
macro_rules! kdebug {
    ($k:expr, $($arg:tt)*) => { $crate::klog!($k, $crate::log::LogLevel::Debug, $($arg)*) };
}

/// Logs at [`LogLevel::Trace`].
#[macro_export]
macro_rules! ktrace {
    ($k:expr, $($arg:tt)*) => { $crate::klog!($k, $crate::log::LogLevel::Trace, $($arg)*) };
}
