//! Kernel configuration.
//!
//! All fields have defaults, so a partial JSON document such as
//! `{"cpus": 4}` deserializes into a complete configuration.

use core::fmt;
use serde::{Deserialize, Serialize};

use exo_kernel_core::MAX_SLOTS;

use crate::log::LogLevel;

/// Default process table size.
pub const DEFAULT_MAX_PROCESSES: usize = 1024;

/// Boot-time kernel configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Process table slots, including the idle process in slot 0
    pub max_processes: usize,
    /// Number of CPUs the kernel keeps records for
    pub cpus: usize,
    /// How many times an otherwise idle CPU polls the idle process before
    /// halting until the next interrupt
    pub idle_poll_limit: u32,
    /// Most verbose level written to the console
    pub log_level: LogLevel,
    /// Audit events retained
    pub syslog_capacity: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_processes: DEFAULT_MAX_PROCESSES,
            cpus: 1,
            idle_poll_limit: 1024,
            log_level: LogLevel::Info,
            syslog_capacity: exo_audit::DEFAULT_CAPACITY,
        }
    }
}

impl KernelConfig {
    /// Check the configuration is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_processes < 2 {
            return Err(ConfigError::TooFewProcesses(self.max_processes));
        }
        if self.max_processes > MAX_SLOTS {
            return Err(ConfigError::TooManyProcesses(self.max_processes));
        }
        if self.cpus == 0 {
            return Err(ConfigError::NoCpus);
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Need the idle slot plus at least one more
    TooFewProcesses(usize),
    /// Slot numbers must fit in a process id
    TooManyProcesses(usize),
    /// At least one CPU
    NoCpus,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::TooFewProcesses(n) => write!(f, "max_processes {} is below 2", n),
            ConfigError::TooManyProcesses(n) => {
                write!(f, "max_processes {} exceeds {}", n, MAX_SLOTS)
            }
            ConfigError::NoCpus => write!(f, "cpus must be at least 1"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = KernelConfig::default();
        assert_eq!(config.max_processes, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = KernelConfig::default();
        config.max_processes = 1;
        assert_eq!(config.validate(), Err(ConfigError::TooFewProcesses(1)));
        config.max_processes = MAX_SLOTS + 1;
        assert_eq!(
            config.validate(),
            Err(ConfigError::TooManyProcesses(MAX_SLOTS + 1))
        );
        config.max_processes = 8;
        config.cpus = 0;
        assert_eq!(config.validate(), Err(ConfigError::NoCpus));
    }

    #[test]
    fn test_partial_json() {
        let config: KernelConfig =
            serde_json::from_str(r#"{"cpus": 4, "log_level": "Debug"}"#).unwrap();
        assert_eq!(config.cpus, 4);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.max_processes, DEFAULT_MAX_PROCESSES);
        assert_eq!(config.syslog_capacity, exo_audit::DEFAULT_CAPACITY);
    }
}
