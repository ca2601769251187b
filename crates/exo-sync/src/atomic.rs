//! Atomic counter shared between CPUs.
//!
//! Used for physical-frame reference counts and for statistics that are
//! bumped outside any lock.

use core::sync::atomic::{AtomicU32, Ordering};

/// A 32-bit counter with sequentially consistent read-modify-write ops.
#[derive(Debug, Default)]
pub struct AtomicCounter {
    value: AtomicU32,
}

impl AtomicCounter {
    pub const fn new(value: u32) -> Self {
        Self {
            value: AtomicU32::new(value),
        }
    }

    pub fn get(&self) -> u32 {
        self.value.load(Ordering::SeqCst)
    }

    pub fn set(&self, value: u32) {
        self.value.store(value, Ordering::SeqCst);
    }

    /// Increments and returns the new value.
    pub fn inc(&self) -> u32 {
        self.value.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }

    /// Decrements and returns the new value.
    pub fn dec(&self) -> u32 {
        self.value.fetch_sub(1, Ordering::SeqCst).wrapping_sub(1)
    }

    /// Decrements and reports whether the counter reached zero.
    ///
    /// Exactly one of any number of concurrent callers sees `true` for a
    /// given transition to zero.
    pub fn dec_and_test(&self) -> bool {
        self.value.fetch_sub(1, Ordering::SeqCst) == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inc_dec() {
        let c = AtomicCounter::new(0);
        assert_eq!(c.inc(), 1);
        assert_eq!(c.inc(), 2);
        assert_eq!(c.dec(), 1);
        assert_eq!(c.get(), 1);
    }

    #[test]
    fn test_dec_and_test() {
        let c = AtomicCounter::new(2);
        assert!(!c.dec_and_test());
        assert!(c.dec_and_test());
        assert_eq!(c.get(), 0);
    }

    #[test]
    fn test_set() {
        let c = AtomicCounter::default();
        c.set(7);
        assert_eq!(c.get(), 7);
    }
}
