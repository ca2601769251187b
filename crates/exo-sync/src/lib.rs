//! exo Sync Primitives - Consolidated Unsafe Code TCB
//!
//! This crate contains ALL unsafe code used by the exo kernel, consolidated
//! into a single auditable location. Every other crate in the workspace uses
//! `#![deny(unsafe_code)]`.
//!
//! # Design Principles
//!
//! 1. **Minimal unsafe surface**: only the `UnsafeCell` access behind a lock
//! 2. **Safe wrappers**: callers only ever see guards and counters
//! 3. **Auditable**: small, focused modules for review
//!
//! # Module Organization
//!
//! - `spin` - Test-and-test-and-set spin lock with RAII guard
//! - `atomic` - Shared atomic counter (reference counts, statistics)
//! - `loom_tests` - Concurrency tests using loom (with `loom` feature)
//!
//! # Memory ordering
//!
//! Acquiring a lock is an `Acquire` operation and releasing it is a `Release`
//! operation, so every write made while holding the lock is visible to the
//! next holder on any CPU.
//!
//! # Verification
//!
//! 1. **Loom tests** (`cargo test -p exo-sync --features loom`): interleavings
//! 2. **Unit tests**: single-threaded and `std::thread` smoke tests

#![no_std]

#[cfg(test)]
extern crate std;

pub mod atomic;
pub mod spin;

#[cfg(any(test, feature = "loom"))]
mod loom_tests;

pub use atomic::AtomicCounter;
pub use spin::{SpinGuard, SpinLock};
