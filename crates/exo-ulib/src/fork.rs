//! Copy-on-write fork.
//!
//! The parent installs the COW fault handler, creates a blank child with
//! exofork, and maps every one of its pages into the child:
//!
//! - shared pages (`SHARE`) keep their permissions in both
//! - writable or already-COW pages become read-only `COW` in the child and
//!   then in the parent
//! - read-only pages are mapped as they are
//!
//! The exception stack is never shared; the child gets a fresh one. The
//! child becomes Runnable only after its address space is complete.

use exo_hal::layout::{PGSIZE, UXSTACKTOP};
use exo_hal::{PteFlags, VirtAddr};
use exo_kernel_core::{decode_result, KernelError, ProcessId, ProcessStatus};

use crate::error::LibError;
use crate::pgfault::set_pgfault_handler;
use crate::syscalls::Runtime;

/// Which side of a fork we are on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fork {
    Parent(ProcessId),
    Child,
}

impl Fork {
    /// Interprets exofork's raw return value.
    pub fn from_return(ret: i32) -> Result<Self, KernelError> {
        match decode_result(ret)? {
            0 => Ok(Fork::Child),
            id => Ok(Fork::Parent(ProcessId(id))),
        }
    }
}

pub fn fork<R: Runtime>(rt: &mut R) -> Result<Fork, LibError> {
    set_pgfault_handler(rt)?;

    let child = match rt.exofork()? {
        Fork::Child => return Ok(Fork::Child),
        Fork::Parent(child) => child,
    };

    let xstack = VirtAddr::new(UXSTACKTOP - PGSIZE);
    for (va, perm) in rt.mapped_pages() {
        if va == xstack {
            continue;
        }
        duppage(rt, child, va, perm)?;
    }

    rt.page_alloc(child, xstack, PteFlags::USER_RW)?;
    let entry = rt.upcall_entry();
    rt.env_set_pgfault_upcall(child, entry)?;
    rt.env_set_status(child, ProcessStatus::Runnable)?;
    Ok(Fork::Parent(child))
}

/// Maps the caller's page at `va` into `child` at the same address.
///
/// For COW pages the child is mapped first: if the parent were remapped
/// first, a parent write in between would give the child the new contents.
pub fn duppage<R: Runtime>(
    rt: &mut R,
    child: ProcessId,
    va: VirtAddr,
    perm: PteFlags,
) -> Result<(), LibError> {
    let me = ProcessId::SELF;
    let perm = perm & PteFlags::SYSCALL;

    if perm.contains(PteFlags::SHARE) {
        rt.page_map(me, va, child, va, perm)?;
    } else if perm.intersects(PteFlags::WRITABLE | PteFlags::COW) {
        let cow = (perm - PteFlags::WRITABLE) | PteFlags::COW;
        rt.page_map(me, va, child, va, cow)?;
        rt.page_map(me, va, me, va, cow)?;
    } else {
        rt.page_map(me, va, child, va, perm)?;
    }
    Ok(())
}
