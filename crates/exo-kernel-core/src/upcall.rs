//! Placement of the page-fault upcall frame on the user exception stack.
//!
//! If the trap-time stack pointer is already inside the exception stack the
//! upcall itself faulted, and the new frame goes below the old one after one
//! scratch word the upcall uses to return. Otherwise the frame goes at the
//! very top.

use exo_hal::layout::{PGSIZE, UXSTACKTOP};
use exo_hal::{UTrapframe, VirtAddr};

/// Bottom of the one-page user exception stack.
pub const UXSTACK_BOTTOM: u32 = UXSTACKTOP - PGSIZE;

/// Scratch bytes left between nested frames.
pub const NESTED_GAP: u32 = 4;

/// Where the kernel will write the upcall frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpcallPlan {
    /// Address of the frame (becomes the upcall's `esp`)
    pub frame_va: VirtAddr,
    /// The fault happened while already on the exception stack
    pub nested: bool,
}

/// The exception stack has no room for another frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExceptionStackOverflow {
    /// Where the frame would have started
    pub would_be: u32,
}

pub fn plan_upcall(trap_esp: u32) -> Result<UpcallPlan, ExceptionStackOverflow> {
    if (UXSTACK_BOTTOM..UXSTACKTOP).contains(&trap_esp) {
        let need = UTrapframe::SIZE + NESTED_GAP;
        match trap_esp.checked_sub(need) {
            Some(va) if va >= UXSTACK_BOTTOM => Ok(UpcallPlan {
                frame_va: VirtAddr::new(va),
                nested: true,
            }),
            other => Err(ExceptionStackOverflow {
                would_be: other.unwrap_or(0),
            }),
        }
    } else {
        Ok(UpcallPlan {
            frame_va: VirtAddr::new(UXSTACKTOP - UTrapframe::SIZE),
            nested: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exo_hal::layout::USTACKTOP;

    #[test]
    fn test_first_fault_goes_at_top() {
        let plan = plan_upcall(USTACKTOP - 64).unwrap();
        assert!(!plan.nested);
        assert_eq!(plan.frame_va.as_u32(), UXSTACKTOP - 52);
    }

    #[test]
    fn test_nested_fault_leaves_scratch_word() {
        let outer = UXSTACKTOP - UTrapframe::SIZE;
        let plan = plan_upcall(outer).unwrap();
        assert!(plan.nested);
        assert_eq!(plan.frame_va.as_u32(), outer - UTrapframe::SIZE - 4);
    }

    #[test]
    fn test_nested_fault_at_bottom_overflows() {
        let esp = UXSTACK_BOTTOM + UTrapframe::SIZE;
        assert!(plan_upcall(esp).is_err());
        // exactly enough room still fits
        let esp = UXSTACK_BOTTOM + UTrapframe::SIZE + NESTED_GAP;
        assert_eq!(plan_upcall(esp).unwrap().frame_va.as_u32(), UXSTACK_BOTTOM);
    }

    #[test]
    fn test_esp_at_top_is_not_nested() {
        // UXSTACKTOP itself is outside the stack page
        assert!(!plan_upcall(UXSTACKTOP).unwrap().nested);
    }
}
