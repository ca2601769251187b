//! Access to user memory from the kernel.
//!
//! [`user_mem_check`] answers whether user code itself could touch a range;
//! the copy helpers then move bytes through the backing frames.
//!
//! All three report the first offending address on failure.

use exo_hal::layout::{PGSIZE, ULIM};
use exo_hal::{PteFlags, VirtAddr, HAL};

/// Checks that user code may access `[va, va + len)` with `perm`.
///
/// Every page touched must be below `ULIM` and mapped with
/// `perm | USER | PRESENT`. A range that wraps the address space fails at
/// `va`.
pub fn user_mem_check<H: HAL>(
    hal: &H,
    space: H::Space,
    va: VirtAddr,
    len: u32,
    perm: PteFlags,
) -> Result<(), VirtAddr> {
    if len == 0 {
        return Ok(());
    }
    let end = va.as_u32().checked_add(len).ok_or(va)?;
    let need = perm | PteFlags::USER_PRESENT;

    let mut page = va.page_base().as_u32();
    while page < end {
        let at = VirtAddr::new(page.max(va.as_u32()));
        if page >= ULIM {
            return Err(at);
        }
        match hal.page_lookup(space, VirtAddr::new(page)) {
            Some((_, flags)) if flags.contains(need) => {}
            _ => return Err(at),
        }
        page += PGSIZE;
    }
    Ok(())
}

/// Copies `data` to `va` in `space` regardless of page permissions. Every
/// page must be mapped.
pub fn copy_out<H: HAL>(hal: &H, space: H::Space, va: VirtAddr, data: &[u8]) -> Result<(), VirtAddr> {
    let mut done = 0usize;
    while done < data.len() {
        let at = va.checked_add(done as u32).ok_or(va)?;
        let (frame, _) = hal.page_lookup(space, at.page_base()).ok_or(at)?;
        let chunk = (PGSIZE as usize - at.page_offset()).min(data.len() - done);
        hal.frame_write(frame, at.page_offset(), &data[done..done + chunk]);
        done += chunk;
    }
    Ok(())
}

/// Fills `buf` from `va` in `space`. Every page must be mapped.
pub fn copy_in<H: HAL>(hal: &H, space: H::Space, va: VirtAddr, buf: &mut [u8]) -> Result<(), VirtAddr> {
    let mut done = 0usize;
    while done < buf.len() {
        let at = va.checked_add(done as u32).ok_or(va)?;
        let (frame, _) = hal.page_lookup(space, at.page_base()).ok_or(at)?;
        let chunk = (PGSIZE as usize - at.page_offset()).min(buf.len() - done);
        hal.frame_read(frame, at.page_offset(), &mut buf[done..done + chunk]);
        done += chunk;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use exo_hal::layout::UTEXT;
    use exo_hal_mock::MockMachine;

    fn machine_with_pages(perms: &[PteFlags]) -> (MockMachine, <MockMachine as HAL>::Space) {
        let hal = MockMachine::new(1, 64);
        let space = hal.space_create().unwrap();
        for (i, perm) in perms.iter().enumerate() {
            let frame = hal.frame_alloc().unwrap();
            hal.frame_zero(frame);
            hal.page_insert(space, frame, VirtAddr::new(UTEXT + i as u32 * PGSIZE), *perm)
                .unwrap();
        }
        (hal, space)
    }

    #[test]
    fn test_check_spans_pages() {
        let (hal, space) = machine_with_pages(&[PteFlags::USER_RW, PteFlags::USER_PRESENT]);
        let va = VirtAddr::new(UTEXT + PGSIZE - 8);
        assert!(user_mem_check(&hal, space, va, 16, PteFlags::empty()).is_ok());
        assert_eq!(
            user_mem_check(&hal, space, va, 16, PteFlags::WRITABLE),
            Err(VirtAddr::new(UTEXT + PGSIZE))
        );
    }

    #[test]
    fn test_check_reports_first_bad_address() {
        let (hal, space) = machine_with_pages(&[PteFlags::USER_RW]);
        let va = VirtAddr::new(UTEXT + 100);
        assert!(user_mem_check(&hal, space, va, 0, PteFlags::empty()).is_ok());
        assert_eq!(
            user_mem_check(&hal, space, va, PGSIZE, PteFlags::empty()),
            Err(VirtAddr::new(UTEXT + PGSIZE))
        );
        let unmapped = VirtAddr::new(UTEXT + 5 * PGSIZE + 3);
        assert_eq!(
            user_mem_check(&hal, space, unmapped, 1, PteFlags::empty()),
            Err(unmapped)
        );
    }

    #[test]
    fn test_check_rejects_kernel_and_wrapping_ranges() {
        let (hal, space) = machine_with_pages(&[]);
        let kernel = VirtAddr::new(ULIM);
        assert_eq!(user_mem_check(&hal, space, kernel, 4, PteFlags::empty()), Err(kernel));
        let wrap = VirtAddr::new(0xFFFF_FFF0);
        assert_eq!(user_mem_check(&hal, space, wrap, 0x20, PteFlags::empty()), Err(wrap));
    }

    #[test]
    fn test_copy_across_page_boundary() {
        let (hal, space) = machine_with_pages(&[PteFlags::USER_PRESENT, PteFlags::USER_PRESENT]);
        let va = VirtAddr::new(UTEXT + PGSIZE - 3);
        copy_out(&hal, space, va, b"abcdef").unwrap();
        let mut buf = [0u8; 6];
        copy_in(&hal, space, va, &mut buf).unwrap();
        assert_eq!(&buf, b"abcdef");

        let beyond = VirtAddr::new(UTEXT + 2 * PGSIZE - 2);
        assert_eq!(
            copy_out(&hal, space, beyond, b"xyz"),
            Err(VirtAddr::new(UTEXT + 2 * PGSIZE))
        );
    }
}
