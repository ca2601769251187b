//! Mock HAL implementation for testing the exo kernel
//!
//! `MockMachine` simulates just enough of a multiprocessor to run the kernel
//! on a host: a pool of physical frames with contents and reference counts,
//! per-process page tables, a per-CPU interrupt controller, a clock and a
//! console. It also plays the part of the MMU for user loads and stores, so
//! tests can trigger genuine protection faults.
//!
//! Every piece of state sits behind an `exo_sync::SpinLock` or an atomic, so
//! one machine can be shared by several CPU threads.

#![no_std]
#![deny(unsafe_code)]

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use exo_hal::layout::{PGSHIFT, PGSIZE, UENVS, ULIM, UPAGES, UTOP};
use exo_hal::trap::{FEC_PR, FEC_U, FEC_WR, IRQ_IDE, IRQ_KBD, IRQ_NIC, IRQ_SERIAL};
use exo_hal::{CpuId, Frame, HalError, PteFlags, VirtAddr, HAL};
use exo_sync::{AtomicCounter, SpinLock};

/// Milliseconds per timer tick (100 Hz).
pub const TICK_MS: u32 = 10;

/// Default number of simulated physical frames (4 MiB).
pub const DEFAULT_FRAMES: usize = 1024;

/// Handle to a simulated address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpaceId(pub u32);

/// A user access the simulated MMU refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MmuFault {
    /// Faulting address
    pub va: VirtAddr,
    /// Page-fault error code (`FEC_*` bits)
    pub err: u32,
}

struct FrameSlot {
    allocated: bool,
    refs: u32,
    /// Lazily materialized; contents survive free/alloc like real memory.
    data: Option<Box<[u8; PGSIZE as usize]>>,
}

struct FrameTable {
    slots: Vec<FrameSlot>,
    free: Vec<u32>,
}

impl FrameTable {
    fn new(count: usize) -> Self {
        let slots = (0..count)
            .map(|_| FrameSlot {
                allocated: false,
                refs: 0,
                data: None,
            })
            .collect();
        // Pop from the end, so frame 0 goes first
        let free = (0..count as u32).rev().collect();
        Self { slots, free }
    }

    fn alloc(&mut self) -> Option<Frame> {
        let n = self.free.pop()?;
        let slot = &mut self.slots[n as usize];
        slot.allocated = true;
        slot.refs = 0;
        slot.data.get_or_insert_with(|| Box::new([0u8; PGSIZE as usize]));
        Some(Frame(n))
    }

    fn slot(&mut self, frame: Frame) -> Option<&mut FrameSlot> {
        self.slots
            .get_mut(frame.index())
            .filter(|slot| slot.allocated)
    }

    fn release(&mut self, frame: Frame) {
        if let Some(slot) = self.slot(frame) {
            slot.allocated = false;
            slot.refs = 0;
            self.free.push(frame.0);
        }
    }

    fn incref(&mut self, frame: Frame) {
        if let Some(slot) = self.slot(frame) {
            slot.refs += 1;
        }
    }

    fn decref(&mut self, frame: Frame) {
        let Some(slot) = self.slot(frame) else {
            return;
        };
        slot.refs = slot.refs.saturating_sub(1);
        if slot.refs == 0 {
            self.release(frame);
        }
    }
}

struct MockSpace {
    /// Page directory frame
    dir: Frame,
    /// Page-table frames by directory index
    tables: BTreeMap<u32, Frame>,
    /// User mappings by virtual page number
    pages: BTreeMap<u32, (Frame, PteFlags)>,
}

struct SpaceTable {
    next_id: u32,
    spaces: BTreeMap<u32, MockSpace>,
}

struct MockCpu {
    active: SpinLock<Option<SpaceId>>,
    fault_va: AtomicU32,
    eois: AtomicCounter,
    ipis: SpinLock<Vec<u32>>,
}

/// Simulated multiprocessor for unit and integration tests
pub struct MockMachine {
    frames: SpinLock<FrameTable>,
    spaces: SpinLock<SpaceTable>,
    /// Mappings every address space shares above `UTOP` (read-only windows)
    kernel_shared: BTreeMap<u32, (Frame, PteFlags)>,
    cpus: Vec<MockCpu>,
    ticks: AtomicCounter,
    console: SpinLock<String>,
    device_irqs: SpinLock<Vec<u32>>,
}

impl MockMachine {
    /// Create a machine with `cpus` processors and `frames` physical frames
    pub fn new(cpus: usize, frames: usize) -> Self {
        let mut table = FrameTable::new(frames);
        let mut kernel_shared = BTreeMap::new();
        for window in [UENVS, UPAGES] {
            if let Some(frame) = table.alloc() {
                table.incref(frame);
                kernel_shared.insert(window >> PGSHIFT, (frame, PteFlags::USER_PRESENT));
            }
        }

        Self {
            frames: SpinLock::new(table),
            spaces: SpinLock::new(SpaceTable {
                next_id: 1,
                spaces: BTreeMap::new(),
            }),
            kernel_shared,
            cpus: (0..cpus)
                .map(|_| MockCpu {
                    active: SpinLock::new(None),
                    fault_va: AtomicU32::new(0),
                    eois: AtomicCounter::new(0),
                    ipis: SpinLock::new(Vec::new()),
                })
                .collect(),
            ticks: AtomicCounter::new(0),
            console: SpinLock::new(String::new()),
            device_irqs: SpinLock::new(Vec::new()),
        }
    }

    /// Number of CPUs
    pub fn cpu_count(&self) -> usize {
        self.cpus.len()
    }

    /// Number of unallocated frames
    pub fn free_frames(&self) -> usize {
        self.frames.lock().free.len()
    }

    /// Number of live address spaces
    pub fn space_count(&self) -> usize {
        self.spaces.lock().spaces.len()
    }

    /// Whether `space` has been created and not yet destroyed
    pub fn space_exists(&self, space: SpaceId) -> bool {
        self.spaces.lock().spaces.contains_key(&space.0)
    }

    /// Everything written to the console so far
    pub fn console_output(&self) -> String {
        self.console.lock().clone()
    }

    /// Check if the console output contains a substring
    pub fn has_output_containing(&self, substr: &str) -> bool {
        self.console.lock().contains(substr)
    }

    /// End-of-interrupt signals seen on `cpu`
    pub fn eoi_count(&self, cpu: CpuId) -> u32 {
        self.cpus.get(cpu).map_or(0, |c| c.eois.get())
    }

    /// IPI vectors delivered to `cpu`, oldest first
    pub fn ipis(&self, cpu: CpuId) -> Vec<u32> {
        self.cpus
            .get(cpu)
            .map(|c| c.ipis.lock().clone())
            .unwrap_or_default()
    }

    /// Address space currently loaded on `cpu`
    pub fn active_space(&self, cpu: CpuId) -> Option<SpaceId> {
        self.cpus.get(cpu).and_then(|c| *c.active.lock())
    }

    /// Device IRQs serviced, oldest first
    pub fn device_interrupts(&self) -> Vec<u32> {
        self.device_irqs.lock().clone()
    }

    /// Latch the fault address register of `cpu`, as the MMU does
    pub fn set_fault_address(&self, cpu: CpuId, va: VirtAddr) {
        if let Some(c) = self.cpus.get(cpu) {
            c.fault_va.store(va.as_u32(), Ordering::SeqCst);
        }
    }

    /// Load bytes from user memory with user-mode permission checks
    pub fn user_read(&self, space: SpaceId, va: VirtAddr, buf: &mut [u8]) -> Result<(), MmuFault> {
        let mut done = 0;
        while done < buf.len() {
            let at = va.checked_add(done as u32).ok_or(MmuFault {
                va,
                err: FEC_U,
            })?;
            let frame = self.translate(space, at, false)?;
            let offset = at.page_offset();
            let n = (PGSIZE as usize - offset).min(buf.len() - done);
            self.frame_read(frame, offset, &mut buf[done..done + n]);
            done += n;
        }
        Ok(())
    }

    /// Store bytes to user memory with user-mode permission checks
    pub fn user_write(&self, space: SpaceId, va: VirtAddr, data: &[u8]) -> Result<(), MmuFault> {
        let mut done = 0;
        while done < data.len() {
            let at = va.checked_add(done as u32).ok_or(MmuFault {
                va,
                err: FEC_U | FEC_WR,
            })?;
            let frame = self.translate(space, at, true)?;
            let offset = at.page_offset();
            let n = (PGSIZE as usize - offset).min(data.len() - done);
            self.frame_write(frame, offset, &data[done..done + n]);
            done += n;
        }
        Ok(())
    }

    fn translate(&self, space: SpaceId, va: VirtAddr, write: bool) -> Result<Frame, MmuFault> {
        let entry = self.page_lookup(space, va);
        let mut err = FEC_U;
        if write {
            err |= FEC_WR;
        }
        let Some((frame, perm)) = entry else {
            return Err(MmuFault { va, err });
        };
        err |= FEC_PR;

        let mut need = PteFlags::USER_PRESENT;
        if write {
            need |= PteFlags::WRITABLE;
        }
        if va.as_u32() < ULIM && perm.contains(need) {
            Ok(frame)
        } else {
            Err(MmuFault { va, err })
        }
    }

    fn alloc_owned_frame(&self) -> Result<Frame, HalError> {
        let mut frames = self.frames.lock();
        let frame = frames.alloc().ok_or(HalError::OutOfMemory)?;
        frames.incref(frame);
        Ok(frame)
    }
}

impl Default for MockMachine {
    fn default() -> Self {
        Self::new(1, DEFAULT_FRAMES)
    }
}

impl HAL for MockMachine {
    type Space = SpaceId;

    fn frame_alloc(&self) -> Result<Frame, HalError> {
        self.frames.lock().alloc().ok_or(HalError::OutOfMemory)
    }

    fn frame_free(&self, frame: Frame) {
        let mut frames = self.frames.lock();
        if frames.slot(frame).is_some_and(|slot| slot.refs == 0) {
            frames.release(frame);
        }
    }

    fn frame_incref(&self, frame: Frame) {
        self.frames.lock().incref(frame);
    }

    fn frame_decref(&self, frame: Frame) {
        self.frames.lock().decref(frame);
    }

    fn frame_refcount(&self, frame: Frame) -> u32 {
        self.frames.lock().slot(frame).map_or(0, |slot| slot.refs)
    }

    fn frame_write(&self, frame: Frame, offset: usize, data: &[u8]) {
        let mut frames = self.frames.lock();
        if let Some(page) = frames.slot(frame).and_then(|slot| slot.data.as_mut()) {
            let end = (offset + data.len()).min(PGSIZE as usize);
            if offset < end {
                page[offset..end].copy_from_slice(&data[..end - offset]);
            }
        }
    }

    fn frame_read(&self, frame: Frame, offset: usize, buf: &mut [u8]) {
        let mut frames = self.frames.lock();
        if let Some(page) = frames.slot(frame).and_then(|slot| slot.data.as_ref()) {
            let end = (offset + buf.len()).min(PGSIZE as usize);
            if offset < end {
                buf[..end - offset].copy_from_slice(&page[offset..end]);
            }
        }
    }

    fn space_create(&self) -> Result<SpaceId, HalError> {
        let dir = self.alloc_owned_frame()?;
        let mut spaces = self.spaces.lock();
        let id = spaces.next_id;
        spaces.next_id += 1;
        spaces.spaces.insert(
            id,
            MockSpace {
                dir,
                tables: BTreeMap::new(),
                pages: BTreeMap::new(),
            },
        );
        Ok(SpaceId(id))
    }

    fn space_destroy(&self, space: SpaceId) {
        let mut spaces = self.spaces.lock();
        let Some(s) = spaces.spaces.remove(&space.0) else {
            return;
        };
        let mut frames = self.frames.lock();
        for (frame, _) in s.pages.values() {
            frames.decref(*frame);
        }
        for table in s.tables.values() {
            frames.decref(*table);
        }
        frames.decref(s.dir);
    }

    fn page_insert(
        &self,
        space: SpaceId,
        frame: Frame,
        va: VirtAddr,
        perm: PteFlags,
    ) -> Result<(), HalError> {
        if va.as_u32() >= UTOP {
            return Err(HalError::InvalidArgument);
        }
        let pdx = va.as_u32() >> 22;

        let mut spaces = self.spaces.lock();
        let s = spaces
            .spaces
            .get_mut(&space.0)
            .ok_or(HalError::InvalidArgument)?;
        if !s.tables.contains_key(&pdx) {
            let table = self.alloc_owned_frame()?;
            s.tables.insert(pdx, table);
        }

        let mut frames = self.frames.lock();
        // Increment first so remapping the same frame never frees it
        frames.incref(frame);
        if let Some((old, _)) = s.pages.insert(va.vpn(), (frame, perm | PteFlags::PRESENT)) {
            frames.decref(old);
        }
        Ok(())
    }

    fn page_lookup(&self, space: SpaceId, va: VirtAddr) -> Option<(Frame, PteFlags)> {
        let vpn = va.vpn();
        if va.as_u32() >= UTOP {
            return self.kernel_shared.get(&vpn).copied();
        }
        let spaces = self.spaces.lock();
        spaces.spaces.get(&space.0)?.pages.get(&vpn).copied()
    }

    fn page_remove(&self, space: SpaceId, va: VirtAddr) {
        let mut spaces = self.spaces.lock();
        let Some(s) = spaces.spaces.get_mut(&space.0) else {
            return;
        };
        if let Some((frame, _)) = s.pages.remove(&va.vpn()) {
            self.frames.lock().decref(frame);
        }
    }

    fn user_pages(&self, space: SpaceId) -> Vec<(VirtAddr, Frame, PteFlags)> {
        let spaces = self.spaces.lock();
        spaces
            .spaces
            .get(&space.0)
            .map(|s| {
                s.pages
                    .iter()
                    .map(|(vpn, (frame, perm))| (VirtAddr::new(vpn << PGSHIFT), *frame, *perm))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn activate(&self, cpu: CpuId, space: Option<SpaceId>) {
        if let Some(c) = self.cpus.get(cpu) {
            *c.active.lock() = space;
        }
    }

    fn fault_address(&self, cpu: CpuId) -> VirtAddr {
        self.cpus
            .get(cpu)
            .map_or(VirtAddr::new(0), |c| VirtAddr::new(c.fault_va.load(Ordering::SeqCst)))
    }

    fn eoi(&self, cpu: CpuId) {
        if let Some(c) = self.cpus.get(cpu) {
            c.eois.inc();
        }
    }

    fn send_ipi(&self, cpu: CpuId, vector: u32) {
        if let Some(c) = self.cpus.get(cpu) {
            c.ipis.lock().push(vector);
        }
    }

    fn time_tick(&self) {
        self.ticks.inc();
    }

    fn time_msec(&self) -> u32 {
        self.ticks.get().wrapping_mul(TICK_MS)
    }

    fn device_interrupt(&self, irq: u32) -> Result<(), HalError> {
        match irq {
            IRQ_KBD | IRQ_SERIAL | IRQ_NIC | IRQ_IDE => {
                self.device_irqs.lock().push(irq);
                Ok(())
            }
            _ => Err(HalError::NotSupported),
        }
    }

    fn console_write(&self, text: &str) {
        self.console.lock().push_str(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> MockMachine {
        MockMachine::new(2, 64)
    }

    #[test]
    fn test_frame_refcounting() {
        let m = machine();
        let before = m.free_frames();
        let f = m.frame_alloc().unwrap();
        assert_eq!(m.free_frames(), before - 1);
        assert_eq!(m.frame_refcount(f), 0);

        m.frame_incref(f);
        m.frame_incref(f);
        m.frame_decref(f);
        assert_eq!(m.frame_refcount(f), 1);
        m.frame_decref(f);
        assert_eq!(m.free_frames(), before);
    }

    #[test]
    fn test_frame_free_ignores_referenced_frames() {
        let m = machine();
        let f = m.frame_alloc().unwrap();
        m.frame_incref(f);
        let before = m.free_frames();
        m.frame_free(f);
        assert_eq!(m.free_frames(), before);
    }

    #[test]
    fn test_frame_contents() {
        let m = machine();
        let f = m.frame_alloc().unwrap();
        m.frame_zero(f);
        m.frame_write(f, 100, b"exo");
        let mut buf = [0u8; 5];
        m.frame_read(f, 99, &mut buf);
        assert_eq!(&buf, b"\0exo\0");
    }

    #[test]
    fn test_fresh_space_has_only_kernel_mappings() {
        let m = machine();
        let s = m.space_create().unwrap();
        assert!(m.user_pages(s).is_empty());
        let (_, perm) = m.page_lookup(s, VirtAddr::new(UENVS)).unwrap();
        assert_eq!(perm, PteFlags::USER_PRESENT);
    }

    #[test]
    fn test_insert_replace_and_remove() {
        let m = machine();
        let s = m.space_create().unwrap();
        let a = m.frame_alloc().unwrap();
        let b = m.frame_alloc().unwrap();
        let va = VirtAddr::new(0x0080_0000);

        m.page_insert(s, a, va, PteFlags::USER_RW).unwrap();
        assert_eq!(m.frame_refcount(a), 1);

        // Same frame again: permissions change, frame survives
        m.page_insert(s, a, va, PteFlags::USER_PRESENT).unwrap();
        assert_eq!(m.frame_refcount(a), 1);
        assert_eq!(m.page_lookup(s, va).unwrap().1, PteFlags::USER_PRESENT);

        m.page_insert(s, b, va, PteFlags::USER_RW).unwrap();
        assert_eq!(m.frame_refcount(a), 0);
        assert_eq!(m.page_lookup(s, va).unwrap().0, b);

        m.page_remove(s, va);
        m.page_remove(s, va);
        assert!(m.page_lookup(s, va).is_none());
    }

    #[test]
    fn test_insert_above_utop_rejected() {
        let m = machine();
        let s = m.space_create().unwrap();
        let f = m.frame_alloc().unwrap();
        assert_eq!(
            m.page_insert(s, f, VirtAddr::new(UTOP), PteFlags::USER_RW),
            Err(HalError::InvalidArgument)
        );
    }

    #[test]
    fn test_space_destroy_releases_everything() {
        let m = machine();
        let before = m.free_frames();
        let s = m.space_create().unwrap();
        let f = m.frame_alloc().unwrap();
        m.page_insert(s, f, VirtAddr::new(0x1000), PteFlags::USER_RW)
            .unwrap();
        m.page_remove(s, VirtAddr::new(0x1000));
        assert!(m.space_exists(s));
        m.space_destroy(s);
        assert!(!m.space_exists(s));
        assert_eq!(m.free_frames(), before);
        assert_eq!(m.space_count(), 0);
    }

    #[test]
    fn test_out_of_frames() {
        let m = MockMachine::new(1, 3);
        // two frames back the kernel-shared windows
        let _s = m.space_create().unwrap();
        assert_eq!(m.space_create(), Err(HalError::OutOfMemory));
    }

    #[test]
    fn test_mmu_checks_permissions() {
        let m = machine();
        let s = m.space_create().unwrap();
        let f = m.frame_alloc().unwrap();
        m.frame_zero(f);
        let va = VirtAddr::new(0x0080_1000);
        m.page_insert(s, f, va, PteFlags::USER_PRESENT).unwrap();

        let mut b = [0u8; 1];
        assert!(m.user_read(s, va, &mut b).is_ok());

        let fault = m.user_write(s, va, &[1]).unwrap_err();
        assert_eq!(fault.va, va);
        assert_eq!(fault.err, FEC_U | FEC_WR | FEC_PR);

        let fault = m.user_read(s, VirtAddr::new(0x0090_0000), &mut b).unwrap_err();
        assert_eq!(fault.err, FEC_U);

        // kernel-shared windows are readable but never writable
        assert!(m.user_read(s, VirtAddr::new(UENVS), &mut b).is_ok());
        assert!(m.user_write(s, VirtAddr::new(UENVS), &[1]).is_err());
    }

    #[test]
    fn test_cpu_bookkeeping() {
        let m = machine();
        m.eoi(1);
        m.send_ipi(0, 50);
        m.set_fault_address(1, VirtAddr::new(0xdead_0000));
        m.time_tick();
        m.time_tick();

        assert_eq!(m.eoi_count(1), 1);
        assert_eq!(m.eoi_count(0), 0);
        assert_eq!(m.ipis(0), alloc::vec![50]);
        assert_eq!(m.fault_address(1), VirtAddr::new(0xdead_0000));
        assert_eq!(m.time_msec(), 2 * TICK_MS);
        assert!(m.device_interrupt(IRQ_KBD).is_ok());
        assert_eq!(m.device_interrupt(3), Err(HalError::NotSupported));
    }
}
