//! Round-robin scan order.
//!
//! Slot 0 holds the idle process and is never part of a lap; the scheduler
//! only falls back to it when a full lap finds nothing runnable.

/// One scheduling lap over the process table.
///
/// Starting just after `cursor`, yields `capacity - 1` slots, wrapping at
/// the end of the table and skipping slot 0. A lap therefore visits every
/// non-idle slot exactly once, ending at the cursor itself.
#[derive(Clone, Debug)]
pub struct Lap {
    pos: usize,
    remaining: usize,
    capacity: usize,
}

impl Lap {
    pub fn new(cursor: usize, capacity: usize) -> Self {
        Self {
            pos: if capacity == 0 { 0 } else { cursor % capacity },
            remaining: capacity.saturating_sub(1),
            capacity,
        }
    }
}

impl Iterator for Lap {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let next = (self.pos + 1) % self.capacity;
        self.pos = if next == 0 { 1 } else { next };
        Some(self.pos)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn test_lap_from_start() {
        let lap: Vec<_> = Lap::new(0, 5).collect();
        assert_eq!(lap, [1, 2, 3, 4]);
    }

    #[test]
    fn test_lap_wraps_and_ends_at_cursor() {
        let lap: Vec<_> = Lap::new(2, 5).collect();
        assert_eq!(lap, [3, 4, 1, 2]);
    }

    #[test]
    fn test_lap_from_last_slot_skips_idle() {
        let lap: Vec<_> = Lap::new(4, 5).collect();
        assert_eq!(lap, [1, 2, 3, 4]);
    }

    #[test]
    fn test_tiny_tables() {
        assert_eq!(Lap::new(0, 2).collect::<Vec<_>>(), [1]);
        assert_eq!(Lap::new(1, 2).collect::<Vec<_>>(), [1]);
        assert_eq!(Lap::new(0, 1).count(), 0);
        assert_eq!(Lap::new(0, 0).count(), 0);
    }

    #[test]
    fn test_every_non_idle_slot_once() {
        for cursor in 0..8 {
            let mut lap: Vec<_> = Lap::new(cursor, 8).collect();
            lap.sort_unstable();
            assert_eq!(lap, (1..8).collect::<Vec<_>>());
        }
    }
}
