//! Lamport logical clock.
//!
//! A monotonically advancing counter owned by exactly one peer. Local events
//! tick it by one; receiving any message merges the remote stamp with
//! `max(local, remote) + 1`. The counter never decreases.

/// Per-peer Lamport clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct LamportClock(u64);

impl LamportClock {
    /// Create a clock at zero.
    #[inline]
    pub fn new() -> Self {
        LamportClock(0)
    }

    /// Current value without advancing.
    #[inline]
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Advance for a local event (sending a REQUEST) and return the new value.
    #[inline]
    pub fn tick(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }

    /// Merge a remote timestamp on message receipt and return the new value.
    ///
    /// Applied on every receipt regardless of message kind:
    /// `clock = max(clock, remote) + 1`.
    #[inline]
    pub fn observe(&mut self, remote: u64) -> u64 {
        self.0 = self.0.max(remote) + 1;
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_advances_by_one() {
        let mut clock = LamportClock::new();
        assert_eq!(clock.value(), 0);
        assert_eq!(clock.tick(), 1);
        assert_eq!(clock.tick(), 2);
        assert_eq!(clock.value(), 2);
    }

    #[test]
    fn test_observe_jumps_past_remote() {
        // Local clock 2 observes a stamp of 5 -> must land on 6.
        let mut clock = LamportClock::new();
        clock.tick();
        clock.tick();
        assert_eq!(clock.observe(5), 6);
    }

    #[test]
    fn test_observe_of_older_stamp_still_advances() {
        let mut clock = LamportClock::new();
        for _ in 0..10 {
            clock.tick();
        }
        // Remote stamp behind our own: advance by one, never regress.
        assert_eq!(clock.observe(3), 11);
    }

    #[test]
    fn test_monotonicity_over_mixed_sequence() {
        let mut clock = LamportClock::new();
        let mut last = clock.value();
        let stamps = [4u64, 1, 9, 9, 2, 30, 0];
        for (i, &s) in stamps.iter().enumerate() {
            let next = if i % 2 == 0 { clock.observe(s) } else { clock.tick() };
            assert!(next > last, "clock regressed: {} -> {}", last, next);
            last = next;
        }
    }
}
