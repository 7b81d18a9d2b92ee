//! Lamport clock advanced by TIMESTAMP waves.

/// Logical clock: one tick per local protocol event, merged on receipt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LamportClock {
    time: u64,
}

impl LamportClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time(&self) -> u64 {
        self.time
    }

    /// Advance for a local event and return the new time.
    pub fn tick(&mut self) -> u64 {
        self.time += 1;
        self.time
    }

    /// Merge a received time: `max(local, incoming) + 1`.
    pub fn observe(&mut self, incoming: u64) -> u64 {
        self.time = self.time.max(incoming) + 1;
        self.time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick() {
        let mut clock = LamportClock::new();
        assert_eq!(clock.tick(), 1);
        assert_eq!(clock.tick(), 2);
        assert_eq!(clock.time(), 2);
    }

    #[test]
    fn test_observe_takes_max_plus_one() {
        let mut clock = LamportClock::new();
        clock.tick();

        assert_eq!(clock.observe(10), 11);
        // An older time still advances the clock.
        assert_eq!(clock.observe(3), 12);
    }
}
