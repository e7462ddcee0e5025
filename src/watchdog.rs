/// Number of consecutive failed cycles tolerated before a forced restart.
pub const WATCHDOG_BUDGET: i32 = 10;

/// Counts down on every failed poll cycle and is refilled by a successful one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watchdog {
    remaining: i32,
}

impl Watchdog {
    pub fn new() -> Self {
        Self {
            remaining: WATCHDOG_BUDGET,
        }
    }

    pub fn decrement(&mut self) -> i32 {
        self.remaining -= 1;
        self.remaining
    }

    pub fn reset(&mut self) {
        self.remaining = WATCHDOG_BUDGET;
    }

    pub fn remaining(&self) -> i32 {
        self.remaining
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining <= 0
    }

    /// Failed cycles since the last reset.
    pub fn failures(&self) -> u32 {
        (WATCHDOG_BUDGET - self.remaining).max(0) as u32
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_with_full_budget() {
        let watchdog = Watchdog::new();
        assert_eq!(watchdog.remaining(), WATCHDOG_BUDGET);
        assert!(!watchdog.is_exhausted());
        assert_eq!(watchdog.failures(), 0);
    }

    #[test]
    fn test_exhausted_after_budget_failures() {
        let mut watchdog = Watchdog::new();
        for _ in 0..WATCHDOG_BUDGET - 1 {
            watchdog.decrement();
        }
        assert!(!watchdog.is_exhausted());
        assert_eq!(watchdog.decrement(), 0);
        assert!(watchdog.is_exhausted());
        assert_eq!(watchdog.failures(), WATCHDOG_BUDGET as u32);
    }

    #[test]
    fn test_reset_refills_budget() {
        let mut watchdog = Watchdog::new();
        watchdog.decrement();
        watchdog.decrement();
        watchdog.reset();
        assert_eq!(watchdog.remaining(), WATCHDOG_BUDGET);
    }

    #[test]
    fn test_can_go_below_zero() {
        let mut watchdog = Watchdog::new();
        for _ in 0..WATCHDOG_BUDGET + 2 {
            watchdog.decrement();
        }
        assert_eq!(watchdog.remaining(), -2);
        assert!(watchdog.is_exhausted());
    }
}
