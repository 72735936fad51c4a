// Countdown behind the ',' opcode. One unit is a fixed number of clock
// cycles, the core ticks it once per cycle while it waits.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayTimer {
    cycles_per_unit: u32,
    remaining: u64,
}

impl DelayTimer {
    pub fn new(cycles_per_unit: u32) -> DelayTimer {
        DelayTimer {
            cycles_per_unit: cycles_per_unit,
            remaining: 0,
        }
    }

    // Returns false for a zero length wait, which never starts.
    pub fn start(&mut self, units: u8) -> bool {
        self.remaining = units as u64 * self.cycles_per_unit as u64;
        self.remaining > 0
    }

    // True on the tick that runs the timer out.
    pub fn tick(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        self.remaining == 0
    }

    pub fn is_active(&self) -> bool {
        self.remaining > 0
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn cancel(&mut self) {
        self.remaining = 0;
    }
}

// Testing ////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod delay_tests {
    use super::*;

    #[test]
    fn test_expires_after_exact_cycles() {
        let mut timer = DelayTimer::new(3);
        assert!(timer.start(2));
        for _ in 0..5 {
            assert!(!timer.tick());
        }
        assert!(timer.tick());
        assert!(!timer.is_active());
        assert!(!timer.tick());
    }

    #[test]
    fn test_zero_units() {
        let mut timer = DelayTimer::new(10_000);
        assert!(!timer.start(0));
        assert!(!timer.is_active());
    }

    #[test]
    fn test_large_wait_does_not_overflow() {
        let mut timer = DelayTimer::new(u32::MAX);
        assert!(timer.start(255));
        assert_eq!(timer.remaining(), 255 * u32::MAX as u64);
        timer.cancel();
        assert_eq!(timer.remaining(), 0);
    }
}
