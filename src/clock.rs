//! Backtest clock
//!
//! Resolves "now" to virtual time while a backtest drives the date sequence,
//! and to wall time otherwise, so strategy callbacks can query time uniformly.
//! Mode switches only happen between backtest iterations, never while an
//! event is executing.

use chrono::{Duration, Local, NaiveDate, NaiveDateTime};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone)]
enum Mode {
    Wall,
    Backtest { now: NaiveDateTime, step: Duration },
}

/// Shared clock handle; cheap to clone
#[derive(Debug, Clone)]
pub struct Clock {
    inner: Arc<RwLock<Mode>>,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    /// Create a clock in wall-time mode
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Mode::Wall)),
        }
    }

    /// Current instant: virtual in backtest mode, exchange-local wall time otherwise
    pub fn now(&self) -> NaiveDateTime {
        let mode = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        match &*mode {
            Mode::Wall => Local::now().naive_local(),
            Mode::Backtest { now, .. } => *now,
        }
    }

    /// Current date
    pub fn today(&self) -> NaiveDate {
        self.now().date()
    }

    /// One period after now in backtest mode; `None` in live mode
    pub fn next_instant(&self) -> Option<NaiveDateTime> {
        let mode = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        match &*mode {
            Mode::Wall => None,
            Mode::Backtest { now, step } => Some(*now + *step),
        }
    }

    /// True while a backtest owns the clock
    pub fn is_backtesting(&self) -> bool {
        let mode = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        matches!(&*mode, Mode::Backtest { .. })
    }

    /// Switch to virtual time, stepping one `step` per iteration
    pub fn enter_backtest(&self, start: NaiveDateTime, step: Duration) {
        let mut mode = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *mode = Mode::Backtest { now: start, step };
    }

    /// Move virtual now to the next iteration's instant
    pub fn advance_to(&self, instant: NaiveDateTime) {
        let mut mode = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Mode::Backtest { now, .. } = &mut *mode {
            *now = instant;
        }
    }

    /// Return to wall time
    pub fn exit_backtest(&self) {
        let mut mode = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *mode = Mode::Wall;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn test_wall_mode_has_no_next_instant() {
        let clock = Clock::new();
        assert!(!clock.is_backtesting());
        assert!(clock.next_instant().is_none());
    }

    #[test]
    fn test_backtest_mode_virtual_now() {
        let clock = Clock::new();
        clock.enter_backtest(dt(2024, 1, 2, 9, 30), Duration::minutes(5));
        assert!(clock.is_backtesting());
        assert_eq!(clock.now(), dt(2024, 1, 2, 9, 30));
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(clock.next_instant(), Some(dt(2024, 1, 2, 9, 35)));
    }

    #[test]
    fn test_advance_and_exit() {
        let clock = Clock::new();
        clock.enter_backtest(dt(2024, 1, 2, 9, 30), Duration::minutes(5));
        clock.advance_to(dt(2024, 1, 2, 9, 35));
        assert_eq!(clock.now(), dt(2024, 1, 2, 9, 35));
        clock.exit_backtest();
        assert!(!clock.is_backtesting());
        assert!(clock.next_instant().is_none());
    }

    #[test]
    fn test_clone_shares_state() {
        let clock = Clock::new();
        let other = clock.clone();
        clock.enter_backtest(dt(2024, 1, 2, 10, 0), Duration::minutes(1));
        assert_eq!(other.now(), dt(2024, 1, 2, 10, 0));
    }
}
