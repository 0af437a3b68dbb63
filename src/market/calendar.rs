//! Trading calendar provider
//!
//! Supplies trading dates, per-market session boundaries, and holidays.
//! The core only ever reads from this seam.

use super::KQuery;
use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use std::collections::{HashMap, HashSet};

/// A market's trading hours: two open/close windows per day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    /// Morning open
    pub open1: NaiveTime,
    /// Morning close
    pub close1: NaiveTime,
    /// Afternoon open
    pub open2: NaiveTime,
    /// Afternoon close
    pub close2: NaiveTime,
}

impl Session {
    /// True when the time-of-day falls inside either trading window.
    ///
    /// Both windows are treated as closed intervals, matching how the
    /// run-daily session gate admits a fire landing exactly on a close.
    pub fn contains(&self, t: NaiveTime) -> bool {
        (t >= self.open1 && t <= self.close1) || (t >= self.open2 && t <= self.close2)
    }
}

/// Trait for trading calendar implementations
pub trait MarketCalendar: Send + Sync {
    /// Ordered trading dates covered by the query, possibly empty
    fn trading_dates(&self, query: &KQuery) -> Vec<NaiveDate>;

    /// Session boundaries for a market
    fn session(&self, market: &str) -> anyhow::Result<Session>;

    /// True for configured non-trading dates (weekends excluded separately)
    fn is_holiday(&self, date: NaiveDate) -> bool;

    /// First trading day strictly after `after`
    fn next_trading_day(&self, after: NaiveDate) -> NaiveDate {
        let mut day = after + Duration::days(1);
        while is_weekend(day) || self.is_holiday(day) {
            day += Duration::days(1);
        }
        day
    }
}

/// True for Saturday and Sunday
pub(crate) fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// In-memory calendar: weekday dates minus configured holidays
#[derive(Debug, Clone, Default)]
pub struct StaticCalendar {
    sessions: HashMap<String, Session>,
    holidays: HashSet<NaiveDate>,
}

impl StaticCalendar {
    /// Create an empty calendar
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a market's session boundaries
    pub fn with_session(mut self, market: impl Into<String>, session: Session) -> Self {
        self.sessions.insert(market.into(), session);
        self
    }

    /// Register a holiday
    pub fn with_holiday(mut self, date: NaiveDate) -> Self {
        self.holidays.insert(date);
        self
    }
}

impl MarketCalendar for StaticCalendar {
    fn trading_dates(&self, query: &KQuery) -> Vec<NaiveDate> {
        if query.end < query.start {
            return vec![];
        }
        let mut dates = Vec::new();
        let mut day = query.start;
        while day <= query.end {
            if !is_weekend(day) && !self.is_holiday(day) {
                dates.push(day);
            }
            day += Duration::days(1);
        }
        dates
    }

    fn session(&self, market: &str) -> anyhow::Result<Session> {
        self.sessions
            .get(market)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("No session info for market {}", market))
    }

    fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::KType;

    fn cn_session() -> Session {
        Session {
            open1: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            close1: NaiveTime::from_hms_opt(11, 30, 0).unwrap(),
            open2: NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
            close2: NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_session_contains() {
        let s = cn_session();
        assert!(s.contains(NaiveTime::from_hms_opt(10, 0, 0).unwrap()));
        assert!(s.contains(NaiveTime::from_hms_opt(11, 30, 0).unwrap()));
        assert!(!s.contains(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
        assert!(s.contains(NaiveTime::from_hms_opt(13, 0, 0).unwrap()));
        assert!(!s.contains(NaiveTime::from_hms_opt(15, 0, 1).unwrap()));
    }

    #[test]
    fn test_trading_dates_skip_weekends_and_holidays() {
        // 2024-01-01 is a Monday holiday; 2024-01-06/07 is a weekend
        let cal = StaticCalendar::new()
            .with_holiday(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let query = KQuery::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 8).unwrap(),
            KType::Day,
        );
        let dates = cal.trading_dates(&query);
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 4).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 8).unwrap(),
            ]
        );
    }

    #[test]
    fn test_trading_dates_inverted_range_is_empty() {
        let cal = StaticCalendar::new();
        let query = KQuery::new(
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            KType::Day,
        );
        assert!(cal.trading_dates(&query).is_empty());
    }

    #[test]
    fn test_next_trading_day_skips_weekend_and_holiday() {
        // Friday 2024-01-05 -> Monday 2024-01-08 is a holiday -> Tuesday
        let cal = StaticCalendar::new()
            .with_holiday(NaiveDate::from_ymd_opt(2024, 1, 8).unwrap());
        let next = cal.next_trading_day(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        assert_eq!(next, NaiveDate::from_ymd_opt(2024, 1, 9).unwrap());
    }

    #[test]
    fn test_session_missing_market() {
        let cal = StaticCalendar::new();
        assert!(cal.session("SH").is_err());
    }

    #[test]
    fn test_session_lookup() {
        let cal = StaticCalendar::new().with_session("SH", cn_session());
        let s = cal.session("SH").unwrap();
        assert_eq!(s.open1, NaiveTime::from_hms_opt(9, 30, 0).unwrap());
    }
}
