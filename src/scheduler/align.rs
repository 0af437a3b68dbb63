//! Session-aligned run-daily planning
//!
//! Computes, for "run every `delta` while the market is open", what to do
//! right now given the current time-of-day and the market's four session
//! boundaries. The result is either "start repeating immediately" (already
//! on an aligned instant) or "wake once at a later instant, run, then start
//! repeating". Boundaries are treated closed-open: `[open, close)`.

use crate::market::Session;
use chrono::{Duration, NaiveDateTime};

/// What the caller should install for a session-aligned repeating task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunDailyPlan {
    /// Already on an aligned instant; begin repeating every delta now
    StartNow,
    /// Wake once at this instant, run, then begin repeating
    WakeAt(NaiveDateTime),
    /// Past the afternoon close; wake at `open1` of the next trading day
    WakeNextTradingDay,
}

/// Plan the first fire for a session-aligned repeating task.
///
/// `every` must be positive; the caller validates that at registration.
pub fn plan_run_daily(now: NaiveDateTime, session: &Session, every: Duration) -> RunDailyPlan {
    let today = now.date();
    let t = now.time();

    if t < session.open1 {
        RunDailyPlan::WakeAt(today.and_time(session.open1))
    } else if t < session.close1 {
        align_within_session(now, today.and_time(session.open1), every)
    } else if t < session.open2 {
        RunDailyPlan::WakeAt(today.and_time(session.open2))
    } else if t < session.close2 {
        align_within_session(now, today.and_time(session.open2), every)
    } else {
        RunDailyPlan::WakeNextTradingDay
    }
}

/// Alignment arithmetic anchored at a session open: if `now - anchor` is a
/// whole multiple of `every` the task is already aligned, otherwise the next
/// aligned boundary after `now` is the wake instant.
fn align_within_session(
    now: NaiveDateTime,
    anchor: NaiveDateTime,
    every: Duration,
) -> RunDailyPlan {
    let ticks = (now - anchor).num_milliseconds();
    let delta = every.num_milliseconds();
    if ticks % delta == 0 {
        RunDailyPlan::StartNow
    } else {
        let next = (ticks / delta + 1) * delta;
        RunDailyPlan::WakeAt(anchor + Duration::milliseconds(next))
    }
}
