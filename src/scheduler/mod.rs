//! Timer scheduler
//!
//! An independent timer facility: one-shot, daily-at-a-fixed-time, and
//! interval-repeating triggers. Timers run as their own tasks and may fire
//! concurrently, but a fire never executes the bound closure directly; it
//! enqueues it onto the event queue, preserving the single-consumer
//! serialization guarantee. All registrations are rejected or accepted
//! synchronously; stop is idempotent and shared by every timer.

mod align;

pub use align::{plan_run_daily, RunDailyPlan};

use crate::executor::EventQueue;
use chrono::{Duration, Local, NaiveDateTime, NaiveTime};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

/// A closure bound to a timer; cloned per fire
pub type TaskFn = Arc<dyn Fn() + Send + Sync + 'static>;

/// Opaque timer identity, used for logging and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(Uuid);

impl TimerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registration errors, surfaced synchronously to the caller
#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    /// A daily task already exists at this time-of-day
    #[error("A task is already registered at {0}")]
    DuplicateDailyTask(NaiveTime),
    /// Repeat interval must be positive
    #[error("Repeat interval must be positive, got {0:?}")]
    InvalidInterval(Duration),
}

struct Inner {
    queue: EventQueue,
    stop_tx: watch::Sender<bool>,
    daily: Mutex<HashSet<NaiveTime>>,
}

/// Shared scheduler handle; cheap to clone
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Create a scheduler that enqueues fires onto `queue`
    pub fn new(queue: EventQueue) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                queue,
                stop_tx,
                daily: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Stop every timer; safe to call more than once
    pub fn stop(&self) {
        let _ = self.inner.stop_tx.send(true);
        tracing::debug!("Scheduler stop requested");
    }

    /// True once stop has been requested
    pub fn is_stopped(&self) -> bool {
        *self.inner.stop_tx.borrow()
    }

    /// Fire once at an absolute instant (fires immediately when already past)
    pub fn at(&self, when: NaiveDateTime, task: TaskFn) -> TimerId {
        let id = TimerId::new();
        let queue = self.inner.queue.clone();
        let mut stop = self.inner.stop_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep_until(when) => {
                    fire(&queue, &task, id);
                }
                _ = stop.wait_for(|s| *s) => {}
            }
        });
        tracing::debug!(timer = %id, when = %when, "Registered one-shot timer");
        id
    }

    /// Fire once per calendar day at the given time-of-day, indefinitely.
    ///
    /// A second registration at an already-registered time-of-day is rejected.
    pub fn every_day_at(
        &self,
        time_of_day: NaiveTime,
        task: TaskFn,
    ) -> Result<TimerId, SchedulerError> {
        {
            let mut daily = self
                .inner
                .daily
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !daily.insert(time_of_day) {
                return Err(SchedulerError::DuplicateDailyTask(time_of_day));
            }
        }

        let id = TimerId::new();
        let queue = self.inner.queue.clone();
        let mut stop = self.inner.stop_tx.subscribe();
        tokio::spawn(async move {
            loop {
                let now = now_local();
                let mut next = now.date().and_time(time_of_day);
                if next <= now {
                    next += Duration::days(1);
                }
                tokio::select! {
                    _ = sleep_until(next) => {
                        fire(&queue, &task, id);
                    }
                    _ = stop.wait_for(|s| *s) => return,
                }
            }
        });
        tracing::debug!(timer = %id, time_of_day = %time_of_day, "Registered daily timer");
        Ok(id)
    }

    /// Fire at `start`, then every `every`, up to `max_fires` times
    /// (`None` = unbounded)
    pub fn repeating(
        &self,
        start: NaiveDateTime,
        every: Duration,
        max_fires: Option<u64>,
        task: TaskFn,
    ) -> Result<TimerId, SchedulerError> {
        if every <= Duration::zero() {
            return Err(SchedulerError::InvalidInterval(every));
        }
        // Positive chrono duration always converts
        let period = every
            .to_std()
            .map_err(|_| SchedulerError::InvalidInterval(every))?;

        let id = TimerId::new();
        let queue = self.inner.queue.clone();
        let mut stop = self.inner.stop_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep_until(start) => {}
                _ = stop.wait_for(|s| *s) => return,
            }
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut fired = 0u64;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop.wait_for(|s| *s) => return,
                }
                if !fire(&queue, &task, id) {
                    return;
                }
                fired += 1;
                if let Some(max) = max_fires {
                    if fired >= max {
                        tracing::debug!(timer = %id, fired, "Repeating timer exhausted");
                        return;
                    }
                }
            }
        });
        tracing::debug!(timer = %id, start = %start, every = ?every, "Registered repeating timer");
        Ok(id)
    }
}

/// Current exchange-local wall time
pub(crate) fn now_local() -> NaiveDateTime {
    Local::now().naive_local()
}

async fn sleep_until(when: NaiveDateTime) {
    let delta = when - now_local();
    if delta > Duration::zero() {
        if let Ok(d) = delta.to_std() {
            tokio::time::sleep(d).await;
        }
    }
}

/// Enqueue one fire; returns false once the executor is gone
fn fire(queue: &EventQueue, task: &TaskFn, id: TimerId) -> bool {
    let t = task.clone();
    match queue.post(move || t()) {
        Ok(()) => {
            metrics::counter!("quantrun_timer_fires_total").increment(1);
            true
        }
        Err(_) => {
            tracing::debug!(timer = %id, "Event queue closed, stopping timer");
            false
        }
    }
}
