//! Strategy runtime
//!
//! Owns the wiring: context, calendar, clock, event queue, and scheduler.
//! Callbacks are registered up front, then `start` installs the scheduled
//! tasks, connects the quote feed, and drives the event loop until the stop
//! handle poisons the queue. `backtest` is the separate time-travel path: it
//! never runs the event loop, it steps the shared clock through the trading
//! calendar and invokes the bar callback inline.

use crate::clock::Clock;
use crate::executor::{EventError, EventHandle, EventQueue, Executor};
use crate::market::{is_weekend, KQuery, KType, MarketCalendar, Stock};
use crate::quote::{QuoteFeed, SpotAgent, SpotRecord};
use crate::scheduler::{
    now_local, plan_run_daily, RunDailyPlan, Scheduler, SchedulerError, TaskFn,
};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Immutable per-run configuration: the stock universe and K-line granularities
#[derive(Debug, Clone)]
pub struct StrategyContext {
    /// Stocks the strategy observes
    pub stock_list: Vec<Stock>,
    /// K-line granularities the strategy consumes
    pub ktype_list: Vec<KType>,
    /// First date of interest
    pub start_date: NaiveDate,
}

impl StrategyContext {
    /// Create a context
    pub fn new(stock_list: Vec<Stock>, ktype_list: Vec<KType>, start_date: NaiveDate) -> Self {
        Self {
            stock_list,
            ktype_list,
            start_date,
        }
    }
}

/// Read-only view passed to strategy callbacks; cheap to clone
#[derive(Clone)]
pub struct StrategyHandle {
    context: Arc<StrategyContext>,
    clock: Clock,
    calendar: Arc<dyn MarketCalendar>,
}

impl StrategyHandle {
    /// The run's context
    pub fn context(&self) -> &StrategyContext {
        &self.context
    }

    /// The trading calendar
    pub fn calendar(&self) -> &Arc<dyn MarketCalendar> {
        &self.calendar
    }

    /// Current instant (virtual during a backtest)
    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// Current date (virtual during a backtest)
    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// One period after now during a backtest, `None` live
    pub fn next_instant(&self) -> Option<NaiveDateTime> {
        self.clock.next_instant()
    }

    /// True while a backtest owns the clock
    pub fn is_backtesting(&self) -> bool {
        self.clock.is_backtesting()
    }

    /// Look up a context stock by market and code
    pub fn find_stock(&self, market: &str, code: &str) -> Option<&Stock> {
        self.context
            .stock_list
            .iter()
            .find(|s| s.market == market && s.code == code)
    }
}

/// Callback for a spot record affecting a context stock
pub type ChangeFn = Arc<dyn Fn(&StrategyHandle, &Stock, &SpotRecord) + Send + Sync + 'static>;
/// Callback invoked once per delivered spot batch
pub type ReceivedFn = Arc<dyn Fn(&StrategyHandle, NaiveDateTime) + Send + Sync + 'static>;
/// Callback for scheduled triggers
pub type DailyFn = Arc<dyn Fn(&StrategyHandle) + Send + Sync + 'static>;

struct RunDaily {
    f: DailyFn,
    every: Duration,
    market: String,
    ignore_session: bool,
}

struct RunDailyAt {
    f: DailyFn,
    skip_holiday: bool,
}

/// Cloneable stop entry point; safe to call from any task, idempotent.
///
/// The hosting application owns signal handling and calls `request_stop`
/// from its handler; the runtime never touches OS signals itself.
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    queue: EventQueue,
    scheduler: Scheduler,
}

impl StopHandle {
    /// Stop the scheduler and poison the event queue, exactly once
    pub fn request_stop(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            tracing::info!("Stop requested");
            self.scheduler.stop();
            self.queue.poison();
        }
    }

    /// True once stop has been requested
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// The strategy runtime
pub struct Strategy {
    name: String,
    context: Arc<StrategyContext>,
    calendar: Arc<dyn MarketCalendar>,
    clock: Clock,
    queue: EventQueue,
    executor: Option<Executor>,
    scheduler: Scheduler,
    stop_flag: Arc<AtomicBool>,
    on_change: Option<ChangeFn>,
    on_received_spot: Option<ReceivedFn>,
    run_daily: Option<RunDaily>,
    run_daily_at: BTreeMap<NaiveTime, RunDailyAt>,
}

impl Strategy {
    /// Create a runtime over a context and calendar
    pub fn new(
        name: impl Into<String>,
        context: StrategyContext,
        calendar: Arc<dyn MarketCalendar>,
    ) -> Self {
        let (queue, executor) = EventQueue::new();
        let scheduler = Scheduler::new(queue.clone());
        Self {
            name: name.into(),
            context: Arc::new(context),
            calendar,
            clock: Clock::new(),
            queue,
            executor: Some(executor),
            scheduler,
            stop_flag: Arc::new(AtomicBool::new(false)),
            on_change: None,
            on_received_spot: None,
            run_daily: None,
            run_daily_at: BTreeMap::new(),
        }
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Callback view shared with scheduled and quote-driven closures
    pub fn handle(&self) -> StrategyHandle {
        StrategyHandle {
            context: self.context.clone(),
            clock: self.clock.clone(),
            calendar: self.calendar.clone(),
        }
    }

    /// Stop entry point for the hosting application
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: self.stop_flag.clone(),
            queue: self.queue.clone(),
            scheduler: self.scheduler.clone(),
        }
    }

    /// Submit ad-hoc work onto the event loop
    pub fn submit(
        &self,
        f: impl FnOnce() + Send + 'static,
    ) -> Result<EventHandle, EventError> {
        self.queue.submit(f)
    }

    /// Register the per-spot-record callback
    pub fn on_change(&mut self, f: impl Fn(&StrategyHandle, &Stock, &SpotRecord) + Send + Sync + 'static) {
        self.on_change = Some(Arc::new(f));
    }

    /// Register the per-spot-batch callback
    pub fn on_received_spot(
        &mut self,
        f: impl Fn(&StrategyHandle, NaiveDateTime) + Send + Sync + 'static,
    ) {
        self.on_received_spot = Some(Arc::new(f));
    }

    /// Run `f` every `every` while `market` is in session, aligned to the
    /// session opens; with `ignore_session` it repeats unconditionally from
    /// start instead.
    pub fn run_daily(
        &mut self,
        f: impl Fn(&StrategyHandle) + Send + Sync + 'static,
        every: Duration,
        market: impl Into<String>,
        ignore_session: bool,
    ) -> Result<(), SchedulerError> {
        if every <= Duration::zero() {
            return Err(SchedulerError::InvalidInterval(every));
        }
        self.run_daily = Some(RunDaily {
            f: Arc::new(f),
            every,
            market: market.into(),
            ignore_session,
        });
        Ok(())
    }

    /// Run `f` once per day at `time_of_day`; with `skip_holiday` the fire is
    /// suppressed on weekends and configured holidays. A second registration
    /// at the same time-of-day is rejected.
    pub fn run_daily_at(
        &mut self,
        time_of_day: NaiveTime,
        f: impl Fn(&StrategyHandle) + Send + Sync + 'static,
        skip_holiday: bool,
    ) -> Result<(), SchedulerError> {
        if self.run_daily_at.contains_key(&time_of_day) {
            return Err(SchedulerError::DuplicateDailyTask(time_of_day));
        }
        self.run_daily_at.insert(
            time_of_day,
            RunDailyAt {
                f: Arc::new(f),
                skip_holiday,
            },
        );
        Ok(())
    }

    /// Install scheduled tasks, wire the quote feed, and drive the event loop
    /// until stopped.
    pub async fn start(&mut self, feed: Option<Arc<dyn QuoteFeed>>) -> anyhow::Result<()> {
        if self.on_change.is_none()
            && self.on_received_spot.is_none()
            && self.run_daily.is_none()
            && self.run_daily_at.is_empty()
        {
            tracing::warn!("No process function is set");
        }
        anyhow::ensure!(
            !self.context.stock_list.is_empty(),
            "The context does not contain any stocks"
        );
        let executor = self
            .executor
            .take()
            .ok_or_else(|| anyhow::anyhow!("Strategy already started"))?;

        self.install_run_daily_at()?;
        if let Some(feed) = feed {
            self.start_spot_agent(feed.as_ref()).await?;
        }
        self.install_run_daily()?;

        tracing::info!(name = %self.name, "Starting event loop; stop via the stop handle");
        executor.run_loop().await;
        Ok(())
    }

    /// Drive `on_bar` through the trading calendar under the virtual clock.
    ///
    /// One clock step per trading date, one K-line period per step. The stop
    /// flag is checked between iterations only. An empty trading calendar is
    /// fatal.
    pub async fn backtest<F>(
        &mut self,
        mut on_bar: F,
        start: NaiveDate,
        end: NaiveDate,
        ktype: KType,
    ) -> anyhow::Result<()>
    where
        F: FnMut(&StrategyHandle),
    {
        let query = KQuery::new(start, end, ktype);
        let dates = self.calendar.trading_dates(&query);
        anyhow::ensure!(
            !dates.is_empty(),
            "Backtest requires a non-empty trading calendar ({} to {})",
            start,
            end
        );

        tracing::info!(name = %self.name, days = dates.len(), ktype = %ktype, "Starting backtest");
        let handle = self.handle();
        self.clock
            .enter_backtest(dates[0].and_time(NaiveTime::MIN), ktype.period());
        for date in &dates {
            if self.stop_flag.load(Ordering::SeqCst) {
                tracing::info!("Backtest interrupted by stop request");
                break;
            }
            self.clock.advance_to(date.and_time(NaiveTime::MIN));
            on_bar(&handle);
        }
        self.clock.exit_backtest();
        Ok(())
    }

    fn install_run_daily_at(&mut self) -> anyhow::Result<()> {
        let handle = self.handle();
        for (time_of_day, entry) in std::mem::take(&mut self.run_daily_at) {
            let task: TaskFn = if entry.skip_holiday {
                let handle = handle.clone();
                let calendar = self.calendar.clone();
                let f = entry.f;
                Arc::new(move || {
                    let today = handle.today();
                    if !is_weekend(today) && !calendar.is_holiday(today) {
                        f(&handle);
                    }
                })
            } else {
                let handle = handle.clone();
                let f = entry.f;
                Arc::new(move || f(&handle))
            };
            self.scheduler.every_day_at(time_of_day, task)?;
        }
        Ok(())
    }

    async fn start_spot_agent(&self, feed: &dyn QuoteFeed) -> anyhow::Result<()> {
        let rx = feed.subscribe().await?;
        let mut agent = SpotAgent::new();

        if let Some(on_change) = &self.on_change {
            let queue = self.queue.clone();
            let handle = self.handle();
            let f = on_change.clone();
            agent.add_process(Arc::new(move |spot: &SpotRecord| {
                // Records outside the context universe are not dispatched
                let Some(stock) = handle.find_stock(&spot.market, &spot.code).cloned() else {
                    return;
                };
                let handle = handle.clone();
                let f = f.clone();
                let spot = spot.clone();
                if queue.post(move || f(&handle, &stock, &spot)).is_err() {
                    tracing::debug!("Event queue closed, dropping spot callback");
                }
            }));
        }

        if let Some(on_received) = &self.on_received_spot {
            let queue = self.queue.clone();
            let handle = self.handle();
            let f = on_received.clone();
            agent.add_post_process(Arc::new(move |received_at: NaiveDateTime| {
                let handle = handle.clone();
                let f = f.clone();
                if queue.post(move || f(&handle, received_at)).is_err() {
                    tracing::debug!("Event queue closed, dropping batch callback");
                }
            }));
        }

        agent.start(rx);
        Ok(())
    }

    fn install_run_daily(&mut self) -> anyhow::Result<()> {
        let Some(rd) = self.run_daily.take() else {
            return Ok(());
        };

        if rd.ignore_session {
            let handle = self.handle();
            let f = rd.f;
            let task: TaskFn = Arc::new(move || f(&handle));
            self.scheduler.repeating(now_local(), rd.every, None, task)?;
            return Ok(());
        }

        let session = self.calendar.session(&rd.market)?;
        let task: TaskFn = {
            let handle = self.handle();
            let calendar = self.calendar.clone();
            let f = rd.f;
            Arc::new(move || {
                // A repeating timer keeps firing outside the session; the
                // gate keeps execution inside trading hours and days
                let now = handle.now();
                if is_weekend(now.date()) || calendar.is_holiday(now.date()) {
                    return;
                }
                if session.contains(now.time()) {
                    f(&handle);
                }
            })
        };

        match plan_run_daily(now_local(), &session, rd.every) {
            RunDailyPlan::StartNow => {
                self.scheduler.repeating(now_local(), rd.every, None, task)?;
            }
            RunDailyPlan::WakeAt(at) => {
                self.install_wake_then_repeat(at, rd.every, task);
            }
            RunDailyPlan::WakeNextTradingDay => {
                let day = self.calendar.next_trading_day(now_local().date());
                let at = day.and_time(session.open1);
                self.install_wake_then_repeat(at, rd.every, task);
            }
        }
        Ok(())
    }

    /// One-shot wake that runs the task once, then arms the unconditional
    /// repeating timer. The transition is one-way; boundaries are never
    /// re-evaluated afterwards.
    fn install_wake_then_repeat(&self, at: NaiveDateTime, every: Duration, task: TaskFn) {
        let scheduler = self.scheduler.clone();
        let wake_task: TaskFn = Arc::new(move || {
            task();
            let next = now_local() + every;
            if let Err(e) = scheduler.repeating(next, every, None, task.clone()) {
                tracing::error!(error = %e, "Failed to arm repeating task");
            }
        });
        self.scheduler.at(at, wake_task);
    }
}
