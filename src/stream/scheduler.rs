//! Periodic trigger driving poll iterations.
//!
//! Each tick spawns the bound action onto a task tracker and goes back to
//! waiting, so a slow action never delays the next tick and ticks may overlap.
//! Targets advance by whole periods from the previous target, not from the
//! time the tick actually fired.

use crate::runtime::config::PollingMode;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub type TickAction = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

pub struct Scheduler {
    mode: PollingMode,
    action: TickAction,
    timer: Arc<Mutex<TimerSlot>>,
    in_flight: TaskTracker,
}

#[derive(Default)]
struct TimerSlot {
    token: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
    ticks: u64,
}

impl Scheduler {
    pub fn new(mode: PollingMode, action: TickAction) -> Self {
        Self {
            mode,
            action,
            timer: Arc::new(Mutex::new(TimerSlot::default())),
            in_flight: TaskTracker::new(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        if lock(&self.timer).token.is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    /// Number of ticks fired since the scheduler was created.
    #[cfg(test)]
    fn ticks(&self) -> u64 {
        lock(&self.timer).ticks
    }

    /// Spawns the periodic timer unless it is already running or polling is manual.
    ///
    /// Returns whether a timer was started. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<bool> {
        let PollingMode::Interval(period) = self.mode else {
            tracing::trace!("manual polling mode; scheduler start ignored");
            return Ok(false);
        };

        let mut slot = lock(&self.timer);
        if slot.token.is_some() {
            return Ok(false);
        }

        let runtime = Handle::try_current().context("scheduler requires a tokio runtime")?;
        let token = CancellationToken::new();
        let handle = runtime.spawn(run_timer(
            period,
            self.action.clone(),
            token.clone(),
            self.timer.clone(),
            self.in_flight.clone(),
        ));
        slot.token = Some(token);
        slot.handle = Some(handle);

        tracing::debug!(period_ms = period.as_millis() as u64, "scheduler started");
        Ok(true)
    }

    pub fn resume(&self) -> Result<bool> {
        self.start()
    }

    /// Stops the timer. Once this returns no further tick fires; ticks already
    /// fired keep running. Returns whether the timer was running.
    pub fn pause(&self) -> bool {
        let mut slot = lock(&self.timer);
        let Some(token) = slot.token.take() else {
            return false;
        };
        token.cancel();
        // The timer task exits on its own after observing the token.
        slot.handle.take();

        tracing::debug!("scheduler paused");
        true
    }

    /// Waits for every action spawned by a tick to finish.
    pub async fn wait_idle(&self) {
        self.in_flight.close();
        self.in_flight.wait().await;
        self.in_flight.reopen();
    }

    #[cfg(test)]
    fn in_flight_ticks(&self) -> usize {
        self.in_flight.len()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.pause();
    }
}

async fn run_timer(
    period: Duration,
    action: TickAction,
    token: CancellationToken,
    timer: Arc<Mutex<TimerSlot>>,
    in_flight: TaskTracker,
) {
    let mut target = Instant::now() + period;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = sleep_until(target) => {}
        }
        target += period;

        let mut slot = lock(&timer);
        if token.is_cancelled() {
            break;
        }
        slot.ticks = slot.ticks.saturating_add(1);
        in_flight.spawn(action());
    }

    tracing::trace!("scheduler timer stopped");
}

fn lock(timer: &Mutex<TimerSlot>) -> MutexGuard<'_, TimerSlot> {
    timer.lock().unwrap_or_else(PoisonError::into_inner)
}
