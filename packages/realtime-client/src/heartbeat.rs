//! Periodic keep-alive on the active connection

use std::future::Future;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::RealtimeResult;
use crate::scheduler::ScheduledTask;

/// Fires a keep-alive callback at a fixed interval while armed
///
/// The first beat happens one full interval after `start`. Send failures are
/// logged and the loop keeps going: a dead socket is detected by the receive
/// loop, which owns recovery.
#[derive(Debug)]
pub struct HeartbeatScheduler {
    interval: Duration,
    task: Option<ScheduledTask>,
}

impl HeartbeatScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            task: None,
        }
    }

    /// Start beating, replacing any running heartbeat
    pub fn start<F, Fut>(&mut self, mut beat: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = RealtimeResult<()>> + Send + 'static,
    {
        self.stop();

        let period = self.interval;
        self.task = Some(ScheduledTask::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match beat().await {
                    Ok(()) => debug!("Heartbeat sent"),
                    Err(e) => warn!(error = %e, "Heartbeat send failed"),
                }
            }
        }));
        debug!(interval_ms = period.as_millis() as u64, "Heartbeat started");
    }

    /// Stop beating; returns whether a heartbeat was running
    pub fn stop(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                task.cancel();
                debug!("Heartbeat stopped");
                true
            }
            None => false,
        }
    }

    /// Stop beating and hand the task back so the caller can wait for it
    pub(crate) fn detach(&mut self) -> Option<ScheduledTask> {
        self.task.take()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}
