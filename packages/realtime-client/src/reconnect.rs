//! Single-flight reconnect scheduling

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info};

use crate::scheduler::ScheduledTask;

/// Schedules at most one deferred reconnect at a time
///
/// The delay is constant: every failure waits the same amount of time,
/// there is no backoff growth. Scheduling while an attempt is pending
/// discards the pending one.
#[derive(Debug)]
pub struct ReconnectPolicy {
    delay: Duration,
    pending: Option<ScheduledTask>,
}

impl ReconnectPolicy {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    /// Run `attempt` after the fixed delay, cancelling any pending attempt
    pub fn schedule<F>(&mut self, attempt: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.cancel() {
            debug!("Replaced pending reconnect attempt");
        }

        info!(delay_ms = self.delay.as_millis() as u64, "Reconnect scheduled");
        self.pending = Some(ScheduledTask::after(self.delay, attempt));
    }

    /// Cancel the pending attempt; returns whether one was pending
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(task) => {
                let was_pending = !task.is_finished();
                task.cancel();
                was_pending
            }
            None => false,
        }
    }

    /// Take the pending attempt without aborting it
    pub(crate) fn detach(&mut self) -> Option<ScheduledTask> {
        self.pending.take()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_attempt(
        counter: &Arc<AtomicUsize>,
    ) -> impl Future<Output = ()> + Send + 'static {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_fixed_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut policy = ReconnectPolicy::new(Duration::from_millis(1_500));
        policy.schedule(counting_attempt(&fired));
        assert!(policy.is_pending());

        tokio::time::sleep(Duration::from_millis(1_400)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!policy.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_schedule_cancels_first() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut policy = ReconnectPolicy::new(Duration::from_millis(1_500));

        policy.schedule(counting_attempt(&first));
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        policy.schedule(counting_attempt(&second));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failures_fire_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut policy = ReconnectPolicy::new(Duration::from_millis(1_500));
        for _ in 0..5 {
            policy.schedule(counting_attempt(&fired));
        }

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut policy = ReconnectPolicy::new(Duration::from_millis(1_500));
        assert!(!policy.cancel());

        policy.schedule(counting_attempt(&fired));
        assert!(policy.cancel());
        assert!(!policy.is_pending());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
