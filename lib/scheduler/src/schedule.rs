//! Fixed-cadence driver for scheduled work.

use crate::work::ScheduledWork;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior, interval};
use tracing::{debug, info, warn};

fn default_poll_interval_seconds() -> u64 {
    60
}

fn default_periodic_interval_seconds() -> u64 {
    3600
}

/// How often each kind of scheduled work runs.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between continuation polls.
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    /// Seconds between periodic workflow passes.
    #[serde(default = "default_periodic_interval_seconds")]
    pub periodic_interval_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval_seconds(),
            periodic_interval_seconds: default_periodic_interval_seconds(),
        }
    }
}

/// Ticks the continuation poll and the periodic pass until shutdown.
///
/// Both run once immediately. A failed cycle is logged and the next tick
/// tries again. Ticks missed while a cycle runs long are delayed rather than
/// replayed in a burst.
pub struct Scheduler {
    work: Arc<dyn ScheduledWork>,
    poll_interval: Duration,
    periodic_interval: Duration,
}

impl Scheduler {
    #[must_use]
    pub fn new(work: Arc<dyn ScheduledWork>, config: &SchedulerConfig) -> Self {
        Self::with_intervals(
            work,
            Duration::from_secs(config.poll_interval_seconds.max(1)),
            Duration::from_secs(config.periodic_interval_seconds.max(1)),
        )
    }

    #[must_use]
    pub fn with_intervals(
        work: Arc<dyn ScheduledWork>,
        poll_interval: Duration,
        periodic_interval: Duration,
    ) -> Self {
        Self {
            work,
            poll_interval,
            periodic_interval,
        }
    }

    /// Runs until `shutdown` resolves.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut shutdown = std::pin::pin!(shutdown);
        let mut poll = ticker(self.poll_interval);
        let mut periodic = ticker(self.periodic_interval);
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            periodic_interval_secs = self.periodic_interval.as_secs(),
            "scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => break,
                _ = poll.tick() => self.poll_once().await,
                _ = periodic.tick() => self.periodic_once().await,
            }
        }

        info!("scheduler stopped");
    }

    /// Runs one continuation poll.
    pub async fn poll_once(&self) {
        match self.work.run_scheduled_actions().await {
            Ok(summary) => debug!(
                resumed = summary.resumed,
                discarded = summary.discarded,
                retained = summary.retained,
                "continuation poll finished"
            ),
            Err(e) => warn!(error = %e, "continuation poll failed"),
        }
    }

    /// Runs one periodic pass.
    pub async fn periodic_once(&self) {
        match self.work.run_periodic_workflows().await {
            Ok(summary) => info!(
                started = summary.instances_started,
                skipped = summary.skipped,
                failed = summary.failed,
                "periodic pass finished"
            ),
            Err(e) => warn!(error = %e, "periodic pass failed"),
        }
    }
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use keel_workflow::{PeriodicSummary, ResumeSummary, WorkflowError};
    use rootcause::prelude::Report;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingWork {
        polls: AtomicUsize,
        passes: AtomicUsize,
        fail: bool,
    }

    impl CountingWork {
        fn outage() -> Report<WorkflowError> {
            WorkflowError::UnsavedEntity {
                obj_type: "task".to_string(),
            }
            .into()
        }
    }

    #[async_trait]
    impl ScheduledWork for CountingWork {
        async fn run_scheduled_actions(&self) -> Result<ResumeSummary, Report<WorkflowError>> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Self::outage());
            }
            Ok(ResumeSummary::default())
        }

        async fn run_periodic_workflows(&self) -> Result<PeriodicSummary, Report<WorkflowError>> {
            self.passes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Self::outage());
            }
            Ok(PeriodicSummary::default())
        }
    }

    fn scheduler(work: &Arc<CountingWork>) -> Scheduler {
        Scheduler::with_intervals(
            work.clone(),
            Duration::from_millis(10),
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn ticks_each_cadence() {
        let work = Arc::new(CountingWork::default());
        scheduler(&work)
            .run_until(tokio::time::sleep(Duration::from_millis(55)))
            .await;

        assert!(work.polls.load(Ordering::SeqCst) >= 2);
        assert_eq!(work.passes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_cycles_are_retried() {
        let work = Arc::new(CountingWork {
            fail: true,
            ..CountingWork::default()
        });
        scheduler(&work)
            .run_until(tokio::time::sleep(Duration::from_millis(55)))
            .await;

        assert!(work.polls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn shutdown_wins_over_pending_ticks() {
        let work = Arc::new(CountingWork::default());
        scheduler(&work).run_until(async {}).await;

        assert_eq!(work.polls.load(Ordering::SeqCst), 0);
        assert_eq!(work.passes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.poll_interval_seconds, 60);
        assert_eq!(config.periodic_interval_seconds, 3600);
    }
}
