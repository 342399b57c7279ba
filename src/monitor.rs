//! Polling monitor for a running crawl.
//!
//! A crawl has no natural end: the stage loops keep waiting on their queues.
//! The monitor polls the scheduler at a fixed interval, logs its summary
//! whenever it changes, drains the error queue into the log, and once the
//! crawl has been idle for `max_idle_count` consecutive checks, stops it.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::scheduler::{SchedSummary, Scheduler};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interval: Duration,
    /// Consecutive idle checks after which the crawl counts as finished.
    pub max_idle_count: u32,
    /// Stop the scheduler once the crawl is finished.
    pub auto_stop: bool,
    /// Log the multi-line summary instead of the one-line form.
    pub detail_summary: bool,
    pub summary_prefix: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            interval: Duration::from_millis(100),
            max_idle_count: 5,
            auto_stop: true,
            detail_summary: false,
            summary_prefix: String::new(),
        }
    }
}

/// Spawns the monitor. The handle resolves to the number of checks performed.
pub fn spawn_monitor(scheduler: Arc<Scheduler>, config: MonitorConfig) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let max_idle_count = config.max_idle_count.max(1);
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut checks: u64 = 0;
        let mut idle_count = 0;
        let mut last: Option<SchedSummary> = None;

        loop {
            ticker.tick().await;
            checks += 1;

            if let Ok(errors) = scheduler.error_queue() {
                while let Some(error) = errors.try_pop() {
                    warn!("{}", error);
                }
            }

            let summary = scheduler.summary(&config.summary_prefix);
            let changed = match &last {
                Some(previous) => !previous.same(&summary),
                None => true,
            };
            if changed {
                if config.detail_summary {
                    info!("Scheduler summary:\n{}", summary.detail());
                } else {
                    info!("Scheduler summary: {}", summary);
                }
                last = Some(summary);
            }

            if !scheduler.running() {
                debug!("Scheduler is not running, monitor exiting");
                break;
            }

            if scheduler.idle() {
                idle_count += 1;
                if idle_count >= max_idle_count {
                    info!("Crawl has been idle for {} checks", idle_count);
                    if config.auto_stop && scheduler.stop() {
                        info!("Crawl has become idle, scheduler stopped.");
                    }
                    break;
                }
            } else {
                idle_count = 0;
            }
        }

        checks
    })
}
