//! Escalation scheduler: hands overdue steps to fallback approvers
//!
//! Runs as a background task independent of request-mutating calls.
//! Each tick scans open requests and escalates any current step whose
//! inactivity exceeds the step's `escalate_after_hours`. The scheduler
//! only ever opens escalations — they resolve when the stalled step is
//! approved, rejected, or skipped, or when a human acknowledges them.

use crate::ApprovalEngine;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};

/// Scheduler tuning knobs
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Seconds between scans
    pub scan_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 60,
        }
    }
}

/// Periodic escalation scan over the engine's open requests
pub struct EscalationScheduler {
    engine: Arc<ApprovalEngine>,
    config: SchedulerConfig,
    running: Arc<RwLock<bool>>,
}

impl EscalationScheduler {
    pub fn new(engine: Arc<ApprovalEngine>, config: SchedulerConfig) -> Self {
        Self {
            engine,
            config,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Run the scan loop until `stop` is called. The task runs for the
    /// process lifetime in normal operation.
    pub async fn start(self: Arc<Self>) {
        {
            let mut running = self.running.write().await;
            *running = true;
        }

        tracing::info!(
            interval_secs = self.config.scan_interval_secs,
            "Escalation scheduler started"
        );

        let mut ticker = interval(Duration::from_secs(self.config.scan_interval_secs));
        loop {
            ticker.tick().await;

            if !*self.running.read().await {
                break;
            }

            let escalated = self.run_once();
            if escalated > 0 {
                tracing::info!(count = escalated, "Escalated overdue steps");
            }
        }

        tracing::info!("Escalation scheduler stopped");
    }

    /// Stop the scan loop after the current tick
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    /// One scan at the current wall clock; returns how many
    /// escalations opened
    pub fn run_once(&self) -> usize {
        self.engine.scan_for_escalations(Utc::now())
    }
}
