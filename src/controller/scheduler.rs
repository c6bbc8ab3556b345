use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::{RollingHorizonController, TriggerOutcome, TriggerSource};

/// Task status tracking
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskStatus {
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub run_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    /// Ticks that did not start a cycle (coalesced, suppressed or faulted)
    pub skipped_count: u64,
}

/// Fires a controller tick every control interval, independent of solve time
pub struct PeriodicTrigger {
    controller: Arc<RollingHorizonController>,
    period: Duration,
    status: Arc<RwLock<TaskStatus>>,
}

impl PeriodicTrigger {
    pub fn new(controller: Arc<RollingHorizonController>, period: Duration) -> Self {
        Self {
            controller,
            period,
            status: Arc::new(RwLock::new(TaskStatus::default())),
        }
    }

    pub fn every_minutes(controller: Arc<RollingHorizonController>, minutes: u64) -> Self {
        Self::new(controller, Duration::from_secs(minutes.max(1) * 60))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run the tick loop on the runtime until the handle is aborted
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        info!(period_secs = self.period.as_secs(), "periodic re-optimization started");
        tokio::spawn(async move { self.run().await })
    }

    async fn run(&self) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            // each tick runs detached so a slow solve never delays the timer
            let controller = self.controller.clone();
            let status = self.status.clone();
            tokio::spawn(async move {
                Self::tick_with(&controller, &status).await;
            });
        }
    }

    /// Fire one tick and wait for its outcome
    pub async fn tick_once(&self) -> TriggerOutcome {
        Self::tick_with(&self.controller, &self.status).await
    }

    async fn tick_with(controller: &RollingHorizonController, status: &RwLock<TaskStatus>) -> TriggerOutcome {
        let now = Utc::now();
        {
            let mut s = status.write().await;
            s.last_run = Some(now);
            s.run_count += 1;
        }

        let outcome = controller.on_trigger(TriggerSource::Tick).await;

        let mut s = status.write().await;
        match &outcome {
            TriggerOutcome::Completed(record) if record.success => {
                s.last_success = Some(now);
                s.success_count += 1;
                s.last_error = None;
                debug!(setpoint_kw = record.immediate_setpoint_kw, "periodic re-optimization completed");
            }
            TriggerOutcome::Completed(record) => {
                s.error_count += 1;
                s.last_error = record.message.clone();
                warn!(reason = record.message.as_deref().unwrap_or("unknown"), "periodic re-optimization failed");
            }
            TriggerOutcome::Faulted => {
                s.skipped_count += 1;
                s.last_error = Some("controller faulted".to_string());
                error!("periodic re-optimization skipped: controller faulted");
            }
            TriggerOutcome::Coalesced | TriggerOutcome::Suppressed | TriggerOutcome::ResetApplied => {
                s.skipped_count += 1;
            }
        }
        outcome
    }

    pub async fn status(&self) -> TaskStatus {
        self.status.read().await.clone()
    }
}
