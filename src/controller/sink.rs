//! Downstream actuation/transport boundary.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::domain::{OptimizationRecord, Schedule};

/// Message handed to the lower control layer after every cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "economic_setpoint")]
pub struct ScheduleDispatch {
    pub timestamp: DateTime<FixedOffset>,
    pub immediate_setpoint_kw: f64,
    /// Advisory plan; absent when the cycle failed and the setpoint is held
    pub schedule: Option<Schedule>,
    pub success: bool,
    pub message: Option<String>,
}

impl ScheduleDispatch {
    pub fn from_record(record: &OptimizationRecord) -> Self {
        Self {
            timestamp: Local::now().fixed_offset(),
            immediate_setpoint_kw: record.immediate_setpoint_kw,
            schedule: record.schedule.clone(),
            success: record.success,
            message: record.message.clone(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScheduleSink: Send + Sync {
    async fn publish(&self, dispatch: ScheduleDispatch) -> Result<()>;
}

/// In-process transport backed by a bounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ScheduleDispatch>,
}

impl ChannelSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ScheduleDispatch>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ScheduleSink for ChannelSink {
    async fn publish(&self, dispatch: ScheduleDispatch) -> Result<()> {
        self.tx
            .send(dispatch)
            .await
            .context("schedule receiver dropped")
    }
}

/// Writes every dispatch to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl ScheduleSink for LogSink {
    async fn publish(&self, dispatch: ScheduleDispatch) -> Result<()> {
        if dispatch.success {
            info!(
                setpoint_kw = dispatch.immediate_setpoint_kw,
                horizon = dispatch.schedule.as_ref().map(Schedule::horizon).unwrap_or(0),
                total_cost = dispatch.schedule.as_ref().map(|s| s.total_cost),
                "economic setpoint"
            );
        } else {
            warn!(
                setpoint_kw = dispatch.immediate_setpoint_kw,
                reason = dispatch.message.as_deref().unwrap_or("unknown"),
                "holding setpoint"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelSink::channel(4);
        let record = OptimizationRecord::failed("iteration limit reached", 42.0, 100);
        sink.publish(ScheduleDispatch::from_record(&record)).await.unwrap();

        let got = rx.recv().await.unwrap();
        assert!(!got.success);
        assert_eq!(got.immediate_setpoint_kw, 42.0);
        assert!(got.schedule.is_none());
    }

    #[tokio::test]
    async fn test_closed_channel_is_an_error() {
        let (sink, rx) = ChannelSink::channel(1);
        drop(rx);
        let record = OptimizationRecord::failed("x", 1.0, 0);
        assert!(sink.publish(ScheduleDispatch::from_record(&record)).await.is_err());
    }

    #[test]
    fn test_dispatch_is_tagged() {
        let schedule = Schedule::new(vec![20.0, 25.0], 4.2, &[0.0, 10.0], true);
        let record = OptimizationRecord::committed(schedule, 20.0, 7);
        let value = serde_json::to_value(ScheduleDispatch::from_record(&record)).unwrap();
        assert_eq!(value["type"], "economic_setpoint");
        assert_eq!(value["schedule"]["setpoints_kw"][1], 25.0);
    }
}
