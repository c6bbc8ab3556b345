use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::domain::OptimizationRecord;

/// Append-only log of optimization cycles.
///
/// The controller is the single writer; readers get snapshots.
#[derive(Debug, Default)]
pub struct OptimizationHistory {
    records: RwLock<Vec<OptimizationRecord>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HistorySummary {
    pub cycles: usize,
    pub successes: usize,
    pub failures: usize,
    /// Percentage of successful cycles, 0 when empty
    pub success_rate_percent: f64,
    pub mean_cost: Option<f64>,
    pub mean_pv_utilization_percent: Option<f64>,
}

impl OptimizationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, record: OptimizationRecord) {
        self.records.write().push(record);
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn last(&self) -> Option<OptimizationRecord> {
        self.records.read().last().cloned()
    }

    pub fn snapshot(&self) -> Vec<OptimizationRecord> {
        self.records.read().clone()
    }

    pub fn summary(&self) -> HistorySummary {
        let records = self.records.read();
        let cycles = records.len();
        let schedules: Vec<_> = records.iter().filter_map(|r| r.schedule.as_ref()).collect();
        let successes = records.iter().filter(|r| r.success).count();

        let mean = |values: Vec<f64>| {
            if values.is_empty() {
                None
            } else {
                Some(values.iter().sum::<f64>() / values.len() as f64)
            }
        };

        HistorySummary {
            cycles,
            successes,
            failures: cycles - successes,
            success_rate_percent: if cycles == 0 {
                0.0
            } else {
                successes as f64 / cycles as f64 * 100.0
            },
            mean_cost: mean(schedules.iter().map(|s| s.total_cost).collect()),
            mean_pv_utilization_percent: mean(schedules.iter().map(|s| s.pv_utilization_percent).collect()),
        }
    }
}
