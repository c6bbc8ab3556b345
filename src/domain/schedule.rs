use chrono::{DateTime, FixedOffset, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Production plan produced by one successful solve.
///
/// Only `setpoints_kw[0]` is acted upon; the rest of the horizon is advisory
/// and gets recomputed next cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub created_at: DateTime<FixedOffset>,
    pub setpoints_kw: Vec<f64>,
    pub total_cost: f64,
    pub pv_utilization_percent: f64,
    pub constraints_satisfied: bool,
    pub optimizer_version: String,
}

impl Schedule {
    pub fn new(setpoints_kw: Vec<f64>, total_cost: f64, pv_kw: &[f64], constraints_satisfied: bool) -> Self {
        let pv_utilization_percent = pv_utilization_percent(pv_kw, &setpoints_kw);
        Self {
            id: Uuid::new_v4(),
            created_at: Local::now().fixed_offset(),
            setpoints_kw,
            total_cost,
            pv_utilization_percent,
            constraints_satisfied,
            optimizer_version: OPTIMIZER_VERSION.to_string(),
        }
    }

    pub fn horizon(&self) -> usize {
        self.setpoints_kw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.setpoints_kw.is_empty()
    }

    /// The only value to act on this interval
    pub fn immediate_setpoint(&self) -> Option<f64> {
        self.setpoints_kw.first().copied()
    }

    /// Receding-horizon warm start: drop the step just executed and repeat the
    /// last setpoint until the sequence covers `horizon` steps.
    pub fn shifted(&self, horizon: usize) -> Option<Vec<f64>> {
        let last = *self.setpoints_kw.last()?;
        let mut guess: Vec<f64> = self.setpoints_kw.iter().skip(1).copied().take(horizon).collect();
        guess.resize(horizon, last);
        Some(guess)
    }
}

pub const OPTIMIZER_VERSION: &str = "sqp-bfgs-0.1";

/// Share of scheduled consumption that forecast PV can cover, capped at 100 %.
///
/// Zero total consumption yields 0 rather than an undefined ratio.
pub fn pv_utilization_percent(pv_kw: &[f64], setpoints_kw: &[f64]) -> f64 {
    let total_pv: f64 = pv_kw.iter().sum();
    let total_consumption: f64 = setpoints_kw.iter().sum();
    if total_consumption <= 0.0 || !total_consumption.is_finite() {
        return 0.0;
    }
    (total_pv / total_consumption * 100.0).clamp(0.0, 100.0)
}

/// One entry of the append-only optimization log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRecord {
    pub id: Uuid,
    pub timestamp: DateTime<FixedOffset>,
    pub success: bool,
    /// Present on success
    pub schedule: Option<Schedule>,
    /// Present on failure
    pub message: Option<String>,
    /// Setpoint handed to actuation: `schedule[0]` or the held production
    pub immediate_setpoint_kw: f64,
    pub iterations: usize,
}

impl OptimizationRecord {
    pub fn committed(schedule: Schedule, immediate_setpoint_kw: f64, iterations: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Local::now().fixed_offset(),
            success: true,
            schedule: Some(schedule),
            message: None,
            immediate_setpoint_kw,
            iterations,
        }
    }

    pub fn failed(message: impl Into<String>, held_setpoint_kw: f64, iterations: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Local::now().fixed_offset(),
            success: false,
            schedule: None,
            message: Some(message.into()),
            immediate_setpoint_kw: held_setpoint_kw,
            iterations,
        }
    }
}
