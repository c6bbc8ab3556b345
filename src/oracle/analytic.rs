use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{OracleContext, PredictionOracle};
use crate::error::MpcError;

/// Deterministic stand-in for the learned predictor.
///
/// PEM stacks are most efficient at part load; efficiency falls off
/// quadratically on either side of `optimal_load_fraction`. Operating cost is
/// stack wear proportional to the setpoint plus a fixed hourly overhead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EfficiencyCurveOracle {
    pub rated_power_kw: f64,
    pub peak_efficiency_percent: f64,
    pub optimal_load_fraction: f64,
    /// Efficiency points lost per unit of squared load-fraction deviation
    pub curvature: f64,
    pub wear_cost_per_kwh: f64,
    pub fixed_cost_per_hour: f64,
}

impl Default for EfficiencyCurveOracle {
    fn default() -> Self {
        Self {
            rated_power_kw: 100.0,
            peak_efficiency_percent: 78.0,
            optimal_load_fraction: 0.6,
            curvature: 40.0,
            wear_cost_per_kwh: 0.002,
            fixed_cost_per_hour: 0.05,
        }
    }
}

impl EfficiencyCurveOracle {
    pub fn efficiency_at(&self, setpoint_kw: f64) -> f64 {
        let load = setpoint_kw / self.rated_power_kw.max(f64::EPSILON);
        let deviation = load - self.optimal_load_fraction;
        (self.peak_efficiency_percent - self.curvature * deviation * deviation).clamp(0.0, 100.0)
    }

    pub fn operating_cost_at(&self, setpoint_kw: f64) -> f64 {
        self.fixed_cost_per_hour + self.wear_cost_per_kwh * setpoint_kw.max(0.0)
    }
}

impl PredictionOracle for EfficiencyCurveOracle {
    fn predict(&self, context: &OracleContext) -> Result<Value, MpcError> {
        if !context.setpoint_kw.is_finite() {
            return Err(MpcError::OracleUnavailable(format!(
                "non-finite setpoint at step {}",
                context.step
            )));
        }
        Ok(json!({
            "operating_cost": self.operating_cost_at(context.setpoint_kw),
            "expected_efficiency": self.efficiency_at(context.setpoint_kw),
        }))
    }
}
