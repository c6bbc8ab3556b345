//! Prediction Oracle boundary
//!
//! The optimization core depends only on the [`PredictionOracle`] capability:
//! a synchronous request/response call that maps a state context to an
//! operating cost and an expected efficiency. The concrete predictor (a
//! trained network, an RPC client, an analytic stand-in) lives elsewhere.
//!
//! Responses are loose mappings. Missing or malformed fields are read as zero
//! and reported through [`ParsedPrediction::faults`] instead of failing.

pub mod analytic;

pub use analytic::EfficiencyCurveOracle;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Forecast, PlantState};
use crate::error::MpcError;

/// State snapshot overlaid with the context of one horizon step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleContext {
    pub step: usize,
    pub production_kw: f64,
    pub efficiency_percent: f64,
    pub safety_margin_percent: f64,
    pub pv_power_kw: f64,
    pub oxygen_demand_kw: f64,
    pub electricity_price: f64,
    /// Candidate setpoint for this step
    pub setpoint_kw: f64,
}

impl OracleContext {
    /// Overlay step `k` of the forecast (price and demand) and the candidate
    /// setpoint onto the captured plant state.
    pub fn overlay(state: &PlantState, forecast: &Forecast, k: usize, setpoint_kw: f64) -> Self {
        Self {
            step: k,
            production_kw: state.production_kw,
            efficiency_percent: state.efficiency_percent,
            safety_margin_percent: state.safety_margin_percent,
            pv_power_kw: state.pv_power_kw,
            oxygen_demand_kw: forecast.demand_kw[k],
            electricity_price: forecast.price[k],
            setpoint_kw,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait PredictionOracle: Send + Sync {
    /// Returns a mapping with `operating_cost` and `expected_efficiency` (0-100).
    ///
    /// An `Err` means the oracle is unavailable for this call.
    fn predict(&self, context: &OracleContext) -> Result<Value, MpcError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub operating_cost: f64,
    pub expected_efficiency: f64,
}

/// Prediction read leniently from an oracle response
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPrediction {
    pub prediction: Prediction,
    /// Field names that were missing or not numeric
    pub faults: Vec<&'static str>,
}

impl ParsedPrediction {
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty()
    }
}

/// Read a prediction mapping, substituting zero for missing or malformed fields.
///
/// Efficiency is clamped into [0, 100].
pub fn parse_prediction(response: &Value) -> ParsedPrediction {
    let mut faults = Vec::new();
    let operating_cost = numeric_field(response, "operating_cost", &mut faults);
    let expected_efficiency = numeric_field(response, "expected_efficiency", &mut faults);

    ParsedPrediction {
        prediction: Prediction {
            operating_cost,
            expected_efficiency: expected_efficiency.clamp(0.0, 100.0),
        },
        faults,
    }
}

fn numeric_field(response: &Value, name: &'static str, faults: &mut Vec<&'static str>) -> f64 {
    match response.get(name).and_then(Value::as_f64) {
        Some(v) if v.is_finite() => v,
        _ => {
            faults.push(name);
            0.0
        }
    }
}
