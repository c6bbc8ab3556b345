use serde::{Deserialize, Serialize};

/// Snapshot of the electrolyzer plant captured for one optimization cycle.
///
/// The controller copies this at the start of a solve; telemetry updates that
/// arrive while a solve runs only affect the next cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlantState {
    /// Current oxygen production setpoint (kW electrical)
    pub production_kw: f64,
    /// Stack efficiency (%)
    pub efficiency_percent: f64,
    /// Safety margin to the nearest operating limit (%)
    pub safety_margin_percent: f64,
    /// Measured PV generation (kW)
    pub pv_power_kw: f64,
    /// Current oxygen demand (kW equivalent)
    pub oxygen_demand_kw: f64,
}

impl PlantState {
    /// State with only the production setpoint known
    pub fn at_production(production_kw: f64) -> Self {
        Self {
            production_kw,
            ..Self::default()
        }
    }
}

impl Default for PlantState {
    fn default() -> Self {
        Self {
            production_kw: 75.0,
            efficiency_percent: 78.2,
            safety_margin_percent: 22.7,
            pv_power_kw: 0.0,
            oxygen_demand_kw: 30.0,
        }
    }
}

/// Static operating envelope of the electrolyzer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlantLimits {
    pub min_production_kw: f64,
    pub max_production_kw: f64,
    /// Maximum setpoint change between consecutive intervals (kW per interval)
    pub max_ramp_rate_kw: f64,
}

impl PlantLimits {
    pub fn new(min_production_kw: f64, max_production_kw: f64, max_ramp_rate_kw: f64) -> Self {
        Self {
            min_production_kw,
            max_production_kw,
            max_ramp_rate_kw,
        }
    }

    /// Lower bound does not exceed the upper bound and the ramp is usable
    pub fn is_consistent(&self) -> bool {
        self.min_production_kw <= self.max_production_kw && self.max_ramp_rate_kw >= 0.0
    }

    pub fn clamp(&self, production_kw: f64) -> f64 {
        production_kw.clamp(self.min_production_kw, self.max_production_kw)
    }
}

impl Default for PlantLimits {
    fn default() -> Self {
        Self {
            min_production_kw: 10.0,
            max_production_kw: 100.0,
            max_ramp_rate_kw: 20.0,
        }
    }
}
