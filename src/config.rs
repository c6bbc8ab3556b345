use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::controller::FailurePolicy;
use crate::domain::{PlantLimits, PlantState};
use crate::forecast::{
    DemandForecaster, DiurnalDemandForecaster, DiurnalPriceForecaster, ForecastEngine, PriceForecaster,
    ShiftDemandForecaster, SolarProfileForecaster, TimeOfUsePriceForecaster,
};
use crate::optimizer::{CostWeights, SqpSettings};
use crate::oracle::EfficiencyCurveOracle;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub controller: ControllerConfig,
    #[validate(nested)]
    pub plant: PlantConfig,
    #[validate(nested)]
    pub cost: CostConfig,
    #[validate(nested)]
    pub solver: SolverConfig,
    #[validate(nested)]
    pub forecast: ForecastConfig,
    #[validate(nested)]
    pub oracle: OracleConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ControllerConfig {
    #[validate(range(min = 1, max = 1440))]
    pub control_interval_minutes: u64,
    #[validate(range(max = 168))]
    pub horizon_hours: usize,
    /// Upper limit for horizons requested by `RUN_OPTIMIZATION`
    #[validate(range(min = 1, max = 168))]
    pub max_horizon_hours: usize,
    #[validate(range(min = 1, max = 100))]
    pub max_consecutive_failures: u32,
    pub failure_policy: FailurePolicy,
    pub reoptimize_on_forecast_update: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            control_interval_minutes: 60,
            horizon_hours: 24,
            max_horizon_hours: 168,
            max_consecutive_failures: 3,
            failure_policy: FailurePolicy::SkipCycle,
            reoptimize_on_forecast_update: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct PlantConfig {
    #[validate(range(min = 0.0))]
    pub min_production_kw: f64,
    #[validate(range(min = 0.0))]
    pub max_production_kw: f64,
    #[validate(range(min = 0.0))]
    pub max_ramp_rate_kw: f64,
    #[validate(range(min = 0.0))]
    pub initial_production_kw: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub initial_efficiency_percent: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub initial_safety_margin_percent: f64,
}

impl Default for PlantConfig {
    fn default() -> Self {
        let limits = PlantLimits::default();
        let state = PlantState::default();
        Self {
            min_production_kw: limits.min_production_kw,
            max_production_kw: limits.max_production_kw,
            max_ramp_rate_kw: limits.max_ramp_rate_kw,
            initial_production_kw: state.production_kw,
            initial_efficiency_percent: state.efficiency_percent,
            initial_safety_margin_percent: state.safety_margin_percent,
        }
    }
}

impl PlantConfig {
    pub fn limits(&self) -> PlantLimits {
        PlantLimits::new(self.min_production_kw, self.max_production_kw, self.max_ramp_rate_kw)
    }

    pub fn initial_state(&self) -> PlantState {
        PlantState {
            production_kw: self.initial_production_kw,
            efficiency_percent: self.initial_efficiency_percent,
            safety_margin_percent: self.initial_safety_margin_percent,
            ..PlantState::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct CostConfig {
    #[validate(range(min = 0.0))]
    pub pv_incentive: f64,
    #[validate(range(min = 0.0))]
    pub demand_penalty: f64,
    #[validate(range(min = 0.0))]
    pub ramp_penalty: f64,
    #[validate(range(min = 0.0))]
    pub efficiency_penalty: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        let w = CostWeights::default();
        Self {
            pv_incentive: w.pv_incentive,
            demand_penalty: w.demand_penalty,
            ramp_penalty: w.ramp_penalty,
            efficiency_penalty: w.efficiency_penalty,
        }
    }
}

impl CostConfig {
    pub fn weights(&self) -> CostWeights {
        CostWeights {
            pv_incentive: self.pv_incentive,
            demand_penalty: self.demand_penalty,
            ramp_penalty: self.ramp_penalty,
            efficiency_penalty: self.efficiency_penalty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SolverConfig {
    #[validate(range(min = 1, max = 10000))]
    pub max_iterations: usize,
    #[validate(range(exclusive_min = 0.0))]
    pub step_tolerance: f64,
    #[validate(range(exclusive_min = 0.0))]
    pub cost_tolerance: f64,
    #[validate(range(exclusive_min = 0.0))]
    pub feasibility_tolerance: f64,
    #[validate(range(exclusive_min = 0.0, max = 0.1))]
    pub finite_difference_step: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        let s = SqpSettings::default();
        Self {
            max_iterations: s.max_iterations,
            step_tolerance: s.step_tolerance,
            cost_tolerance: s.cost_tolerance,
            feasibility_tolerance: s.feasibility_tolerance,
            finite_difference_step: s.finite_difference_step,
        }
    }
}

impl SolverConfig {
    pub fn settings(&self) -> SqpSettings {
        SqpSettings {
            max_iterations: self.max_iterations,
            step_tolerance: self.step_tolerance,
            cost_tolerance: self.cost_tolerance,
            feasibility_tolerance: self.feasibility_tolerance,
            finite_difference_step: self.finite_difference_step,
            initial_trust_radius: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastProfile {
    /// Time-of-use tariff, clear-sky PV and shift demand tables
    #[default]
    HourlyTables,
    /// Smooth sinusoidal price and demand curves
    Diurnal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ForecastConfig {
    pub profile: ForecastProfile,
    pub base_price: f64,
    pub peak_price: f64,
    pub night_price: f64,
    #[validate(range(min = 0.0))]
    pub pv_peak_kw: f64,
    #[validate(range(min = 0.0))]
    pub demand_baseline_kw: f64,
    #[validate(range(min = 0.0))]
    pub demand_shift_level_kw: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        let tariff = TimeOfUsePriceForecaster::default();
        let demand = ShiftDemandForecaster::default();
        Self {
            profile: ForecastProfile::HourlyTables,
            base_price: tariff.base_price,
            peak_price: tariff.peak_price,
            night_price: tariff.night_price,
            pv_peak_kw: SolarProfileForecaster::default().peak_kw,
            demand_baseline_kw: demand.baseline_kw,
            demand_shift_level_kw: demand.shift_level_kw,
        }
    }
}

impl ForecastConfig {
    pub fn engine(&self) -> ForecastEngine {
        let pv = SolarProfileForecaster {
            peak_kw: self.pv_peak_kw,
            ..SolarProfileForecaster::default()
        };
        let (price, demand): (Box<dyn PriceForecaster>, Box<dyn DemandForecaster>) = match self.profile {
            ForecastProfile::HourlyTables => (
                Box::new(TimeOfUsePriceForecaster {
                    base_price: self.base_price,
                    peak_price: self.peak_price,
                    night_price: self.night_price,
                    ..TimeOfUsePriceForecaster::default()
                }),
                Box::new(ShiftDemandForecaster {
                    baseline_kw: self.demand_baseline_kw,
                    shift_level_kw: self.demand_shift_level_kw,
                    ..ShiftDemandForecaster::default()
                }),
            ),
            ForecastProfile::Diurnal => (
                Box::new(DiurnalPriceForecaster::default()),
                Box::new(DiurnalDemandForecaster::default()),
            ),
        };
        ForecastEngine::new(price, Box::new(pv), demand)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct OracleConfig {
    pub enabled: bool,
    #[validate(range(exclusive_min = 0.0))]
    pub rated_power_kw: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub peak_efficiency_percent: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub optimal_load_fraction: f64,
    #[validate(range(min = 0.0))]
    pub wear_cost_per_kwh: f64,
    #[validate(range(min = 0.0))]
    pub fixed_cost_per_hour: f64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        let curve = EfficiencyCurveOracle::default();
        Self {
            enabled: false,
            rated_power_kw: curve.rated_power_kw,
            peak_efficiency_percent: curve.peak_efficiency_percent,
            optimal_load_fraction: curve.optimal_load_fraction,
            wear_cost_per_kwh: curve.wear_cost_per_kwh,
            fixed_cost_per_hour: curve.fixed_cost_per_hour,
        }
    }
}

impl OracleConfig {
    pub fn efficiency_curve(&self) -> EfficiencyCurveOracle {
        EfficiencyCurveOracle {
            rated_power_kw: self.rated_power_kw,
            peak_efficiency_percent: self.peak_efficiency_percent,
            optimal_load_fraction: self.optimal_load_fraction,
            wear_cost_per_kwh: self.wear_cost_per_kwh,
            fixed_cost_per_hour: self.fixed_cost_per_hour,
            ..EfficiencyCurveOracle::default()
        }
    }
}

impl Config {
    /// Defaults, then `config/default.toml`, then `O2MPC__SECTION__KEY` variables
    pub fn load() -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("O2MPC__").split("__"));
        Self::extract(figment)
    }

    /// Defaults overlaid with an inline TOML document
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(Config::default())).merge(Toml::string(toml));
        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Self> {
        let cfg: Config = figment.extract().context("failed to load configuration")?;
        cfg.check()?;
        Ok(cfg)
    }

    /// Field ranges plus cross-field checks
    pub fn check(&self) -> Result<()> {
        self.validate().context("invalid configuration")?;
        if self.plant.min_production_kw > self.plant.max_production_kw {
            anyhow::bail!(
                "plant.min_production_kw ({}) exceeds plant.max_production_kw ({})",
                self.plant.min_production_kw,
                self.plant.max_production_kw
            );
        }
        if self.controller.horizon_hours > self.controller.max_horizon_hours {
            anyhow::bail!(
                "controller.horizon_hours ({}) exceeds controller.max_horizon_hours ({})",
                self.controller.horizon_hours,
                self.controller.max_horizon_hours
            );
        }
        Ok(())
    }
}
