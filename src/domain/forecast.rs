use chrono::{DateTime, FixedOffset, Local};
use serde::{Deserialize, Serialize};

use crate::error::MpcError;

/// Price, PV and demand sequences over one optimization horizon.
///
/// All three sequences share the same length `H`. PV and demand are
/// non-negative; prices may go negative. Deserialized forecasts go through
/// the same validation as [`Forecast::generated`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ForecastRecord")]
pub struct Forecast {
    pub generated_at: DateTime<FixedOffset>,
    /// Electricity price per step (currency / kWh)
    pub price: Vec<f64>,
    /// Available PV power per step (kW)
    pub pv_kw: Vec<f64>,
    /// Oxygen demand per step (kW equivalent)
    pub demand_kw: Vec<f64>,
}

/// Unvalidated wire form of [`Forecast`]
#[derive(Deserialize)]
struct ForecastRecord {
    generated_at: DateTime<FixedOffset>,
    price: Vec<f64>,
    pv_kw: Vec<f64>,
    demand_kw: Vec<f64>,
}

impl TryFrom<ForecastRecord> for Forecast {
    type Error = MpcError;

    fn try_from(raw: ForecastRecord) -> Result<Self, Self::Error> {
        Forecast::generated(raw.generated_at, raw.price, raw.pv_kw, raw.demand_kw)
    }
}

impl Forecast {
    pub fn new(price: Vec<f64>, pv_kw: Vec<f64>, demand_kw: Vec<f64>) -> Result<Self, MpcError> {
        Self::generated(Local::now().fixed_offset(), price, pv_kw, demand_kw)
    }

    pub fn generated(
        generated_at: DateTime<FixedOffset>,
        price: Vec<f64>,
        pv_kw: Vec<f64>,
        demand_kw: Vec<f64>,
    ) -> Result<Self, MpcError> {
        let forecast = Self {
            generated_at,
            price,
            pv_kw,
            demand_kw,
        };
        forecast.check()?;
        Ok(forecast)
    }

    /// Re-check the invariants of a forecast whose fields were set directly
    pub fn check(&self) -> Result<(), MpcError> {
        if self.price.len() != self.pv_kw.len() || self.price.len() != self.demand_kw.len() {
            return Err(MpcError::InvalidForecast(format!(
                "sequence lengths differ: price={}, pv={}, demand={}",
                self.price.len(),
                self.pv_kw.len(),
                self.demand_kw.len()
            )));
        }
        if let Some(i) = self.price.iter().position(|p| !p.is_finite()) {
            return Err(MpcError::InvalidForecast(format!(
                "price at step {i} is not finite"
            )));
        }
        if let Some(i) = self.pv_kw.iter().position(|v| !v.is_finite() || *v < 0.0) {
            return Err(MpcError::InvalidForecast(format!(
                "pv at step {i} must be finite and non-negative"
            )));
        }
        if let Some(i) = self.demand_kw.iter().position(|v| !v.is_finite() || *v < 0.0) {
            return Err(MpcError::InvalidForecast(format!(
                "demand at step {i} must be finite and non-negative"
            )));
        }
        Ok(())
    }

    /// Zero-length forecast
    pub fn empty() -> Self {
        Self {
            generated_at: Local::now().fixed_offset(),
            price: Vec::new(),
            pv_kw: Vec::new(),
            demand_kw: Vec::new(),
        }
    }

    pub fn horizon(&self) -> usize {
        self.price.len()
    }

    pub fn is_empty(&self) -> bool {
        self.price.is_empty()
    }

    /// First `horizon` steps, or `None` when any sequence is shorter
    pub fn truncated(&self, horizon: usize) -> Option<Self> {
        Some(Self {
            generated_at: self.generated_at,
            price: self.price.get(..horizon)?.to_vec(),
            pv_kw: self.pv_kw.get(..horizon)?.to_vec(),
            demand_kw: self.demand_kw.get(..horizon)?.to_vec(),
        })
    }
}
