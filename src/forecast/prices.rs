use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use super::hour_of_step;

#[async_trait]
pub trait PriceForecaster: Send + Sync {
    /// Electricity price for `horizon` hourly steps starting at `start`
    async fn predict(&self, start: DateTime<FixedOffset>, horizon: usize) -> Result<Vec<f64>>;
}

/// Fixed time-of-use tariff keyed by hour of day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeOfUsePriceForecaster {
    pub base_price: f64,
    pub peak_price: f64,
    pub night_price: f64,
    /// First and last peak hour, inclusive
    pub peak_hours: (u32, u32),
    /// Night starts at `.0` and runs past midnight up to `.1`, inclusive
    pub night_hours: (u32, u32),
}

impl Default for TimeOfUsePriceForecaster {
    fn default() -> Self {
        Self {
            base_price: 0.15,
            peak_price: 0.25,
            night_price: 0.10,
            peak_hours: (14, 19),
            night_hours: (22, 6),
        }
    }
}

impl TimeOfUsePriceForecaster {
    pub fn price_at_hour(&self, hour: u32) -> f64 {
        let (peak_from, peak_to) = self.peak_hours;
        let (night_from, night_to) = self.night_hours;
        if (peak_from..=peak_to).contains(&hour) {
            self.peak_price
        } else if hour >= night_from || hour <= night_to {
            self.night_price
        } else {
            self.base_price
        }
    }
}

#[async_trait]
impl PriceForecaster for TimeOfUsePriceForecaster {
    async fn predict(&self, start: DateTime<FixedOffset>, horizon: usize) -> Result<Vec<f64>> {
        Ok((0..horizon)
            .map(|k| self.price_at_hour(hour_of_step(start, k)))
            .collect())
    }
}

/// Smooth daily price curve `mean + amplitude * sin(2π(h + phase) / 24)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiurnalPriceForecaster {
    pub mean: f64,
    pub amplitude: f64,
    pub phase_hours: f64,
}

impl Default for DiurnalPriceForecaster {
    fn default() -> Self {
        Self {
            mean: 0.15,
            amplitude: 0.1,
            phase_hours: 6.0,
        }
    }
}

#[async_trait]
impl PriceForecaster for DiurnalPriceForecaster {
    async fn predict(&self, start: DateTime<FixedOffset>, horizon: usize) -> Result<Vec<f64>> {
        Ok((0..horizon)
            .map(|k| {
                let h = hour_of_step(start, k) as f64;
                self.mean + self.amplitude * (std::f64::consts::TAU * (h + self.phase_hours) / 24.0).sin()
            })
            .collect())
    }
}
