use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use super::hour_of_step;

#[async_trait]
pub trait ProductionForecaster: Send + Sync {
    /// Expected PV generation (kW) for `horizon` hourly steps starting at `start`
    async fn predict(&self, start: DateTime<FixedOffset>, horizon: usize) -> Result<Vec<f64>>;
}

/// Clear-sky PV half-sine between sunrise and sunset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolarProfileForecaster {
    pub peak_kw: f64,
    pub sunrise_hour: u32,
    pub sunset_hour: u32,
    /// Width of the half-sine in hours
    pub day_length_hours: f64,
}

impl Default for SolarProfileForecaster {
    fn default() -> Self {
        Self {
            peak_kw: 100.0,
            sunrise_hour: 6,
            sunset_hour: 18,
            day_length_hours: 13.0,
        }
    }
}

impl SolarProfileForecaster {
    pub fn pv_at_hour(&self, hour: u32) -> f64 {
        if hour < self.sunrise_hour || hour > self.sunset_hour {
            return 0.0;
        }
        let x = (hour - self.sunrise_hour) as f64 / self.day_length_hours.max(0.01);
        (self.peak_kw * (std::f64::consts::PI * x).sin()).max(0.0)
    }
}

#[async_trait]
impl ProductionForecaster for SolarProfileForecaster {
    async fn predict(&self, start: DateTime<FixedOffset>, horizon: usize) -> Result<Vec<f64>> {
        Ok((0..horizon)
            .map(|k| self.pv_at_hour(hour_of_step(start, k)))
            .collect())
    }
}
