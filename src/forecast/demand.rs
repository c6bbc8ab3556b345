use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use super::hour_of_step;

#[async_trait]
pub trait DemandForecaster: Send + Sync {
    /// Oxygen demand (kW equivalent) for `horizon` hourly steps starting at `start`
    async fn predict(&self, start: DateTime<FixedOffset>, horizon: usize) -> Result<Vec<f64>>;
}

/// Baseline demand with a sinusoidal bump during working hours
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftDemandForecaster {
    pub baseline_kw: f64,
    pub shift_level_kw: f64,
    pub shift_swing_kw: f64,
    /// First and last working hour, inclusive
    pub shift_hours: (u32, u32),
}

impl Default for ShiftDemandForecaster {
    fn default() -> Self {
        Self {
            baseline_kw: 30.0,
            shift_level_kw: 50.0,
            shift_swing_kw: 10.0,
            shift_hours: (8, 19),
        }
    }
}

impl ShiftDemandForecaster {
    pub fn demand_at_hour(&self, hour: u32) -> f64 {
        let (from, to) = self.shift_hours;
        if !(from..=to).contains(&hour) {
            return self.baseline_kw;
        }
        let phase = (hour - from) as f64 * std::f64::consts::PI / 12.0;
        (self.shift_level_kw + self.shift_swing_kw * phase.sin()).max(0.0)
    }
}

#[async_trait]
impl DemandForecaster for ShiftDemandForecaster {
    async fn predict(&self, start: DateTime<FixedOffset>, horizon: usize) -> Result<Vec<f64>> {
        Ok((0..horizon)
            .map(|k| self.demand_at_hour(hour_of_step(start, k)))
            .collect())
    }
}

/// Daily sinusoid `mean + amplitude * sin(2π(h - 8) / 24)`, clipped to `[floor, ceiling]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiurnalDemandForecaster {
    pub mean_kw: f64,
    pub amplitude_kw: f64,
    pub floor_kw: f64,
    pub ceiling_kw: f64,
}

impl Default for DiurnalDemandForecaster {
    fn default() -> Self {
        Self {
            mean_kw: 40.0,
            amplitude_kw: 20.0,
            floor_kw: 20.0,
            ceiling_kw: 80.0,
        }
    }
}

#[async_trait]
impl DemandForecaster for DiurnalDemandForecaster {
    async fn predict(&self, start: DateTime<FixedOffset>, horizon: usize) -> Result<Vec<f64>> {
        Ok((0..horizon)
            .map(|k| {
                let h = hour_of_step(start, k) as f64;
                let raw = self.mean_kw + self.amplitude_kw * (std::f64::consts::TAU * (h - 8.0) / 24.0).sin();
                raw.max(self.floor_kw).min(self.ceiling_kw)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_shift_profile() {
        let d = ShiftDemandForecaster::default();
        assert_eq!(d.demand_at_hour(3), 30.0);
        assert_eq!(d.demand_at_hour(8), 50.0);
        assert!((d.demand_at_hour(14) - 60.0).abs() < 1e-9);
        assert_eq!(d.demand_at_hour(20), 30.0);
    }

    #[tokio::test]
    async fn test_diurnal_demand_is_clipped() {
        let start = FixedOffset::east_opt(3600).unwrap().with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let demand = DiurnalDemandForecaster::default().predict(start, 24).await.unwrap();
        assert!(demand.iter().all(|d| (20.0..=80.0).contains(d)));
        // sin(π/2) at h = 14
        assert!((demand[14] - 60.0).abs() < 1e-9);
    }
}
