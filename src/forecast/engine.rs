use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local};
use parking_lot::RwLock;
use std::sync::Arc;

use super::{
    DemandForecaster, PriceForecaster, ProductionForecaster, ShiftDemandForecaster, SolarProfileForecaster,
    TimeOfUsePriceForecaster,
};
use crate::domain::Forecast;

/// Source of the price/PV/demand triple for one optimization cycle
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ForecastProvider: Send + Sync {
    async fn forecast(&self, horizon: usize) -> Result<Forecast>;
}

pub struct ForecastEngine {
    pub price_forecaster: Box<dyn PriceForecaster>,
    pub production_forecaster: Box<dyn ProductionForecaster>,
    pub demand_forecaster: Box<dyn DemandForecaster>,
}

impl ForecastEngine {
    pub fn new(
        price: Box<dyn PriceForecaster>,
        prod: Box<dyn ProductionForecaster>,
        demand: Box<dyn DemandForecaster>,
    ) -> Self {
        Self {
            price_forecaster: price,
            production_forecaster: prod,
            demand_forecaster: demand,
        }
    }

    /// Tariff, clear-sky PV and shift demand tables with default parameters
    pub fn hourly_tables() -> Self {
        Self::new(
            Box::new(TimeOfUsePriceForecaster::default()),
            Box::new(SolarProfileForecaster::default()),
            Box::new(ShiftDemandForecaster::default()),
        )
    }

    pub async fn get_forecast_from(&self, start: DateTime<FixedOffset>, horizon: usize) -> Result<Forecast> {
        let price = self.price_forecaster.predict(start, horizon).await?;
        let pv_kw = self.production_forecaster.predict(start, horizon).await?;
        let demand_kw = self.demand_forecaster.predict(start, horizon).await?;
        Forecast::generated(start, price, pv_kw, demand_kw).context("forecasters produced an invalid forecast")
    }
}

#[async_trait]
impl ForecastProvider for ForecastEngine {
    async fn forecast(&self, horizon: usize) -> Result<Forecast> {
        let generated_at: DateTime<FixedOffset> = Local::now().fixed_offset();
        self.get_forecast_from(generated_at, horizon).await
    }
}

/// Holds the latest forecast pushed by an external producer.
///
/// Requests for a shorter horizon are served from the head of the stored
/// forecast; longer requests fail.
#[derive(Debug, Clone, Default)]
pub struct StaticForecastProvider {
    latest: Arc<RwLock<Option<Forecast>>>,
}

impl StaticForecastProvider {
    pub fn new(forecast: Forecast) -> Self {
        Self {
            latest: Arc::new(RwLock::new(Some(forecast))),
        }
    }

    pub fn update(&self, forecast: Forecast) {
        *self.latest.write() = Some(forecast);
    }

    pub fn latest(&self) -> Option<Forecast> {
        self.latest.read().clone()
    }
}

#[async_trait]
impl ForecastProvider for StaticForecastProvider {
    async fn forecast(&self, horizon: usize) -> Result<Forecast> {
        let guard = self.latest.read();
        let stored = guard.as_ref().context("no forecast received yet")?;
        stored.check()?;
        stored.truncated(horizon).with_context(|| {
            format!(
                "stored forecast covers {} steps, {horizon} requested",
                stored.horizon()
            )
        })
    }
}
