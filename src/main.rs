use anyhow::Result;
use oxygen_mpc_controller::{config, controller, telemetry};
use config::Config;
use controller::{LogSink, PeriodicTrigger, RollingHorizonController};
use std::sync::Arc;
use telemetry::init_tracing;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(e.into());
        }
    }
    init_tracing();

    let cfg = Config::load()?;

    if cfg.controller.horizon_hours == 0 {
        warn!("horizon_hours = 0: every cycle commits an empty schedule and holds production");
    }

    let forecasts = Arc::new(cfg.forecast.engine());
    let ctl = Arc::new(RollingHorizonController::from_config(&cfg, forecasts, Arc::new(LogSink)));

    info!(
        horizon_hours = cfg.controller.horizon_hours,
        control_interval_minutes = cfg.controller.control_interval_minutes,
        failure_policy = %cfg.controller.failure_policy,
        oracle = cfg.oracle.enabled,
        "starting oxygen plant economic MPC"
    );

    let trigger = Arc::new(PeriodicTrigger::every_minutes(
        ctl.clone(),
        cfg.controller.control_interval_minutes,
    ));
    let handle = trigger.clone().start();

    telemetry::shutdown_signal().await;
    handle.abort();

    let summary = ctl.history().summary();
    let ticks = trigger.status().await;
    info!(
        cycles = summary.cycles,
        successes = summary.successes,
        failures = summary.failures,
        success_rate_percent = summary.success_rate_percent,
        mean_cost = ?summary.mean_cost,
        mean_pv_utilization_percent = ?summary.mean_pv_utilization_percent,
        ticks = ticks.run_count,
        final_phase = %ctl.phase(),
        "shutdown complete"
    );
    Ok(())
}
