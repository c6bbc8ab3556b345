//! Rolling-horizon controller.
//!
//! ```text
//! Idle -> Solving -> Committed -> Idle
//!            \
//!             `-> Faulted   (after N consecutive failures; cleared by Reset)
//! ```
//!
//! One cycle runs at a time. Triggers that arrive while a cycle is running are
//! coalesced into a single follow-up cycle; telemetry and forecast updates
//! received meanwhile are buffered and only read when the next cycle starts.

pub mod history;
pub mod scheduler;
pub mod sink;

pub use history::{HistorySummary, OptimizationHistory};
pub use scheduler::{PeriodicTrigger, TaskStatus};
pub use sink::{ChannelSink, LogSink, ScheduleDispatch, ScheduleSink};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use strum::Display;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::domain::{OptimizationRecord, PlantLimits, PlantState, Schedule};
use crate::error::MpcError;
use crate::forecast::ForecastProvider;
use crate::optimizer::{CostModel, EconomicOptimizer, PlanFailure, SqpSettings, SqpSolver};
use crate::oracle::PredictionOracle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ControllerPhase {
    Idle,
    Solving,
    Committed,
    Faulted,
}

/// What a failed cycle does to forecast-driven re-optimization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailurePolicy {
    /// Only the failed cycle is lost; the next trigger of any kind re-solves
    #[default]
    SkipCycle,
    /// Forecast updates stop triggering cycles until a tick or command cycle succeeds
    FreezeForecastTriggers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TriggerSource {
    Tick,
    Command,
    ForecastUpdate,
}

impl TriggerSource {
    /// Label of a follow-up cycle that serves both requests
    fn merged(self, other: Self) -> Self {
        use TriggerSource::*;
        match (self, other) {
            (Command, _) | (_, Command) => Command,
            (Tick, _) | (_, Tick) => Tick,
            _ => ForecastUpdate,
        }
    }
}

/// Message accepted on the command channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlCommand {
    /// Re-optimize now, optionally with a different horizon or a fresh state
    RunOptimization {
        #[serde(default)]
        horizon_hours: Option<usize>,
        #[serde(default)]
        state: Option<PlantState>,
    },
    /// Leave `Faulted` and clear the failure counter
    Reset,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    /// A cycle ran; holds the record of the last cycle this call executed
    Completed(OptimizationRecord),
    /// A cycle was already running; it will run once more when it finishes
    Coalesced,
    /// The controller is faulted and needs a reset
    Faulted,
    /// The trigger was ignored by policy
    Suppressed,
    ResetApplied,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    pub horizon_hours: usize,
    /// Longest horizon a command may request
    pub max_horizon_hours: usize,
    pub max_consecutive_failures: u32,
    pub failure_policy: FailurePolicy,
    pub reoptimize_on_forecast_update: bool,
    pub limits: PlantLimits,
    pub solver: SqpSettings,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            horizon_hours: 24,
            max_horizon_hours: 168,
            max_consecutive_failures: 3,
            failure_policy: FailurePolicy::SkipCycle,
            reoptimize_on_forecast_update: true,
            limits: PlantLimits::default(),
            solver: SqpSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub phase: ControllerPhase,
    pub consecutive_failures: u32,
    pub forecast_triggers_frozen: bool,
    /// Setpoint handed to actuation by the last cycle
    pub last_setpoint_kw: Option<f64>,
    pub cycles: usize,
}

#[derive(Debug, Default)]
struct CycleOverride {
    horizon_hours: Option<usize>,
    state: Option<PlantState>,
}

pub struct RollingHorizonController {
    settings: ControllerSettings,
    optimizer: Arc<EconomicOptimizer>,
    forecasts: Arc<dyn ForecastProvider>,
    sink: Arc<dyn ScheduleSink>,
    history: OptimizationHistory,

    plant_state: RwLock<PlantState>,
    phase: RwLock<ControllerPhase>,
    previous: RwLock<Option<Schedule>>,
    last_setpoint_kw: RwLock<Option<f64>>,
    consecutive_failures: AtomicU32,
    forecast_frozen: AtomicBool,

    cycle_lock: tokio::sync::Mutex<()>,
    rerun_requested: AtomicBool,
    pending_source: Mutex<Option<TriggerSource>>,
    pending_override: Mutex<Option<CycleOverride>>,
}

impl RollingHorizonController {
    pub fn new(
        settings: ControllerSettings,
        cost_model: CostModel,
        initial_state: PlantState,
        forecasts: Arc<dyn ForecastProvider>,
        sink: Arc<dyn ScheduleSink>,
    ) -> Self {
        let optimizer = EconomicOptimizer::new(
            settings.limits,
            Arc::new(cost_model),
            SqpSolver::new(settings.solver.clone()),
        );
        Self {
            settings,
            optimizer: Arc::new(optimizer),
            forecasts,
            sink,
            history: OptimizationHistory::new(),
            plant_state: RwLock::new(initial_state),
            phase: RwLock::new(ControllerPhase::Idle),
            previous: RwLock::new(None),
            last_setpoint_kw: RwLock::new(None),
            consecutive_failures: AtomicU32::new(0),
            forecast_frozen: AtomicBool::new(false),
            cycle_lock: tokio::sync::Mutex::new(()),
            rerun_requested: AtomicBool::new(false),
            pending_source: Mutex::new(None),
            pending_override: Mutex::new(None),
        }
    }

    /// Wire settings, cost weights and the optional analytic oracle from config
    pub fn from_config(cfg: &Config, forecasts: Arc<dyn ForecastProvider>, sink: Arc<dyn ScheduleSink>) -> Self {
        let settings = ControllerSettings {
            horizon_hours: cfg.controller.horizon_hours,
            max_horizon_hours: cfg.controller.max_horizon_hours,
            max_consecutive_failures: cfg.controller.max_consecutive_failures,
            failure_policy: cfg.controller.failure_policy,
            reoptimize_on_forecast_update: cfg.controller.reoptimize_on_forecast_update,
            limits: cfg.plant.limits(),
            solver: cfg.solver.settings(),
        };
        let cost_model = if cfg.oracle.enabled {
            let oracle: Arc<dyn PredictionOracle> = Arc::new(cfg.oracle.efficiency_curve());
            CostModel::with_oracle(cfg.cost.weights(), oracle)
        } else {
            CostModel::analytic(cfg.cost.weights())
        };
        Self::new(settings, cost_model, cfg.plant.initial_state(), forecasts, sink)
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn phase(&self) -> ControllerPhase {
        *self.phase.read()
    }

    pub fn history(&self) -> &OptimizationHistory {
        &self.history
    }

    /// Schedule used to warm-start the next cycle
    pub fn current_schedule(&self) -> Option<Schedule> {
        self.previous.read().clone()
    }

    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            phase: self.phase(),
            consecutive_failures: self.consecutive_failures.load(Ordering::SeqCst),
            forecast_triggers_frozen: self.forecast_frozen.load(Ordering::SeqCst),
            last_setpoint_kw: *self.last_setpoint_kw.read(),
            cycles: self.history.len(),
        }
    }

    /// Buffer the latest plant measurement for the next cycle
    pub fn on_state_update(&self, state: PlantState) {
        *self.plant_state.write() = state;
    }

    pub async fn on_forecast_update(&self) -> TriggerOutcome {
        self.on_trigger(TriggerSource::ForecastUpdate).await
    }

    pub async fn on_command(&self, command: ControlCommand) -> TriggerOutcome {
        match command {
            ControlCommand::Reset => {
                self.reset();
                TriggerOutcome::ResetApplied
            }
            ControlCommand::RunOptimization { horizon_hours, state } => {
                if self.phase() == ControllerPhase::Faulted {
                    warn!("optimization command ignored while faulted");
                    return TriggerOutcome::Faulted;
                }
                *self.pending_override.lock() = Some(CycleOverride { horizon_hours, state });
                self.request_cycle(TriggerSource::Command).await
            }
        }
    }

    pub async fn on_trigger(&self, source: TriggerSource) -> TriggerOutcome {
        if self.phase() == ControllerPhase::Faulted {
            debug!(%source, "trigger ignored while faulted");
            return TriggerOutcome::Faulted;
        }
        if self.forecast_trigger_suppressed(source) {
            debug!("forecast-driven re-optimization suppressed");
            return TriggerOutcome::Suppressed;
        }
        self.request_cycle(source).await
    }

    /// Leave `Faulted`, clear the failure counter and the warm start.
    ///
    /// A cycle that is solving keeps its phase and sets the next one itself.
    pub fn reset(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.forecast_frozen.store(false, Ordering::SeqCst);
        *self.previous.write() = None;
        let mut phase = self.phase.write();
        if *phase == ControllerPhase::Solving {
            info!("controller reset during a running cycle");
            return;
        }
        let was = std::mem::replace(&mut *phase, ControllerPhase::Idle);
        info!(previous_phase = %was, "controller reset");
    }

    fn forecast_trigger_suppressed(&self, source: TriggerSource) -> bool {
        source == TriggerSource::ForecastUpdate
            && (!self.settings.reoptimize_on_forecast_update || self.forecast_frozen.load(Ordering::SeqCst))
    }

    async fn request_cycle(&self, source: TriggerSource) -> TriggerOutcome {
        {
            let mut pending = self.pending_source.lock();
            *pending = Some(pending.map_or(source, |queued| queued.merged(source)));
        }
        self.rerun_requested.store(true, Ordering::SeqCst);
        let mut outcome = TriggerOutcome::Coalesced;
        loop {
            let Ok(guard) = self.cycle_lock.try_lock() else {
                debug!(%source, "cycle in progress; request coalesced");
                return outcome;
            };
            while self.rerun_requested.swap(false, Ordering::SeqCst) {
                let next = self.pending_source.lock().take().unwrap_or(source);
                if self.phase() == ControllerPhase::Faulted {
                    outcome = TriggerOutcome::Faulted;
                    break;
                }
                if self.forecast_trigger_suppressed(next) {
                    debug!("queued forecast-driven re-optimization suppressed");
                    if outcome == TriggerOutcome::Coalesced {
                        outcome = TriggerOutcome::Suppressed;
                    }
                    continue;
                }
                outcome = TriggerOutcome::Completed(self.run_cycle(next).await);
            }
            drop(guard);
            if !self.rerun_requested.load(Ordering::SeqCst) {
                return outcome;
            }
        }
    }

    async fn run_cycle(&self, source: TriggerSource) -> OptimizationRecord {
        let overrides = self.pending_override.lock().take().unwrap_or_default();
        let max_horizon = self.settings.max_horizon_hours;
        if let Some(requested) = overrides.horizon_hours.filter(|h| *h > max_horizon) {
            let state = *self.plant_state.read();
            let error = MpcError::RejectedCommand(format!(
                "horizon of {requested} h exceeds the {max_horizon} h maximum"
            ));
            return self.fail(source, &state, error, 0).await;
        }
        if let Some(state) = overrides.state {
            self.on_state_update(state);
        }
        let horizon = overrides.horizon_hours.unwrap_or(self.settings.horizon_hours);
        let state = *self.plant_state.read();
        self.set_phase(ControllerPhase::Solving);
        info!(%source, horizon, production_kw = state.production_kw, "optimization cycle started");

        let forecast = match self.forecasts.forecast(horizon).await {
            Ok(f) => f.check().and_then(|()| {
                f.truncated(horizon).ok_or_else(|| {
                    MpcError::InvalidForecast(format!("forecast covers {} steps, {horizon} requested", f.horizon()))
                })
            }),
            Err(e) => Err(MpcError::InvalidForecast(format!("{e:#}"))),
        };
        let forecast = match forecast {
            Ok(f) => f,
            Err(e) => return self.fail(source, &state, e, 0).await,
        };

        let warm_start = self.previous.read().as_ref().and_then(|s| s.shifted(horizon));
        let optimizer = self.optimizer.clone();
        let joined = tokio::task::spawn_blocking(move || {
            optimizer.optimize(&state, &forecast, warm_start.as_deref())
        })
        .await;

        let faults = self.optimizer.cost_model().take_oracle_faults();
        if !faults.is_empty() {
            warn!(
                unavailable = faults.unavailable,
                malformed = faults.malformed,
                "oracle faults during cycle; affected evaluations used analytic terms"
            );
        }

        match joined {
            Ok(Ok(plan)) => self.commit(source, &state, plan.schedule, plan.iterations, &plan.message).await,
            Ok(Err(PlanFailure { error, iterations })) => self.fail(source, &state, error, iterations).await,
            Err(e) => {
                self.fail(source, &state, MpcError::SolverNonConvergence(format!("solver task aborted: {e}")), 0)
                    .await
            }
        }
    }

    async fn commit(
        &self,
        source: TriggerSource,
        state: &PlantState,
        schedule: Schedule,
        iterations: usize,
        message: &str,
    ) -> OptimizationRecord {
        let setpoint = schedule.immediate_setpoint().unwrap_or(state.production_kw);
        self.set_phase(ControllerPhase::Committed);
        self.consecutive_failures.store(0, Ordering::SeqCst);
        if source != TriggerSource::ForecastUpdate {
            self.forecast_frozen.store(false, Ordering::SeqCst);
        }

        info!(
            setpoint_kw = setpoint,
            total_cost = schedule.total_cost,
            pv_utilization_percent = schedule.pv_utilization_percent,
            iterations,
            message,
            "schedule committed"
        );

        *self.previous.write() = Some(schedule.clone());
        let record = OptimizationRecord::committed(schedule, setpoint, iterations);
        self.finish(record, ControllerPhase::Idle).await
    }

    async fn fail(&self, source: TriggerSource, state: &PlantState, error: MpcError, iterations: usize) -> OptimizationRecord {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if self.settings.failure_policy == FailurePolicy::FreezeForecastTriggers {
            self.forecast_frozen.store(true, Ordering::SeqCst);
        }

        warn!(
            %source,
            kind = error.kind(),
            error = %error,
            held_setpoint_kw = state.production_kw,
            consecutive_failures = failures,
            "optimization cycle failed; holding setpoint"
        );

        let next = if failures >= self.settings.max_consecutive_failures {
            let fault = MpcError::RepeatedFailure { failures };
            error!(error = %fault, "automatic re-optimization halted until reset");
            ControllerPhase::Faulted
        } else {
            ControllerPhase::Idle
        };

        let record = OptimizationRecord::failed(error.to_string(), state.production_kw, iterations);
        self.finish(record, next).await
    }

    async fn finish(&self, record: OptimizationRecord, next: ControllerPhase) -> OptimizationRecord {
        *self.last_setpoint_kw.write() = Some(record.immediate_setpoint_kw);
        self.history.append(record.clone());
        if let Err(e) = self.sink.publish(ScheduleDispatch::from_record(&record)).await {
            warn!(error = %e, "failed to publish schedule");
        }
        self.set_phase(next);
        record
    }

    fn set_phase(&self, phase: ControllerPhase) {
        let was = std::mem::replace(&mut *self.phase.write(), phase);
        if was != phase {
            debug!(from = %was, to = %phase, "phase change");
        }
    }
}

impl std::fmt::Debug for RollingHorizonController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollingHorizonController")
            .field("settings", &self.settings)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Forecast;
    use crate::forecast::MockForecastProvider;
    use crate::optimizer::CostWeights;
    use sink::MockScheduleSink;
    use std::time::Duration;

    fn cheap_peak_cheap() -> Forecast {
        Forecast::new(
            vec![0.10, 0.25, 0.10],
            vec![0.0, 50.0, 0.0],
            vec![20.0, 20.0, 20.0],
        )
        .unwrap()
    }

    fn settings(limits: PlantLimits, policy: FailurePolicy) -> ControllerSettings {
        ControllerSettings {
            horizon_hours: 3,
            failure_policy: policy,
            limits,
            ..ControllerSettings::default()
        }
    }

    fn quiet_sink() -> Arc<dyn ScheduleSink> {
        let mut sink = MockScheduleSink::new();
        sink.expect_publish().returning(|_| Ok(()));
        Arc::new(sink)
    }

    fn fixed_forecasts() -> Arc<dyn ForecastProvider> {
        let mut provider = MockForecastProvider::new();
        provider.expect_forecast().returning(|_| Ok(cheap_peak_cheap()));
        Arc::new(provider)
    }

    fn controller(limits: PlantLimits, policy: FailurePolicy) -> RollingHorizonController {
        RollingHorizonController::new(
            settings(limits, policy),
            CostModel::analytic(CostWeights::default()),
            PlantState::at_production(30.0),
            fixed_forecasts(),
            quiet_sink(),
        )
    }

    #[tokio::test]
    async fn test_successful_cycle_commits_first_setpoint() {
        let ctl = controller(PlantLimits::new(10.0, 100.0, 20.0), FailurePolicy::SkipCycle);
        let TriggerOutcome::Completed(record) = ctl.on_trigger(TriggerSource::Tick).await else {
            panic!("cycle did not run");
        };

        assert!(record.success);
        let schedule = record.schedule.unwrap();
        assert_eq!(record.immediate_setpoint_kw, schedule.setpoints_kw[0]);
        assert_eq!(ctl.phase(), ControllerPhase::Idle);
        assert_eq!(ctl.current_schedule().unwrap().id, schedule.id);
        assert_eq!(ctl.status().last_setpoint_kw, Some(record.immediate_setpoint_kw));
    }

    #[tokio::test]
    async fn test_failure_holds_production_then_faults() {
        let ctl = controller(PlantLimits::new(100.0, 10.0, 20.0), FailurePolicy::SkipCycle);

        for expected in 1..=3 {
            let TriggerOutcome::Completed(record) = ctl.on_trigger(TriggerSource::Tick).await else {
                panic!("cycle did not run");
            };
            assert!(!record.success);
            assert_eq!(record.immediate_setpoint_kw, 30.0);
            assert!(record.message.unwrap().contains("contradictory bounds"));
            assert_eq!(ctl.status().consecutive_failures, expected);
        }

        assert_eq!(ctl.phase(), ControllerPhase::Faulted);
        assert_eq!(ctl.on_trigger(TriggerSource::Tick).await, TriggerOutcome::Faulted);
        assert_eq!(
            ctl.on_command(ControlCommand::RunOptimization { horizon_hours: None, state: None }).await,
            TriggerOutcome::Faulted
        );
        assert_eq!(ctl.history().len(), 3);

        assert_eq!(ctl.on_command(ControlCommand::Reset).await, TriggerOutcome::ResetApplied);
        assert_eq!(ctl.phase(), ControllerPhase::Idle);
        assert_eq!(ctl.status().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_success_clears_failure_counter() {
        let mut provider = MockForecastProvider::new();
        let mut calls = 0;
        provider.expect_forecast().returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(anyhow::anyhow!("forecast service unreachable"))
            } else {
                Ok(cheap_peak_cheap())
            }
        });
        let ctl = RollingHorizonController::new(
            settings(PlantLimits::new(10.0, 100.0, 20.0), FailurePolicy::SkipCycle),
            CostModel::analytic(CostWeights::default()),
            PlantState::at_production(30.0),
            Arc::new(provider),
            quiet_sink(),
        );

        ctl.on_trigger(TriggerSource::Tick).await;
        assert_eq!(ctl.status().consecutive_failures, 1);
        ctl.on_trigger(TriggerSource::Tick).await;
        assert_eq!(ctl.status().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_freeze_policy_suppresses_forecast_triggers() {
        let ctl = controller(PlantLimits::new(100.0, 10.0, 20.0), FailurePolicy::FreezeForecastTriggers);
        ctl.on_trigger(TriggerSource::Tick).await;
        assert!(ctl.status().forecast_triggers_frozen);
        assert_eq!(ctl.on_forecast_update().await, TriggerOutcome::Suppressed);
        assert_eq!(ctl.history().len(), 1);
    }

    #[tokio::test]
    async fn test_skip_policy_keeps_forecast_triggers() {
        let ctl = controller(PlantLimits::new(100.0, 10.0, 20.0), FailurePolicy::SkipCycle);
        ctl.on_trigger(TriggerSource::Tick).await;
        assert!(!ctl.status().forecast_triggers_frozen);
        assert!(matches!(ctl.on_forecast_update().await, TriggerOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_command_overrides_state_and_horizon() {
        let ctl = controller(PlantLimits::new(10.0, 100.0, 20.0), FailurePolicy::SkipCycle);
        let outcome = ctl
            .on_command(ControlCommand::RunOptimization {
                horizon_hours: Some(2),
                state: Some(PlantState::at_production(40.0)),
            })
            .await;
        let TriggerOutcome::Completed(record) = outcome else {
            panic!("cycle did not run");
        };
        let schedule = record.schedule.unwrap();
        assert_eq!(schedule.horizon(), 2);
        assert!((schedule.setpoints_kw[0] - 40.0).abs() <= 20.0 + 1e-6);
    }

    #[tokio::test]
    async fn test_command_horizon_above_maximum_is_rejected() {
        let mut provider = MockForecastProvider::new();
        provider.expect_forecast().never();
        let ctl = RollingHorizonController::new(
            settings(PlantLimits::new(10.0, 100.0, 20.0), FailurePolicy::SkipCycle),
            CostModel::analytic(CostWeights::default()),
            PlantState::at_production(30.0),
            Arc::new(provider),
            quiet_sink(),
        );

        let outcome = ctl
            .on_command(ControlCommand::RunOptimization {
                horizon_hours: Some(5000),
                state: Some(PlantState::at_production(55.0)),
            })
            .await;
        let TriggerOutcome::Completed(record) = outcome else {
            panic!("cycle did not run");
        };
        assert!(!record.success);
        assert!(record.message.unwrap().contains("exceeds the 168 h maximum"));
        assert_eq!(record.immediate_setpoint_kw, 30.0);
        assert_eq!(ctl.phase(), ControllerPhase::Idle);
    }

    #[tokio::test]
    async fn test_sink_errors_do_not_fail_the_cycle() {
        let mut sink = MockScheduleSink::new();
        sink.expect_publish().times(1).returning(|_| Err(anyhow::anyhow!("broker down")));
        let ctl = RollingHorizonController::new(
            settings(PlantLimits::new(10.0, 100.0, 20.0), FailurePolicy::SkipCycle),
            CostModel::analytic(CostWeights::default()),
            PlantState::at_production(30.0),
            fixed_forecasts(),
            Arc::new(sink),
        );
        let TriggerOutcome::Completed(record) = ctl.on_trigger(TriggerSource::Tick).await else {
            panic!("cycle did not run");
        };
        assert!(record.success);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_triggers_coalesce() {
        let mut provider = MockForecastProvider::new();
        provider.expect_forecast().returning(|_| {
            std::thread::sleep(Duration::from_millis(50));
            Ok(cheap_peak_cheap())
        });
        let ctl = Arc::new(RollingHorizonController::new(
            settings(PlantLimits::new(10.0, 100.0, 20.0), FailurePolicy::SkipCycle),
            CostModel::analytic(CostWeights::default()),
            PlantState::at_production(30.0),
            Arc::new(provider),
            quiet_sink(),
        ));

        let first = {
            let ctl = ctl.clone();
            tokio::spawn(async move { ctl.on_trigger(TriggerSource::Tick).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = ctl.on_trigger(TriggerSource::Command).await;
        let third = ctl.on_trigger(TriggerSource::Command).await;

        assert_eq!(second, TriggerOutcome::Coalesced);
        assert_eq!(third, TriggerOutcome::Coalesced);
        assert!(matches!(first.await.unwrap(), TriggerOutcome::Completed(_)));
        // the running cycle plus one follow-up
        assert_eq!(ctl.history().len(), 2);
    }

    fn slow_forecasts(fail: bool) -> Arc<dyn ForecastProvider> {
        let mut provider = MockForecastProvider::new();
        provider.expect_forecast().returning(move |_| {
            std::thread::sleep(Duration::from_millis(50));
            if fail {
                Err(anyhow::anyhow!("forecast service unreachable"))
            } else {
                Ok(cheap_peak_cheap())
            }
        });
        Arc::new(provider)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_queued_forecast_update_respects_freeze() {
        let ctl = Arc::new(RollingHorizonController::new(
            settings(PlantLimits::new(10.0, 100.0, 20.0), FailurePolicy::FreezeForecastTriggers),
            CostModel::analytic(CostWeights::default()),
            PlantState::at_production(30.0),
            slow_forecasts(true),
            quiet_sink(),
        ));

        let tick = {
            let ctl = ctl.clone();
            tokio::spawn(async move { ctl.on_trigger(TriggerSource::Tick).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(ctl.on_forecast_update().await, TriggerOutcome::Coalesced);

        let TriggerOutcome::Completed(record) = tick.await.unwrap() else {
            panic!("cycle did not run");
        };
        assert!(!record.success);
        // the queued forecast update was dropped once the tick froze triggers
        assert_eq!(ctl.history().len(), 1);
        assert!(ctl.status().forecast_triggers_frozen);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reset_leaves_running_cycle_phase() {
        let ctl = Arc::new(RollingHorizonController::new(
            settings(PlantLimits::new(10.0, 100.0, 20.0), FailurePolicy::SkipCycle),
            CostModel::analytic(CostWeights::default()),
            PlantState::at_production(30.0),
            slow_forecasts(false),
            quiet_sink(),
        ));

        let tick = {
            let ctl = ctl.clone();
            tokio::spawn(async move { ctl.on_trigger(TriggerSource::Tick).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        ctl.reset();
        assert_eq!(ctl.phase(), ControllerPhase::Solving);

        assert!(matches!(tick.await.unwrap(), TriggerOutcome::Completed(_)));
        assert_eq!(ctl.phase(), ControllerPhase::Idle);
    }

    #[test]
    fn test_follow_up_label_prefers_explicit_requests() {
        use TriggerSource::*;
        assert_eq!(ForecastUpdate.merged(Tick), Tick);
        assert_eq!(Tick.merged(Command), Command);
        assert_eq!(ForecastUpdate.merged(ForecastUpdate), ForecastUpdate);
    }

    #[test]
    fn test_command_wire_format() {
        let cmd: ControlCommand = serde_json::from_str(r#"{"command":"RUN_OPTIMIZATION"}"#).unwrap();
        assert_eq!(cmd, ControlCommand::RunOptimization { horizon_hours: None, state: None });

        let cmd: ControlCommand = serde_json::from_str(r#"{"command":"RESET"}"#).unwrap();
        assert_eq!(cmd, ControlCommand::Reset);

        let cmd: ControlCommand = serde_json::from_str(
            r#"{"command":"RUN_OPTIMIZATION","horizon_hours":6,"state":{"production_kw":40.0,"efficiency_percent":77.0,"safety_margin_percent":20.0,"pv_power_kw":5.0,"oxygen_demand_kw":35.0}}"#,
        )
        .unwrap();
        assert!(matches!(cmd, ControlCommand::RunOptimization { horizon_hours: Some(6), state: Some(_) }));
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(ControllerPhase::Faulted.to_string(), "faulted");
        assert_eq!(FailurePolicy::FreezeForecastTriggers.to_string(), "freeze_forecast_triggers");
    }
}
