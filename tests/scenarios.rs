//! End-to-end optimization runs through the public API.

use std::sync::Arc;

use oxygen_mpc_controller::config::Config;
use oxygen_mpc_controller::controller::{
    ChannelSink, ControlCommand, ControllerPhase, ControllerSettings, FailurePolicy, LogSink,
    RollingHorizonController, TriggerOutcome, TriggerSource,
};
use oxygen_mpc_controller::domain::{Forecast, PlantLimits, PlantState};
use oxygen_mpc_controller::forecast::StaticForecastProvider;
use oxygen_mpc_controller::optimizer::{CostModel, CostWeights, EconomicOptimizer, SqpSolver};
use oxygen_mpc_controller::oracle::EfficiencyCurveOracle;

fn cheap_peak_cheap_forecast() -> Forecast {
    Forecast::new(
        vec![0.10, 0.25, 0.10],
        vec![0.0, 50.0, 0.0],
        vec![20.0, 20.0, 20.0],
    )
    .unwrap()
}

fn plant_limits() -> PlantLimits {
    PlantLimits::new(10.0, 100.0, 20.0)
}

fn analytic_optimizer(limits: PlantLimits) -> EconomicOptimizer {
    EconomicOptimizer::new(
        limits,
        Arc::new(CostModel::analytic(CostWeights::default())),
        SqpSolver::default(),
    )
}

fn controller_with(
    limits: PlantLimits,
    forecast: Forecast,
    policy: FailurePolicy,
) -> (RollingHorizonController, StaticForecastProvider) {
    let provider = StaticForecastProvider::new(forecast.clone());
    let ctl = RollingHorizonController::new(
        ControllerSettings {
            horizon_hours: forecast.horizon(),
            failure_policy: policy,
            limits,
            ..ControllerSettings::default()
        },
        CostModel::analytic(CostWeights::default()),
        PlantState::at_production(30.0),
        Arc::new(provider.clone()),
        Arc::new(LogSink),
    );
    (ctl, provider)
}

#[test]
fn cheap_hours_preferred_over_peak() {
    let state = PlantState::at_production(30.0);
    let forecast = cheap_peak_cheap_forecast();
    let plan = analytic_optimizer(plant_limits())
        .optimize(&state, &forecast, None)
        .unwrap();
    let u = &plan.schedule.setpoints_kw;

    assert_eq!(u.len(), 3);
    assert!(u[0] > u[1], "{u:?}");
    assert!(u[2] <= u[0] + 1e-6, "{u:?}");
    for (k, setpoint) in u.iter().enumerate() {
        assert!(*setpoint >= forecast.demand_kw[k] - 1e-3, "step {k} under-served: {u:?}");
        assert!((10.0..=100.0).contains(setpoint));
    }
    assert!((u[0] - 30.0).abs() <= 20.0 + 1e-6);
    assert!((u[1] - u[0]).abs() <= 20.0 + 1e-6);
    assert!((u[2] - u[1]).abs() <= 20.0 + 1e-6);

    assert!((u[0] - 22.5).abs() < 0.05, "{u:?}");
    assert!((plan.schedule.total_cost - 4.875).abs() < 1e-2);
    // 50 kW PV over ~62.5 kWh scheduled
    assert!((plan.schedule.pv_utilization_percent - 80.0).abs() < 0.2);
}

#[test]
fn repeated_solves_are_idempotent() {
    let state = PlantState::at_production(30.0);
    let forecast = cheap_peak_cheap_forecast();
    let optimizer = analytic_optimizer(plant_limits());

    let first = optimizer.optimize(&state, &forecast, None).unwrap();
    let second = optimizer.optimize(&state, &forecast, None).unwrap();
    assert!((first.schedule.total_cost - second.schedule.total_cost).abs() < 1e-9);
}

#[test]
fn twenty_four_hour_tables_solve() {
    let cfg = Config::default();
    let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let start = chrono::DateTime::parse_from_rfc3339("2024-06-01T00:00:00+00:00").unwrap();
    let forecast = runtime
        .block_on(cfg.forecast.engine().get_forecast_from(start, 24))
        .unwrap();

    let plan = analytic_optimizer(cfg.plant.limits())
        .optimize(&cfg.plant.initial_state(), &forecast, None)
        .unwrap();
    assert_eq!(plan.schedule.horizon(), 24);
    assert!(plan.schedule.constraints_satisfied);
    // shift demand of up to 60 kW is reachable from 75 kW and must be met
    for (k, u) in plan.schedule.setpoints_kw.iter().enumerate() {
        assert!(*u >= forecast.demand_kw[k] - 1e-3, "step {k}: {u} < {}", forecast.demand_kw[k]);
    }
}

#[test]
fn oracle_terms_keep_schedule_feasible() {
    let cost_model = CostModel::with_oracle(CostWeights::default(), Arc::new(EfficiencyCurveOracle::default()));
    let optimizer = EconomicOptimizer::new(plant_limits(), Arc::new(cost_model), SqpSolver::default());
    let plan = optimizer
        .optimize(&PlantState::at_production(30.0), &cheap_peak_cheap_forecast(), None)
        .unwrap();

    assert!(plan.schedule.constraints_satisfied);
    assert!(plan.schedule.setpoints_kw.iter().all(|u| (10.0..=100.0).contains(u)));
    assert!(optimizer.cost_model().take_oracle_faults().is_empty());
}

#[tokio::test]
async fn zero_horizon_is_a_trivial_success() {
    let (ctl, _) = controller_with(plant_limits(), cheap_peak_cheap_forecast(), FailurePolicy::SkipCycle);
    let outcome = ctl
        .on_command(ControlCommand::RunOptimization {
            horizon_hours: Some(0),
            state: None,
        })
        .await;
    let TriggerOutcome::Completed(record) = outcome else {
        panic!("cycle did not run");
    };

    assert!(record.success);
    let schedule = record.schedule.unwrap();
    assert!(schedule.is_empty());
    assert_eq!(schedule.total_cost, 0.0);
    assert_eq!(schedule.pv_utilization_percent, 0.0);
    assert_eq!(record.immediate_setpoint_kw, 30.0);
}

#[tokio::test]
async fn contradictory_bounds_hold_production() {
    let (ctl, _) = controller_with(
        PlantLimits::new(100.0, 10.0, 20.0),
        cheap_peak_cheap_forecast(),
        FailurePolicy::SkipCycle,
    );
    let TriggerOutcome::Completed(record) = ctl.on_trigger(TriggerSource::Tick).await else {
        panic!("cycle did not run");
    };

    assert!(!record.success);
    assert_eq!(record.immediate_setpoint_kw, 30.0);
    assert!(record.schedule.is_none());
    assert!(record.message.as_deref().unwrap().contains("contradictory bounds"));
    assert_eq!(ctl.history().len(), 1);
    assert_eq!(ctl.phase(), ControllerPhase::Idle);
}

#[tokio::test]
async fn repeated_failures_fault_until_reset() {
    let (ctl, _) = controller_with(
        PlantLimits::new(100.0, 10.0, 20.0),
        cheap_peak_cheap_forecast(),
        FailurePolicy::SkipCycle,
    );
    for _ in 0..3 {
        ctl.on_trigger(TriggerSource::Tick).await;
    }
    assert_eq!(ctl.phase(), ControllerPhase::Faulted);

    assert_eq!(ctl.on_trigger(TriggerSource::Tick).await, TriggerOutcome::Faulted);
    assert_eq!(ctl.on_forecast_update().await, TriggerOutcome::Faulted);
    assert_eq!(ctl.history().len(), 3);

    ctl.reset();
    assert_eq!(ctl.phase(), ControllerPhase::Idle);
    assert!(matches!(ctl.on_trigger(TriggerSource::Tick).await, TriggerOutcome::Completed(_)));
    assert_eq!(ctl.history().len(), 4);
}

#[tokio::test]
async fn warm_started_cycles_follow_new_forecasts() {
    let (ctl, provider) = controller_with(plant_limits(), cheap_peak_cheap_forecast(), FailurePolicy::SkipCycle);
    ctl.on_trigger(TriggerSource::Tick).await;
    let first = ctl.current_schedule().unwrap();

    // plant moved to the committed setpoint; demand rises
    ctl.on_state_update(PlantState::at_production(first.setpoints_kw[0]));
    provider.update(Forecast::new(vec![0.10; 3], vec![0.0; 3], vec![40.0; 3]).unwrap());
    let TriggerOutcome::Completed(record) = ctl.on_forecast_update().await else {
        panic!("cycle did not run");
    };

    assert!(record.success);
    let u = record.schedule.unwrap().setpoints_kw;
    assert!((u[0] - first.setpoints_kw[0]).abs() <= 20.0 + 1e-6);
    assert!(u[1] >= 40.0 - 1e-3, "{u:?}");
    assert_eq!(ctl.history().summary().successes, 2);
}

#[tokio::test]
async fn dispatches_reach_the_channel() {
    let (sink, mut rx) = ChannelSink::channel(8);
    let ctl = RollingHorizonController::new(
        ControllerSettings {
            horizon_hours: 3,
            limits: plant_limits(),
            ..ControllerSettings::default()
        },
        CostModel::analytic(CostWeights::default()),
        PlantState::at_production(30.0),
        Arc::new(StaticForecastProvider::new(cheap_peak_cheap_forecast())),
        Arc::new(sink),
    );

    ctl.on_trigger(TriggerSource::Tick).await;
    let dispatch = rx.recv().await.unwrap();
    assert!(dispatch.success);
    let schedule = dispatch.schedule.unwrap();
    assert_eq!(dispatch.immediate_setpoint_kw, schedule.setpoints_kw[0]);
}

#[tokio::test]
async fn forecast_shorter_than_horizon_counts_as_failure() {
    let provider = StaticForecastProvider::new(cheap_peak_cheap_forecast());
    let ctl = RollingHorizonController::new(
        ControllerSettings {
            horizon_hours: 6,
            limits: plant_limits(),
            ..ControllerSettings::default()
        },
        CostModel::analytic(CostWeights::default()),
        PlantState::at_production(30.0),
        Arc::new(provider),
        Arc::new(LogSink),
    );

    let TriggerOutcome::Completed(record) = ctl.on_trigger(TriggerSource::Tick).await else {
        panic!("cycle did not run");
    };
    assert!(!record.success);
    assert!(record.message.unwrap().contains("invalid forecast"));
    assert_eq!(ctl.status().consecutive_failures, 1);
}

#[tokio::test]
async fn inconsistent_pushed_forecast_is_a_failed_cycle() {
    let wire = r#"{"generated_at":"2024-06-01T00:00:00+00:00","price":[0.1,0.2,0.1],"pv_kw":[0.0],"demand_kw":[20.0,20.0,20.0]}"#;
    assert!(serde_json::from_str::<Forecast>(wire).is_err());

    let (ctl, provider) = controller_with(plant_limits(), cheap_peak_cheap_forecast(), FailurePolicy::SkipCycle);
    provider.update(Forecast {
        pv_kw: vec![0.0],
        ..cheap_peak_cheap_forecast()
    });

    let TriggerOutcome::Completed(record) = ctl.on_trigger(TriggerSource::Tick).await else {
        panic!("cycle did not run");
    };
    assert!(!record.success);
    assert_eq!(record.immediate_setpoint_kw, 30.0);
    assert!(record.message.unwrap().contains("sequence lengths differ"));
    assert_eq!(ctl.phase(), ControllerPhase::Idle);
}

#[tokio::test]
async fn oversized_command_horizon_is_rejected() {
    let (ctl, _) = controller_with(plant_limits(), cheap_peak_cheap_forecast(), FailurePolicy::SkipCycle);
    let outcome = ctl
        .on_command(ControlCommand::RunOptimization {
            horizon_hours: Some(5000),
            state: None,
        })
        .await;
    let TriggerOutcome::Completed(record) = outcome else {
        panic!("cycle did not run");
    };
    assert!(!record.success);
    assert!(record.message.unwrap().contains("command rejected"));
    assert_eq!(ctl.history().len(), 1);
}
