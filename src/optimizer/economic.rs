use std::sync::Arc;

use super::constraints::EconomicProblem;
use super::cost::CostModel;
use super::sqp::SqpSolver;
use crate::domain::{Forecast, PlantLimits, PlantState, Schedule};
use crate::error::MpcError;

/// Result of one successful horizon optimization
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub schedule: Schedule,
    pub iterations: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanFailure {
    pub error: MpcError,
    pub iterations: usize,
}

/// Builds the per-cycle problem and runs the solver on the cost model.
#[derive(Debug, Clone)]
pub struct EconomicOptimizer {
    limits: PlantLimits,
    cost_model: Arc<CostModel>,
    solver: SqpSolver,
}

impl EconomicOptimizer {
    pub fn new(limits: PlantLimits, cost_model: Arc<CostModel>, solver: SqpSolver) -> Self {
        Self {
            limits,
            cost_model,
            solver,
        }
    }

    pub fn limits(&self) -> &PlantLimits {
        &self.limits
    }

    pub fn cost_model(&self) -> &CostModel {
        &self.cost_model
    }

    /// Optimize the horizon covered by `forecast`.
    ///
    /// `warm_start` is used when it matches the horizon; otherwise the
    /// measured production is repeated over the horizon.
    pub fn optimize(
        &self,
        state: &PlantState,
        forecast: &Forecast,
        warm_start: Option<&[f64]>,
    ) -> Result<Plan, PlanFailure> {
        forecast.check().map_err(|error| PlanFailure { error, iterations: 0 })?;
        let horizon = forecast.horizon();
        if horizon == 0 {
            return Ok(Plan {
                schedule: Schedule::new(Vec::new(), 0.0, &[], true),
                iterations: 0,
                message: MpcError::DegenerateInput("empty horizon".to_string()).to_string(),
            });
        }

        let problem = EconomicProblem::build(&self.limits, state, forecast);
        let guess = match warm_start {
            Some(w) if w.len() == horizon => w.to_vec(),
            _ => vec![state.production_kw; horizon],
        };
        let z0 = problem.initial_point(&guess, forecast);

        let outcome = self.solver.solve(
            &z0,
            |z: &[f64]| {
                self.cost_model
                    .evaluate_epigraph(problem.setpoints(z), problem.shortfall(z), state, forecast)
            },
            &problem.bounds,
            &problem.constraints,
        );
        if !outcome.success {
            return Err(PlanFailure {
                error: MpcError::SolverNonConvergence(outcome.message),
                iterations: outcome.iterations,
            });
        }

        let satisfied = problem.setpoints_feasible(&outcome.solution, self.solver.settings().feasibility_tolerance);
        let setpoints: Vec<f64> = problem
            .setpoints(&outcome.solution)
            .iter()
            .map(|u| self.limits.clamp(*u))
            .collect();
        let total_cost = self.cost_model.evaluate(&setpoints, state, forecast);

        Ok(Plan {
            schedule: Schedule::new(setpoints, total_cost, &forecast.pv_kw, satisfied),
            iterations: outcome.iterations,
            message: outcome.message,
        })
    }
}
