//! Economic cost of a candidate setpoint sequence.
//!
//! Per horizon step `k`:
//!
//! | term           | value                                            |
//! |----------------|--------------------------------------------------|
//! | energy         | `u[k] * price[k]`                                |
//! | PV incentive   | `-pv[k] * w_pv`                                  |
//! | demand penalty | `max(0, demand[k] - u[k]) * w_demand`            |
//! | ramp penalty   | `(u[k] - prev[k])^2 * w_ramp`, `prev[0] = state` |
//!
//! With an oracle configured, each step also adds
//! `operating_cost + (1 - expected_efficiency / 100) * w_eff`.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::domain::{Forecast, PlantState};
use crate::oracle::{parse_prediction, OracleContext, PredictionOracle};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostWeights {
    pub pv_incentive: f64,
    pub demand_penalty: f64,
    pub ramp_penalty: f64,
    pub efficiency_penalty: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            pv_incentive: 0.1,
            demand_penalty: 100.0,
            ramp_penalty: 0.01,
            efficiency_penalty: 10.0,
        }
    }
}

/// Horizon totals of each cost term
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub energy: f64,
    pub pv_incentive: f64,
    pub demand_penalty: f64,
    pub ramp_penalty: f64,
    pub oracle: f64,
}

impl CostBreakdown {
    pub fn total(&self) -> f64 {
        self.energy + self.pv_incentive + self.demand_penalty + self.ramp_penalty + self.oracle
    }
}

/// How the demand shortfall enters the objective
#[derive(Debug, Clone, Copy)]
enum DemandTerm<'a> {
    /// `max(0, demand - u)` computed from the candidate
    Hinge,
    /// Shortfall supplied as explicit decision variables
    Slack(&'a [f64]),
}

/// Analytic terms only; pure function of its arguments.
///
/// Steps beyond the shorter of `candidate` and `forecast` are ignored.
pub fn analytic_breakdown(
    weights: &CostWeights,
    candidate: &[f64],
    state: &PlantState,
    forecast: &Forecast,
) -> CostBreakdown {
    analytic_terms(weights, candidate, DemandTerm::Hinge, state, forecast)
}

fn analytic_terms(
    weights: &CostWeights,
    candidate: &[f64],
    demand_term: DemandTerm<'_>,
    state: &PlantState,
    forecast: &Forecast,
) -> CostBreakdown {
    let horizon = candidate.len().min(forecast.horizon());
    let mut out = CostBreakdown::default();
    let mut prev = state.production_kw;

    for k in 0..horizon {
        let u = candidate[k];
        out.energy += u * forecast.price[k];
        out.pv_incentive -= forecast.pv_kw[k] * weights.pv_incentive;
        let shortfall = match demand_term {
            DemandTerm::Hinge => (forecast.demand_kw[k] - u).max(0.0),
            DemandTerm::Slack(slack) => slack.get(k).copied().unwrap_or(0.0),
        };
        out.demand_penalty += shortfall * weights.demand_penalty;
        out.ramp_penalty += (u - prev).powi(2) * weights.ramp_penalty;
        prev = u;
    }
    out
}

/// Oracle fault counters accumulated since the last [`CostModel::take_oracle_faults`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OracleFaultCounts {
    /// Evaluations that fell back to analytic-only terms
    pub unavailable: u64,
    /// Responses with missing or malformed fields
    pub malformed: u64,
}

impl OracleFaultCounts {
    pub fn is_empty(&self) -> bool {
        self.unavailable == 0 && self.malformed == 0
    }
}

pub struct CostModel {
    weights: CostWeights,
    oracle: Option<Arc<dyn PredictionOracle>>,
    unavailable: AtomicU64,
    malformed: AtomicU64,
}

impl CostModel {
    /// Cost model without oracle terms
    pub fn analytic(weights: CostWeights) -> Self {
        Self {
            weights,
            oracle: None,
            unavailable: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
        }
    }

    pub fn with_oracle(weights: CostWeights, oracle: Arc<dyn PredictionOracle>) -> Self {
        Self {
            oracle: Some(oracle),
            ..Self::analytic(weights)
        }
    }

    pub fn weights(&self) -> &CostWeights {
        &self.weights
    }

    pub fn has_oracle(&self) -> bool {
        self.oracle.is_some()
    }

    /// Total horizon cost of `candidate`
    pub fn evaluate(&self, candidate: &[f64], state: &PlantState, forecast: &Forecast) -> f64 {
        self.breakdown(candidate, state, forecast).total()
    }

    pub fn breakdown(&self, candidate: &[f64], state: &PlantState, forecast: &Forecast) -> CostBreakdown {
        let mut out = analytic_terms(&self.weights, candidate, DemandTerm::Hinge, state, forecast);
        out.oracle = self.oracle_terms(candidate, state, forecast);
        out
    }

    /// Cost with the demand shortfall given as explicit variables.
    ///
    /// Equals [`CostModel::evaluate`] whenever `shortfall[k] == max(0, demand[k] - candidate[k])`;
    /// the solver minimizes this smooth form under `demand - u - shortfall <= 0`.
    pub fn evaluate_epigraph(
        &self,
        candidate: &[f64],
        shortfall: &[f64],
        state: &PlantState,
        forecast: &Forecast,
    ) -> f64 {
        let analytic = analytic_terms(
            &self.weights,
            candidate,
            DemandTerm::Slack(shortfall),
            state,
            forecast,
        );
        analytic.total() + self.oracle_terms(candidate, state, forecast)
    }

    /// Reset and return the oracle fault counters
    pub fn take_oracle_faults(&self) -> OracleFaultCounts {
        OracleFaultCounts {
            unavailable: self.unavailable.swap(0, Ordering::Relaxed),
            malformed: self.malformed.swap(0, Ordering::Relaxed),
        }
    }

    /// Sum of oracle terms, or zero when the oracle is absent or unavailable
    /// for any step of this evaluation.
    fn oracle_terms(&self, candidate: &[f64], state: &PlantState, forecast: &Forecast) -> f64 {
        let Some(oracle) = &self.oracle else {
            return 0.0;
        };

        let horizon = candidate.len().min(forecast.horizon());
        let mut total = 0.0;
        for k in 0..horizon {
            let context = OracleContext::overlay(state, forecast, k, candidate[k]);
            let response = match oracle.predict(&context) {
                Ok(response) => response,
                Err(e) => {
                    self.unavailable.fetch_add(1, Ordering::Relaxed);
                    debug!(step = k, error = %e, "oracle unavailable; using analytic terms");
                    return 0.0;
                }
            };
            let parsed = parse_prediction(&response);
            if !parsed.is_clean() {
                self.malformed.fetch_add(1, Ordering::Relaxed);
                debug!(step = k, fields = ?parsed.faults, "malformed oracle response");
            }
            let p = parsed.prediction;
            total += p.operating_cost
                + (1.0 - p.expected_efficiency / 100.0) * self.weights.efficiency_penalty;
        }
        total
    }
}

impl std::fmt::Debug for CostModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostModel")
            .field("weights", &self.weights)
            .field("oracle", &self.oracle.is_some())
            .finish()
    }
}
