use serde::{Deserialize, Serialize};

use crate::domain::{Forecast, PlantLimits, PlantState};

/// Per-variable box bounds, handled by the solver separately from the
/// inequality rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    pub fn uniform(n: usize, lower: f64, upper: f64) -> Self {
        Self {
            lower: vec![lower; n],
            upper: vec![upper; n],
        }
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    /// First variable whose lower bound exceeds its upper bound (or is NaN)
    pub fn first_contradiction(&self) -> Option<usize> {
        self.lower
            .iter()
            .zip(&self.upper)
            .position(|(lo, hi)| !(lo <= hi))
    }

    /// Widest finite interval, at least 1.0
    pub fn max_span(&self) -> f64 {
        self.lower
            .iter()
            .zip(&self.upper)
            .map(|(lo, hi)| hi - lo)
            .filter(|w| w.is_finite())
            .fold(1.0, f64::max)
    }

    pub fn clamp(&self, x: &mut [f64]) {
        for ((v, lo), hi) in x.iter_mut().zip(&self.lower).zip(&self.upper) {
            *v = v.max(*lo).min(*hi);
        }
    }

    pub fn max_violation(&self, x: &[f64]) -> f64 {
        x.iter()
            .zip(&self.lower)
            .zip(&self.upper)
            .map(|((v, lo), hi)| (lo - v).max(v - hi).max(0.0))
            .fold(0.0, f64::max)
    }

    fn extend(&mut self, other: Bounds) {
        self.lower.extend(other.lower);
        self.upper.extend(other.upper);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    /// `u[k] - prev[k] <= max_ramp_rate`
    RampUp,
    /// `prev[k] - u[k] <= max_ramp_rate`
    RampDown,
    /// `demand[k] - u[k] - shortfall[k] <= 0`
    DemandCover,
}

/// Linear inequality `sum(coef * x[index]) <= upper`, tied to horizon step `step`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearConstraint {
    pub kind: ConstraintKind,
    pub step: usize,
    pub terms: Vec<(usize, f64)>,
    pub upper: f64,
}

impl LinearConstraint {
    pub fn activity(&self, x: &[f64]) -> f64 {
        self.terms.iter().map(|(i, c)| c * x[*i]).sum()
    }

    /// Non-negative when satisfied
    pub fn slack(&self, x: &[f64]) -> f64 {
        self.upper - self.activity(x)
    }

    pub fn is_satisfied(&self, x: &[f64], tolerance: f64) -> bool {
        self.slack(x) >= -tolerance
    }
}

/// Largest violation over bounds and inequality rows; zero when feasible
pub fn max_violation(bounds: &Bounds, constraints: &[LinearConstraint], x: &[f64]) -> f64 {
    constraints
        .iter()
        .map(|c| (-c.slack(x)).max(0.0))
        .fold(bounds.max_violation(x), f64::max)
}

pub fn production_bounds(limits: &PlantLimits, horizon: usize) -> Bounds {
    Bounds::uniform(horizon, limits.min_production_kw, limits.max_production_kw)
}

/// Ramp limits as two linear rows per step, anchored at the measured
/// production for step 0.
pub fn ramp_constraints(limits: &PlantLimits, state: &PlantState, horizon: usize) -> Vec<LinearConstraint> {
    let r = limits.max_ramp_rate_kw;
    let p0 = state.production_kw;
    let mut out = Vec::with_capacity(2 * horizon);

    for k in 0..horizon {
        if k == 0 {
            out.push(LinearConstraint {
                kind: ConstraintKind::RampUp,
                step: 0,
                terms: vec![(0, 1.0)],
                upper: p0 + r,
            });
            out.push(LinearConstraint {
                kind: ConstraintKind::RampDown,
                step: 0,
                terms: vec![(0, -1.0)],
                upper: r - p0,
            });
        } else {
            out.push(LinearConstraint {
                kind: ConstraintKind::RampUp,
                step: k,
                terms: vec![(k, 1.0), (k - 1, -1.0)],
                upper: r,
            });
            out.push(LinearConstraint {
                kind: ConstraintKind::RampDown,
                step: k,
                terms: vec![(k - 1, 1.0), (k, -1.0)],
                upper: r,
            });
        }
    }
    out
}

/// One cycle's optimization problem.
///
/// Decision vector layout: `[u_0 .. u_{H-1}, s_0 .. s_{H-1}]` where `u` are
/// production setpoints and `s` the demand shortfall per step.
#[derive(Debug, Clone, PartialEq)]
pub struct EconomicProblem {
    pub horizon: usize,
    pub bounds: Bounds,
    pub constraints: Vec<LinearConstraint>,
}

impl EconomicProblem {
    pub fn build(limits: &PlantLimits, state: &PlantState, forecast: &Forecast) -> Self {
        let horizon = forecast.horizon();
        let mut bounds = production_bounds(limits, horizon);
        // the shortfall never needs to exceed demand minus minimum production
        bounds.extend(Bounds {
            lower: vec![0.0; horizon],
            upper: forecast
                .demand_kw
                .iter()
                .map(|d| (d - limits.min_production_kw).max(0.0) + 1.0)
                .collect(),
        });

        let mut constraints = ramp_constraints(limits, state, horizon);
        constraints.extend(forecast.demand_kw.iter().enumerate().map(|(k, d)| LinearConstraint {
            kind: ConstraintKind::DemandCover,
            step: k,
            terms: vec![(k, -1.0), (horizon + k, -1.0)],
            upper: -d,
        }));

        Self {
            horizon,
            bounds,
            constraints,
        }
    }

    pub fn dimension(&self) -> usize {
        2 * self.horizon
    }

    /// Lift a setpoint guess into the full decision vector
    pub fn initial_point(&self, setpoints: &[f64], forecast: &Forecast) -> Vec<f64> {
        let mut z: Vec<f64> = (0..self.horizon)
            .map(|k| setpoints.get(k).copied().unwrap_or(0.0))
            .collect();
        let shortfall: Vec<f64> = z
            .iter()
            .zip(&forecast.demand_kw)
            .map(|(u, d)| (d - u).max(0.0))
            .collect();
        z.extend(shortfall);
        z
    }

    pub fn setpoints<'a>(&self, z: &'a [f64]) -> &'a [f64] {
        &z[..self.horizon]
    }

    pub fn shortfall<'a>(&self, z: &'a [f64]) -> &'a [f64] {
        &z[self.horizon..]
    }

    /// Bounds and ramp rows hold for the setpoint part of `z`
    pub fn setpoints_feasible(&self, z: &[f64], tolerance: f64) -> bool {
        let u = self.setpoints(z);
        let within_bounds = u
            .iter()
            .zip(&self.bounds.lower)
            .zip(&self.bounds.upper)
            .all(|((v, lo), hi)| *v >= lo - tolerance && *v <= hi + tolerance);
        within_bounds
            && self
                .constraints
                .iter()
                .filter(|c| c.kind != ConstraintKind::DemandCover)
                .all(|c| c.is_satisfied(z, tolerance))
    }
}
