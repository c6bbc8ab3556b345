//! Sequential quadratic programming driver.
//!
//! Each iteration linearizes the linear inequality rows around the current
//! point, approximates the Hessian with a damped BFGS matrix and solves
//!
//! ```text
//! minimize    0.5 p'Bp + g'p
//! subject to  a_i . p <= max(0, b_i - a_i . x)
//!             max(lb - x, -delta) <= p <= min(ub - x, delta)
//! ```
//!
//! with a trust radius `delta`. Steps are accepted on the ratio of actual to
//! predicted decrease.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::constraints::{max_violation, Bounds, LinearConstraint};
use super::qp::{solve_qp, Row};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqpSettings {
    pub max_iterations: usize,
    /// Converged once the step infinity norm drops below this
    pub step_tolerance: f64,
    /// Converged once the predicted decrease drops below `cost_tolerance * (1 + |f|)`
    pub cost_tolerance: f64,
    pub feasibility_tolerance: f64,
    /// Relative central-difference step
    pub finite_difference_step: f64,
    /// Defaults to a quarter of the widest bound interval
    pub initial_trust_radius: Option<f64>,
}

impl Default for SqpSettings {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            step_tolerance: 1e-6,
            cost_tolerance: 1e-9,
            feasibility_tolerance: 1e-6,
            finite_difference_step: 1e-6,
            initial_trust_radius: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveOutcome {
    pub success: bool,
    pub solution: Vec<f64>,
    pub cost: f64,
    pub message: String,
    pub iterations: usize,
}

impl SolveOutcome {
    fn failed(solution: Vec<f64>, cost: f64, message: impl Into<String>, iterations: usize) -> Self {
        Self {
            success: false,
            solution,
            cost,
            message: message.into(),
            iterations,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SqpSolver {
    settings: SqpSettings,
}

impl SqpSolver {
    pub fn new(settings: SqpSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SqpSettings {
        &self.settings
    }

    /// Minimize `cost_fn` from `initial_guess` subject to `bounds` and the
    /// linear rows in `constraints`.
    ///
    /// Never panics on bad input; every failure is reported through
    /// [`SolveOutcome::success`] and [`SolveOutcome::message`].
    pub fn solve<F>(
        &self,
        initial_guess: &[f64],
        cost_fn: F,
        bounds: &Bounds,
        constraints: &[LinearConstraint],
    ) -> SolveOutcome
    where
        F: Fn(&[f64]) -> f64,
    {
        let s = &self.settings;
        let n = initial_guess.len();

        if bounds.len() != n || bounds.upper.len() != n {
            return SolveOutcome::failed(
                initial_guess.to_vec(),
                f64::NAN,
                format!("bounds cover {} variables, expected {n}", bounds.len()),
                0,
            );
        }
        if let Some(i) = bounds.first_contradiction() {
            return SolveOutcome::failed(
                initial_guess.to_vec(),
                f64::NAN,
                format!(
                    "contradictory bounds at variable {i}: lower {} > upper {}",
                    bounds.lower[i], bounds.upper[i]
                ),
                0,
            );
        }
        if let Some(c) = constraints.iter().find(|c| c.terms.iter().any(|(j, _)| *j >= n)) {
            return SolveOutcome::failed(
                initial_guess.to_vec(),
                f64::NAN,
                format!("{:?} row at step {} references a variable outside 0..{n}", c.kind, c.step),
                0,
            );
        }
        if n == 0 {
            return SolveOutcome {
                success: true,
                solution: Vec::new(),
                cost: cost_fn(&[]),
                message: "empty problem".to_string(),
                iterations: 0,
            };
        }

        let mut x: Vec<f64> = initial_guess
            .iter()
            .map(|v| if v.is_finite() { *v } else { 0.0 })
            .collect();
        bounds.clamp(&mut x);

        if max_violation(bounds, constraints, &x) > s.feasibility_tolerance {
            match restore_feasibility(&x, bounds, constraints) {
                Ok(p) => {
                    for (xi, pi) in x.iter_mut().zip(&p) {
                        *xi += pi;
                    }
                    bounds.clamp(&mut x);
                    debug!(violation = max_violation(bounds, constraints, &x), "restored feasibility");
                }
                Err(e) => {
                    return SolveOutcome::failed(x, f64::NAN, format!("infeasible constraint set: {e}"), 0);
                }
            }
        }

        let mut f = cost_fn(&x);
        if !f.is_finite() {
            return SolveOutcome::failed(x, f, "cost is not finite at the initial point", 0);
        }
        let mut g = gradient(&cost_fn, &x, s.finite_difference_step);

        let max_radius = bounds.max_span();
        let mut radius = s
            .initial_trust_radius
            .unwrap_or(0.25 * max_radius)
            .max(10.0 * s.step_tolerance);

        // diagonal start scaled so weakly sloped variables can reach the trust radius
        let mut hessian = DMatrix::from_diagonal(&DVector::from_iterator(
            n,
            g.iter().map(|gi| (gi.abs() / radius).clamp(1e-4, 1.0)),
        ));

        let mut converged: Option<&'static str> = None;
        let mut iterations = 0;

        while iterations < s.max_iterations {
            iterations += 1;

            let rows = subproblem_rows(&x, radius, bounds, constraints);
            let p = match solve_qp(&hessian, &g, &rows) {
                Ok(p) => p,
                Err(e) => {
                    debug!(iteration = iterations, radius, error = %e, "QP subproblem failed; shrinking trust region");
                    radius *= 0.25;
                    if radius < s.step_tolerance {
                        return SolveOutcome::failed(x, f, format!("QP subproblem failed: {e}"), iterations);
                    }
                    continue;
                }
            };

            let step_norm = p.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
            if step_norm <= s.step_tolerance {
                converged = Some("step size below tolerance");
                break;
            }

            let p_vec = DVector::from_column_slice(&p);
            let g_vec = DVector::from_column_slice(&g);
            let predicted = -(g_vec.dot(&p_vec) + 0.5 * p_vec.dot(&(&hessian * &p_vec)));
            if predicted <= s.cost_tolerance * (1.0 + f.abs()) {
                converged = Some("predicted decrease below tolerance");
                break;
            }

            let mut trial: Vec<f64> = x.iter().zip(&p).map(|(xi, pi)| xi + pi).collect();
            bounds.clamp(&mut trial);
            let f_trial = cost_fn(&trial);
            let ratio = if f_trial.is_finite() {
                (f - f_trial) / predicted
            } else {
                f64::NEG_INFINITY
            };

            if f_trial.is_finite() {
                let g_trial = gradient(&cost_fn, &trial, s.finite_difference_step);
                let step = DVector::from_iterator(n, trial.iter().zip(&x).map(|(a, b)| a - b));
                let change = DVector::from_iterator(n, g_trial.iter().zip(&g).map(|(a, b)| a - b));
                damped_bfgs_update(&mut hessian, &step, &change);

                if ratio >= 0.1 {
                    x = trial;
                    f = f_trial;
                    g = g_trial;
                }
            }

            trace!(iteration = iterations, cost = f, ratio, radius, step_norm, "sqp iteration");

            if ratio < 0.25 {
                radius = 0.25 * step_norm;
            } else if ratio > 0.75 && step_norm >= 0.99 * radius {
                radius = (2.0 * radius).min(max_radius);
            }
            if radius < s.step_tolerance {
                converged = Some("trust radius below tolerance");
                break;
            }
        }

        let Some(reason) = converged else {
            return SolveOutcome::failed(
                x,
                f,
                format!("iteration limit reached ({} iterations)", s.max_iterations),
                iterations,
            );
        };

        let violation = max_violation(bounds, constraints, &x);
        if violation > s.feasibility_tolerance {
            return SolveOutcome::failed(
                x,
                f,
                format!("solution violates constraints by {violation:.3e}"),
                iterations,
            );
        }

        SolveOutcome {
            success: true,
            solution: x,
            cost: f,
            message: format!("converged: {reason}"),
            iterations,
        }
    }
}

/// Trust-region box merged with the variable bounds, plus the linearized rows
fn subproblem_rows(x: &[f64], radius: f64, bounds: &Bounds, constraints: &[LinearConstraint]) -> Vec<Row> {
    let mut rows = Vec::with_capacity(2 * x.len() + constraints.len());
    for (i, xi) in x.iter().enumerate() {
        let up = (bounds.upper[i] - xi).min(radius).max(0.0);
        let down = (xi - bounds.lower[i]).min(radius).max(0.0);
        rows.push(Row::new(vec![(i, 1.0)], up));
        rows.push(Row::new(vec![(i, -1.0)], down));
    }
    rows.extend(
        constraints
            .iter()
            .map(|c| Row::new(c.terms.clone(), c.slack(x).max(0.0))),
    );
    rows
}

/// Smallest correction `p` that moves `x` into the feasible set
fn restore_feasibility(x: &[f64], bounds: &Bounds, constraints: &[LinearConstraint]) -> Result<Vec<f64>, String> {
    let n = x.len();
    let mut rows = Vec::with_capacity(2 * n + constraints.len());
    for (i, xi) in x.iter().enumerate() {
        rows.push(Row::new(vec![(i, 1.0)], bounds.upper[i] - xi));
        rows.push(Row::new(vec![(i, -1.0)], xi - bounds.lower[i]));
    }
    rows.extend(constraints.iter().map(|c| Row::new(c.terms.clone(), c.slack(x))));
    solve_qp(&DMatrix::identity(n, n), &vec![0.0; n], &rows)
}

/// Central differences with step `h * max(1, |x_i|)`
fn gradient<F>(cost_fn: &F, x: &[f64], h: f64) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let mut probe = x.to_vec();
    let mut out = Vec::with_capacity(x.len());
    for i in 0..x.len() {
        let step = h * x[i].abs().max(1.0);
        probe[i] = x[i] + step;
        let up = cost_fn(&probe);
        probe[i] = x[i] - step;
        let down = cost_fn(&probe);
        probe[i] = x[i];

        let d = (up - down) / (2.0 * step);
        out.push(if d.is_finite() { d } else { 0.0 });
    }
    out
}

/// Powell-damped BFGS update; keeps `b` symmetric positive definite.
pub fn damped_bfgs_update(b: &mut DMatrix<f64>, s: &DVector<f64>, y: &DVector<f64>) {
    let bs = &*b * s;
    let sbs = s.dot(&bs);
    if sbs <= 1e-12 {
        return;
    }
    let sy = s.dot(y);
    let theta = if sy >= 0.2 * sbs {
        1.0
    } else {
        0.8 * sbs / (sbs - sy)
    };
    let r = y * theta + &bs * (1.0 - theta);
    let sr = s.dot(&r);
    if sr <= 1e-12 {
        return;
    }

    let updated = &*b - (&bs * bs.transpose()) / sbs + (&r * r.transpose()) / sr;
    if updated.iter().all(|v| v.is_finite()) {
        *b = (&updated + updated.transpose()) * 0.5;
    } else {
        b.fill_with_identity();
    }
}
