//! Convex QP subproblems solved with Clarabel.
//!
//! ```text
//! minimize    0.5 p'Hp + g'p
//! subject to  a_i . p <= b_i   for every row
//! ```

use clarabel::{
    algebra::CscMatrix,
    solver::{DefaultSettingsBuilder, IPSolver, SupportedConeT},
};
use nalgebra::DMatrix;

/// One inequality row `sum(coef * p[index]) <= rhs`
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub terms: Vec<(usize, f64)>,
    pub rhs: f64,
}

impl Row {
    pub fn new(terms: Vec<(usize, f64)>, rhs: f64) -> Self {
        Self { terms, rhs }
    }
}

/// Solve the QP and return the minimizer `p`.
///
/// `hessian` must be symmetric positive semidefinite; only its upper triangle
/// is passed to the solver.
pub fn solve_qp(hessian: &DMatrix<f64>, gradient: &[f64], rows: &[Row]) -> Result<Vec<f64>, String> {
    let n = gradient.len();
    if hessian.nrows() != n || hessian.ncols() != n {
        return Err(format!(
            "hessian is {}x{}, expected {n}x{n}",
            hessian.nrows(),
            hessian.ncols()
        ));
    }
    if n == 0 {
        return Ok(Vec::new());
    }

    let p_mat = upper_triangle(hessian);
    let (a_mat, rhs) = constraint_matrix(n, rows);
    let cones = [SupportedConeT::NonnegativeConeT(rows.len())];

    let settings = DefaultSettingsBuilder::default()
        .verbose(false)
        .build()
        .map_err(|e| format!("Clarabel settings error: {:?}", e))?;

    let mut solver = clarabel::solver::DefaultSolver::new(&p_mat, gradient, &a_mat, &rhs, &cones, settings)
        .map_err(|e| format!("Clarabel setup error: {:?}", e))?;
    solver.solve();

    match solver.solution.status {
        clarabel::solver::SolverStatus::Solved | clarabel::solver::SolverStatus::AlmostSolved => {
            Ok(solver.solution.x.clone())
        }
        status => Err(format!("QP subproblem not solved: {:?}", status)),
    }
}

fn upper_triangle(h: &DMatrix<f64>) -> CscMatrix<f64> {
    let n = h.ncols();
    let mut col_ptr = Vec::with_capacity(n + 1);
    let mut row_idx = Vec::new();
    let mut values = Vec::new();

    col_ptr.push(0);
    for j in 0..n {
        for i in 0..=j {
            let v = 0.5 * (h[(i, j)] + h[(j, i)]);
            if v != 0.0 {
                row_idx.push(i);
                values.push(v);
            }
        }
        col_ptr.push(row_idx.len());
    }
    CscMatrix::new(n, n, col_ptr, row_idx, values)
}

/// Rows to CSC; duplicate column entries within a row are summed
fn constraint_matrix(n: usize, rows: &[Row]) -> (CscMatrix<f64>, Vec<f64>) {
    let mut columns: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    for (r, row) in rows.iter().enumerate() {
        for &(j, coef) in &row.terms {
            match columns[j].last_mut() {
                Some((last_row, acc)) if *last_row == r => *acc += coef,
                _ => columns[j].push((r, coef)),
            }
        }
    }

    let mut col_ptr = Vec::with_capacity(n + 1);
    let mut row_idx = Vec::new();
    let mut values = Vec::new();
    col_ptr.push(0);
    for column in columns {
        for (r, v) in column {
            row_idx.push(r);
            values.push(v);
        }
        col_ptr.push(row_idx.len());
    }

    let rhs = rows.iter().map(|row| row.rhs).collect();
    (CscMatrix::new(rows.len(), n, col_ptr, row_idx, values), rhs)
}
