//! Weighted least squares solver.
//!
//! Start values for the red sequence come from small straight-line regressions
//! of color against magnitude offset inside each node window:
//!
//! ```text
//! minimize Σ w_i (y_i - x_i^T β)^2
//! ```
//!
//! We scale rows by `sqrt(w_i)` and solve the ordinary problem with SVD, which
//! stays well behaved when a window's covariate barely varies.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Weighted fit of `y = intercept + slope * x`.
///
/// Returns `(intercept, slope)`.
pub fn weighted_line(x: &[f64], y: &[f64], w: &[f64]) -> Option<(f64, f64)> {
    let n = x.len();
    if n < 2 || y.len() != n || w.len() != n {
        return None;
    }
    let mut design = DMatrix::<f64>::zeros(n, 2);
    let mut rhs = DVector::<f64>::zeros(n);
    for i in 0..n {
        let sw = w[i].max(0.0).sqrt();
        design[(i, 0)] = sw;
        design[(i, 1)] = x[i] * sw;
        rhs[i] = y[i] * sw;
    }
    let beta = solve_least_squares(&design, &rhs)?;
    Some((beta[0], beta[1]))
}
