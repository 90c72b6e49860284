//! Natural cubic spline through node/value pairs.
//!
//! Every redshift-dependent quantity in the calibration (mean color, slope,
//! scatter, correlation, corrections, pivot magnitude) is stored as values at
//! sparse nodes and evaluated through this type.
//!
//! Extrapolation policy: outside `[nodes[0], nodes[n-1]]` the curve continues
//! as a straight line with the boundary first derivative. For a natural spline
//! the second derivative vanishes at both ends, so this extension is C¹ and
//! matches what the curve is "doing" at the edge of the node range.

use crate::error::{CalibError, ensure_len};

#[derive(Debug, Clone, PartialEq)]
pub struct CubicSpline {
    nodes: Vec<f64>,
    values: Vec<f64>,
    /// Second derivatives at the nodes.
    y2: Vec<f64>,
}

impl CubicSpline {
    /// Build a spline; linear in the number of nodes (tridiagonal solve).
    pub fn new(nodes: &[f64], values: &[f64]) -> Result<Self, CalibError> {
        ensure_len("spline values", nodes.len(), values.len())?;
        validate_nodes(nodes)?;

        let n = nodes.len();
        let mut y2 = vec![0.0; n];
        let mut u = vec![0.0; n];

        for i in 1..n - 1 {
            let sig = (nodes[i] - nodes[i - 1]) / (nodes[i + 1] - nodes[i - 1]);
            let p = sig * y2[i - 1] + 2.0;
            y2[i] = (sig - 1.0) / p;
            let d = (values[i + 1] - values[i]) / (nodes[i + 1] - nodes[i])
                - (values[i] - values[i - 1]) / (nodes[i] - nodes[i - 1]);
            u[i] = (6.0 * d / (nodes[i + 1] - nodes[i - 1]) - sig * u[i - 1]) / p;
        }

        // Natural boundary: y2[n-1] = 0, back substitution.
        y2[n - 1] = 0.0;
        for k in (0..n - 1).rev() {
            y2[k] = y2[k] * y2[k + 1] + u[k];
        }
        y2[0] = 0.0;

        Ok(Self {
            nodes: nodes.to_vec(),
            values: values.to_vec(),
            y2,
        })
    }

    pub fn nodes(&self) -> &[f64] {
        &self.nodes
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Evaluate at a single redshift (O(log n) interval search).
    pub fn eval(&self, x: f64) -> f64 {
        let n = self.nodes.len();
        let first = self.nodes[0];
        let last = self.nodes[n - 1];

        if x < first {
            return self.values[0] + self.boundary_slope_lo() * (x - first);
        }
        if x > last {
            return self.values[n - 1] + self.boundary_slope_hi() * (x - last);
        }

        // Index of the first node strictly greater than x, clamped to a valid interval.
        let hi = self.nodes.partition_point(|&t| t <= x).clamp(1, n - 1);
        let lo = hi - 1;
        let h = self.nodes[hi] - self.nodes[lo];
        let a = (self.nodes[hi] - x) / h;
        let b = (x - self.nodes[lo]) / h;
        a * self.values[lo]
            + b * self.values[hi]
            + ((a * a * a - a) * self.y2[lo] + (b * b * b - b) * self.y2[hi]) * (h * h) / 6.0
    }

    /// Evaluate at many redshifts.
    pub fn eval_many(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|&x| self.eval(x)).collect()
    }

    fn boundary_slope_lo(&self) -> f64 {
        let h = self.nodes[1] - self.nodes[0];
        (self.values[1] - self.values[0]) / h - h * (2.0 * self.y2[0] + self.y2[1]) / 6.0
    }

    fn boundary_slope_hi(&self) -> f64 {
        let n = self.nodes.len();
        let h = self.nodes[n - 1] - self.nodes[n - 2];
        (self.values[n - 1] - self.values[n - 2]) / h
            + h * (self.y2[n - 2] + 2.0 * self.y2[n - 1]) / 6.0
    }
}

/// Convenience: build a spline and evaluate it at `xs` in one go.
pub fn spline_eval(nodes: &[f64], values: &[f64], xs: &[f64]) -> Result<Vec<f64>, CalibError> {
    Ok(CubicSpline::new(nodes, values)?.eval_many(xs))
}

/// Node grids must be finite, strictly increasing, and hold at least two nodes.
pub fn validate_nodes(nodes: &[f64]) -> Result<(), CalibError> {
    if nodes.len() < 2 {
        return Err(CalibError::config(format!(
            "node grid needs at least 2 nodes, got {}",
            nodes.len()
        )));
    }
    if nodes.iter().any(|v| !v.is_finite()) {
        return Err(CalibError::config("node grid contains non-finite values"));
    }
    if nodes.windows(2).any(|w| w[1] <= w[0]) {
        return Err(CalibError::config("node grid must be strictly increasing"));
    }
    Ok(())
}
