//! Spline fit of a running median: minimise `Σ |value - spline(z)|`.

use tracing::debug;

use crate::error::{CalibError, ensure_len};
use crate::fit::simplex::{SimplexOptions, minimize};
use crate::math::spline::{CubicSpline, validate_nodes};

pub struct MedianFitter<'a> {
    nodes: &'a [f64],
    z: &'a [f64],
    values: &'a [f64],
}

impl<'a> MedianFitter<'a> {
    pub fn new(nodes: &'a [f64], z: &'a [f64], values: &'a [f64]) -> Result<Self, CalibError> {
        validate_nodes(nodes)?;
        ensure_len("median fit values", z.len(), values.len())?;
        Ok(Self { nodes, z, values })
    }

    /// L1 cost of a candidate node vector.
    pub fn cost(&self, pars: &[f64]) -> f64 {
        let Ok(spl) = CubicSpline::new(self.nodes, pars) else {
            return f64::INFINITY;
        };
        self.z
            .iter()
            .zip(self.values)
            .map(|(&z, &v)| (v - spl.eval(z)).abs())
            .sum()
    }

    pub fn fit(&self, p0: &[f64], opts: &SimplexOptions) -> Result<Vec<f64>, CalibError> {
        ensure_len("median fit start", self.nodes.len(), p0.len())?;
        let res = minimize(|p| self.cost(p), p0, opts);
        debug!(
            iterations = res.iterations,
            cost = res.cost,
            converged = res.converged,
            "median spline fit finished"
        );
        Ok(res.x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follows_a_linear_median_despite_outliers() {
        let nodes = [0.1, 0.2, 0.3];
        let z: Vec<f64> = (0..300).map(|i| 0.1 + 0.2 * i as f64 / 299.0).collect();
        let values: Vec<f64> = z
            .iter()
            .enumerate()
            .map(|(i, z)| {
                let base = 16.0 + 10.0 * z;
                if i % 10 == 0 { base + 3.0 } else { base }
            })
            .collect();
        let fitter = MedianFitter::new(&nodes, &z, &values).unwrap();
        let fit = fitter.fit(&[16.8, 18.3, 18.9], &SimplexOptions::default()).unwrap();
        for (node, v) in nodes.iter().zip(&fit) {
            assert!((v - (16.0 + 10.0 * node)).abs() < 0.05, "node {node}: {v}");
        }
    }

    #[test]
    fn start_length_must_match_nodes() {
        let nodes = [0.1, 0.3];
        let fitter = MedianFitter::new(&nodes, &[0.2], &[1.0]).unwrap();
        assert!(fitter.fit(&[1.0], &SimplexOptions::default()).is_err());
    }
}
