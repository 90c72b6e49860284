//! Gaussian densities used by the likelihood objectives.

use nalgebra::{Matrix2, Vector2};
use statrs::function::erf::erf;

pub const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;

/// Normal density with mean `mu` and standard deviation `sigma`.
#[inline]
pub fn normal_pdf(x: f64, mu: f64, sigma: f64) -> f64 {
    let xi = (x - mu) / sigma;
    INV_SQRT_2PI / sigma * (-0.5 * xi * xi).exp()
}

/// Normal cumulative distribution `Φ((x - mu)/sigma)`.
#[inline]
pub fn normal_cdf(x: f64, mu: f64, sigma: f64) -> f64 {
    0.5 * (1.0 + erf((x - mu) / (sigma * std::f64::consts::SQRT_2)))
}

/// Probability mass of the window `[lo, hi]`.
#[inline]
pub fn window_mass(lo: f64, hi: f64, mu: f64, sigma: f64) -> f64 {
    normal_cdf(hi, mu, sigma) - normal_cdf(lo, mu, sigma)
}

/// Bivariate normal density at residual `d` with covariance `cov`.
///
/// Returns `None` when the covariance is not positive definite.
pub fn bivariate_pdf(d: Vector2<f64>, cov: &Matrix2<f64>) -> Option<f64> {
    let det = cov.determinant();
    if !(det > 0.0) || !det.is_finite() {
        return None;
    }
    let inv = cov.try_inverse()?;
    let exponent = -0.5 * (d.transpose() * inv * d)[(0, 0)];
    Some(det.powf(-0.5) / (2.0 * std::f64::consts::PI) * exponent.exp())
}
