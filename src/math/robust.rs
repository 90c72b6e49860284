//! Robust summary statistics and outlier-down-weighted line fits.

use super::ols::weighted_line;

/// Scale factor turning a median absolute deviation into a Gaussian sigma.
pub const MAD_TO_SIGMA: f64 = 1.4826;

pub fn median_mut(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

pub fn median(values: &[f64]) -> Option<f64> {
    let mut v: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    median_mut(&mut v)
}

/// Median absolute deviation around `center` (unscaled).
pub fn mad(values: &[f64], center: f64) -> Option<f64> {
    let mut abs: Vec<f64> = values
        .iter()
        .map(|v| (v - center).abs())
        .filter(|v| v.is_finite())
        .collect();
    median_mut(&mut abs)
}

/// Weighted population variance; `None` when the weights sum to zero.
pub fn weighted_variance(values: &[f64], weights: &[f64]) -> Option<f64> {
    let sw: f64 = weights.iter().sum();
    if !(sw > 0.0) {
        return None;
    }
    let mean = values.iter().zip(weights).map(|(v, w)| v * w).sum::<f64>() / sw;
    let var = values
        .iter()
        .zip(weights)
        .map(|(v, w)| w * (v - mean) * (v - mean))
        .sum::<f64>()
        / sw;
    Some(var)
}

/// Huber weights from residuals, scaled by a MAD estimate of the residual spread.
pub fn huber_reweight(w_base: &[f64], residuals: &[f64], k: f64) -> Vec<f64> {
    let mut abs: Vec<f64> = residuals.iter().map(|r| r.abs()).filter(|v| v.is_finite()).collect();
    let mad = median_mut(&mut abs).unwrap_or(0.0);
    let scale = (mad / 0.6745).max(1e-12);
    let cutoff = (k.max(1e-6)) * scale;

    let min_factor = 1e-3;
    w_base
        .iter()
        .zip(residuals.iter())
        .map(|(&w0, &r)| {
            let ar = r.abs();
            let factor = if ar <= cutoff || !ar.is_finite() { 1.0 } else { cutoff / ar };
            (w0 * factor).max(w0 * min_factor)
        })
        .collect()
}

/// Robust straight line `y = intercept + slope * x` via Huber IRLS.
///
/// Returns `(intercept, slope)`, or `None` when the first (unweighted) solve fails.
pub fn robust_line(x: &[f64], y: &[f64], iters: usize, k: f64) -> Option<(f64, f64)> {
    let w_base = vec![1.0; x.len()];
    let mut w = w_base.clone();
    let mut best = weighted_line(x, y, &w)?;

    for _ in 0..iters {
        let residuals: Vec<f64> = x
            .iter()
            .zip(y)
            .map(|(&xi, &yi)| yi - (best.0 + best.1 * xi))
            .collect();
        w = huber_reweight(&w_base, &residuals, k);
        match weighted_line(x, y, &w) {
            Some(next) => best = next,
            None => break,
        }
    }
    Some(best)
}
