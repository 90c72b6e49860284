//! Robust per-node seeds for the likelihood fits.
//!
//! Each node owns a redshift window (midpoints to its neighbours). Inside the
//! window we either take a median (plus a MAD-based width) or fit a robust
//! straight line against a covariate. Windows with too few objects copy the
//! previous node's values; a leading run of empty windows stays at zero.

use tracing::warn;

use crate::error::{CalibError, ensure_len};
use crate::fit::nodes::node_window;
use crate::math::robust::{MAD_TO_SIGMA, mad, median, robust_line};
use crate::math::spline::validate_nodes;

/// Default error seed for nodes that never saw enough objects.
const DEFAULT_ERROR_SEED: f64 = 0.1;

/// Huber IRLS settings for the line mode.
const LINE_ITERS: usize = 10;
const LINE_HUBER_K: f64 = 1.345;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Median and scaled MAD per window.
    Median,
    /// Robust line `value = intercept + slope * covariate` per window.
    Line,
}

impl StartMode {
    /// Resolve the two legacy flags; exactly one must be set.
    pub fn from_flags(median: bool, fit: bool) -> Result<Self, CalibError> {
        match (median, fit) {
            (true, false) => Ok(StartMode::Median),
            (false, true) => Ok(StartMode::Line),
            _ => Err(CalibError::config(
                "start values need exactly one of median or fit mode",
            )),
        }
    }
}

/// Inputs shared by both modes.
#[derive(Debug, Clone, Copy)]
pub struct StartInputs<'a> {
    pub nodes: &'a [f64],
    pub z: &'a [f64],
    pub values: &'a [f64],
    /// Covariate for the line mode (e.g. magnitude minus pivot).
    pub covariate: Option<&'a [f64]>,
    /// Optional per-object errors; their per-window median is reported.
    pub errors: Option<&'a [f64]>,
    pub min_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StartValues {
    Median {
        medians: Vec<f64>,
        /// `1.4826 × MAD` per node.
        widths: Vec<f64>,
        errors: Option<Vec<f64>>,
    },
    Line {
        intercepts: Vec<f64>,
        slopes: Vec<f64>,
        errors: Option<Vec<f64>>,
    },
}

impl StartValues {
    /// Central values: medians or intercepts.
    pub fn centers(&self) -> &[f64] {
        match self {
            StartValues::Median { medians, .. } => medians,
            StartValues::Line { intercepts, .. } => intercepts,
        }
    }

    /// Secondary values: widths or slopes.
    pub fn secondary(&self) -> &[f64] {
        match self {
            StartValues::Median { widths, .. } => widths,
            StartValues::Line { slopes, .. } => slopes,
        }
    }

    pub fn errors(&self) -> Option<&[f64]> {
        match self {
            StartValues::Median { errors, .. } | StartValues::Line { errors, .. } => errors.as_deref(),
        }
    }
}

/// Compute per-node seeds.
pub fn compute_start_values(inputs: &StartInputs<'_>, mode: StartMode) -> Result<StartValues, CalibError> {
    let StartInputs {
        nodes,
        z,
        values,
        covariate,
        errors,
        min_count,
    } = *inputs;

    validate_nodes(nodes)?;
    ensure_len("start values", z.len(), values.len())?;
    if let Some(err) = errors {
        ensure_len("start value errors", values.len(), err.len())?;
    }
    let covariate = match (mode, covariate) {
        (StartMode::Line, Some(c)) => {
            ensure_len("start value covariate", values.len(), c.len())?;
            Some(c)
        }
        (StartMode::Line, None) => {
            return Err(CalibError::config("line start values need a covariate"));
        }
        (StartMode::Median, c) => c,
    };

    let n = nodes.len();
    let mut center = vec![0.0; n];
    let mut second = vec![0.0; n];
    let mut err_out = errors.map(|_| vec![DEFAULT_ERROR_SEED; n]);

    for i in 0..n {
        let (zlo, zhi) = node_window(nodes, i);
        let idx: Vec<usize> = (0..z.len()).filter(|&k| z[k] > zlo && z[k] < zhi).collect();

        if idx.len() < min_count.max(1) {
            warn!(node = i, z = nodes[i], count = idx.len(), "too few objects in node window; carrying previous node");
            if i > 0 {
                center[i] = center[i - 1];
                second[i] = second[i - 1];
                if let Some(e) = err_out.as_mut() {
                    e[i] = e[i - 1];
                }
            }
            continue;
        }

        let vals: Vec<f64> = idx.iter().map(|&k| values[k]).collect();
        match mode {
            StartMode::Median => {
                let m = median(&vals).unwrap_or(0.0);
                center[i] = m;
                second[i] = MAD_TO_SIGMA * mad(&vals, m).unwrap_or(0.0);
            }
            StartMode::Line => {
                let cov = covariate.unwrap_or(z);
                let xs: Vec<f64> = idx.iter().map(|&k| cov[k]).collect();
                match robust_line(&xs, &vals, LINE_ITERS, LINE_HUBER_K) {
                    Some((intercept, slope)) => {
                        center[i] = intercept;
                        // Red sequences never get redder with luminosity.
                        second[i] = slope.min(0.0);
                    }
                    None => {
                        center[i] = median(&vals).unwrap_or(0.0);
                        second[i] = if i > 0 { second[i - 1] } else { 0.0 };
                    }
                }
            }
        }

        if let (Some(e), Some(err)) = (err_out.as_mut(), errors) {
            let ev: Vec<f64> = idx.iter().map(|&k| err[k]).collect();
            e[i] = median(&ev).unwrap_or(DEFAULT_ERROR_SEED);
        }
    }

    Ok(match mode {
        StartMode::Median => StartValues::Median {
            medians: center,
            widths: second,
            errors: err_out,
        },
        StartMode::Line => StartValues::Line {
            intercepts: center,
            slopes: second,
            errors: err_out,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn inputs<'a>(nodes: &'a [f64], z: &'a [f64], v: &'a [f64]) -> StartInputs<'a> {
        StartInputs {
            nodes,
            z,
            values: v,
            covariate: None,
            errors: None,
            min_count: 3,
        }
    }

    #[test]
    fn recovers_known_bin_medians() {
        let nodes = [0.1, 0.2, 0.3];
        // Node windows: (0.1, 0.15), (0.15, 0.25), (0.25, 0.3).
        let z = [0.11, 0.12, 0.13, 0.14, 0.16, 0.18, 0.2, 0.22, 0.26, 0.27, 0.28];
        let v = [1.0, 1.1, 1.2, 5.0, 2.0, 2.1, 2.2, 2.3, 3.0, 3.1, 3.2];
        let sv = compute_start_values(&inputs(&nodes, &z, &v), StartMode::Median).unwrap();
        let med = sv.centers();
        assert_relative_eq!(med[0], 1.15, epsilon = 1e-12);
        assert_relative_eq!(med[1], 2.15, epsilon = 1e-12);
        assert_relative_eq!(med[2], 3.1, epsilon = 1e-12);
        // MAD of [3.0, 3.1, 3.2] around 3.1 is 0.1.
        assert_relative_eq!(sv.secondary()[2], MAD_TO_SIGMA * 0.1, epsilon = 1e-12);
    }

    #[test]
    fn empty_window_carries_previous_node() {
        let nodes = [0.1, 0.2, 0.3, 0.4];
        let z = [0.12, 0.13, 0.14, 0.16, 0.18, 0.2, 0.22];
        let v = [1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0];
        let sv = compute_start_values(&inputs(&nodes, &z, &v), StartMode::Median).unwrap();
        let med = sv.centers();
        assert_eq!(med[2], med[1]);
        assert_eq!(med[3], med[1]);
        assert!(med.iter().all(|m| m.is_finite()));
    }

    #[test]
    fn leading_empty_window_stays_zero() {
        let nodes = [0.1, 0.2, 0.3];
        let z = [0.2, 0.21, 0.22, 0.27, 0.28, 0.29];
        let v = [1.0; 6];
        let sv = compute_start_values(&inputs(&nodes, &z, &v), StartMode::Median).unwrap();
        assert_eq!(sv.centers()[0], 0.0);
        assert_eq!(sv.centers()[1], 1.0);
    }

    #[test]
    fn line_mode_recovers_intercept_and_slope() {
        let nodes = [0.1, 0.3];
        let z: Vec<f64> = (0..40).map(|i| 0.101 + i as f64 * 0.0012).collect();
        let dmag: Vec<f64> = (0..40).map(|i| -2.0 + i as f64 * 0.1).collect();
        let v: Vec<f64> = dmag.iter().map(|d| 1.2 - 0.04 * d).collect();
        let mut inp = inputs(&nodes, &z, &v);
        inp.covariate = Some(&dmag);
        let sv = compute_start_values(&inp, StartMode::Line).unwrap();
        assert_relative_eq!(sv.centers()[0], 1.2, epsilon = 1e-6);
        assert_relative_eq!(sv.secondary()[0], -0.04, epsilon = 1e-6);
    }

    #[test]
    fn flags_must_pick_exactly_one_mode() {
        assert!(StartMode::from_flags(true, true).is_err());
        assert!(StartMode::from_flags(false, false).is_err());
        assert_eq!(StartMode::from_flags(false, true).unwrap(), StartMode::Line);
    }

    #[test]
    fn mismatched_errors_are_rejected() {
        let nodes = [0.1, 0.3];
        let z = [0.15, 0.2];
        let v = [1.0, 1.0];
        let e = [0.1];
        let mut inp = inputs(&nodes, &z, &v);
        inp.errors = Some(&e);
        assert!(matches!(
            compute_start_values(&inp, StartMode::Median),
            Err(CalibError::DimensionMismatch { .. })
        ));
    }
}
