//! Derivative-free local minimisation (Nelder–Mead downhill simplex).
//!
//! Every likelihood in the calibration is minimised with this routine. The
//! objectives are cheap per call but not smooth everywhere (floors, walls,
//! sentinel costs), so a gradient-free search is the right tool.
//!
//! Behaviour:
//! - initial simplex: each coordinate perturbed by 5% (or `0.00025` when zero)
//! - standard coefficients (reflect 1, expand 2, contract 0.5, shrink 0.5)
//! - stops when both the simplex extent and the spread of costs fall below
//!   `xtol` / `ftol`, or when the iteration / evaluation budget is spent
//! - `NaN` costs are treated as `+∞`

use serde::{Deserialize, Serialize};

const NONZERO_DELTA: f64 = 0.05;
const ZERO_DELTA: f64 = 0.00025;

const RHO: f64 = 1.0;
const CHI: f64 = 2.0;
const PSI: f64 = 0.5;
const SIGMA: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimplexOptions {
    /// Absolute tolerance on the simplex extent.
    pub xtol: f64,
    /// Absolute tolerance on the spread of costs across the simplex.
    pub ftol: f64,
    /// Iteration budget per parameter (`200` gives the classic `200 * n`).
    pub iters_per_param: usize,
}

impl Default for SimplexOptions {
    fn default() -> Self {
        Self {
            xtol: 1e-4,
            ftol: 1e-4,
            iters_per_param: 200,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimplexResult {
    pub x: Vec<f64>,
    pub cost: f64,
    pub iterations: usize,
    pub evaluations: usize,
    pub converged: bool,
}

/// Minimise `f` starting from `x0`.
pub fn minimize<F>(mut f: F, x0: &[f64], opts: &SimplexOptions) -> SimplexResult
where
    F: FnMut(&[f64]) -> f64,
{
    let n = x0.len();
    let mut evaluations = 0usize;
    let mut eval = |x: &[f64], evaluations: &mut usize| {
        *evaluations += 1;
        let v = f(x);
        if v.is_nan() { f64::INFINITY } else { v }
    };

    if n == 0 {
        let cost = eval(x0, &mut evaluations);
        return SimplexResult {
            x: Vec::new(),
            cost,
            iterations: 0,
            evaluations,
            converged: true,
        };
    }

    let max_iter = opts.iters_per_param.max(1) * n;
    let max_eval = max_iter;

    let mut sim: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    sim.push(x0.to_vec());
    for k in 0..n {
        let mut y = x0.to_vec();
        if y[k] != 0.0 {
            y[k] *= 1.0 + NONZERO_DELTA;
        } else {
            y[k] = ZERO_DELTA;
        }
        sim.push(y);
    }
    let mut fsim: Vec<f64> = sim.iter().map(|x| eval(x, &mut evaluations)).collect();
    sort_simplex(&mut sim, &mut fsim);

    let mut iterations = 1usize;
    let mut converged = false;

    while evaluations < max_eval && iterations < max_iter {
        if has_converged(&sim, &fsim, opts) {
            converged = true;
            break;
        }

        let mut xbar = vec![0.0; n];
        for v in &sim[..n] {
            for (acc, x) in xbar.iter_mut().zip(v) {
                *acc += x;
            }
        }
        for acc in &mut xbar {
            *acc /= n as f64;
        }

        let worst = sim[n].clone();
        let xr = affine(&xbar, &worst, 1.0 + RHO, -RHO);
        let fxr = eval(&xr, &mut evaluations);
        let mut shrink = false;

        if fxr < fsim[0] {
            let xe = affine(&xbar, &worst, 1.0 + RHO * CHI, -RHO * CHI);
            let fxe = eval(&xe, &mut evaluations);
            if fxe < fxr {
                sim[n] = xe;
                fsim[n] = fxe;
            } else {
                sim[n] = xr;
                fsim[n] = fxr;
            }
        } else if fxr < fsim[n - 1] {
            sim[n] = xr;
            fsim[n] = fxr;
        } else if fxr < fsim[n] {
            // Outside contraction.
            let xc = affine(&xbar, &worst, 1.0 + PSI * RHO, -PSI * RHO);
            let fxc = eval(&xc, &mut evaluations);
            if fxc <= fxr {
                sim[n] = xc;
                fsim[n] = fxc;
            } else {
                shrink = true;
            }
        } else {
            // Inside contraction.
            let xcc = affine(&xbar, &worst, 1.0 - PSI, PSI);
            let fxcc = eval(&xcc, &mut evaluations);
            if fxcc < fsim[n] {
                sim[n] = xcc;
                fsim[n] = fxcc;
            } else {
                shrink = true;
            }
        }

        if shrink {
            let best = sim[0].clone();
            for j in 1..=n {
                for (x, b) in sim[j].iter_mut().zip(&best) {
                    *x = b + SIGMA * (*x - b);
                }
                fsim[j] = eval(&sim[j], &mut evaluations);
            }
        }

        sort_simplex(&mut sim, &mut fsim);
        iterations += 1;
    }

    if !converged {
        converged = has_converged(&sim, &fsim, opts);
    }

    SimplexResult {
        x: sim.swap_remove(0),
        cost: fsim[0],
        iterations,
        evaluations,
        converged,
    }
}

fn affine(a: &[f64], b: &[f64], ca: f64, cb: f64) -> Vec<f64> {
    a.iter().zip(b).map(|(x, y)| ca * x + cb * y).collect()
}

fn sort_simplex(sim: &mut Vec<Vec<f64>>, fsim: &mut Vec<f64>) {
    let mut order: Vec<usize> = (0..fsim.len()).collect();
    // Stable sort keeps ties in insertion order, which keeps runs reproducible.
    order.sort_by(|&a, &b| fsim[a].total_cmp(&fsim[b]));
    *sim = order.iter().map(|&i| sim[i].clone()).collect();
    *fsim = order.iter().map(|&i| fsim[i]).collect();
}

fn has_converged(sim: &[Vec<f64>], fsim: &[f64], opts: &SimplexOptions) -> bool {
    let best = &sim[0];
    let x_spread = sim[1..]
        .iter()
        .flat_map(|v| v.iter().zip(best).map(|(x, b)| (x - b).abs()))
        .fold(0.0f64, f64::max);
    let f_spread = fsim[1..]
        .iter()
        .map(|f| (f - fsim[0]).abs())
        .fold(0.0f64, f64::max);
    // Infinite spreads (e.g. vertices outside a box constraint) never converge.
    x_spread <= opts.xtol && f_spread <= opts.ftol
}
