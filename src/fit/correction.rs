//! Photometric-redshift correction terms fit against known redshifts.
//!
//! The residual `dz = z_true - zred` of each training object is modelled as
//!
//! ```text
//! L_i = q_i · N(dz_i; c(x_i) + s(x_i)·Δmag_i, (r(x_i)·e_i)²)
//!     + (1 - q_i) · N(dz_i; c(x_i), bkg(x_i))
//! ```
//!
//! with `q_i = w_i · p_i`: a logistic likelihood weight times the membership
//! probability (clipped below 0.99). The conditioning redshift `x` is the true
//! redshift for the first correction track and the derived redshift for the
//! second. Offsets live on their own node grid; slope, r and background
//! variance share the slope grid.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CalibError, ensure_len};
use crate::fit::nodes::node_window;
use crate::fit::simplex::{SimplexOptions, minimize};
use crate::fit::startvals::{StartInputs, StartMode, compute_start_values};
use crate::math::gauss::normal_pdf;
use crate::math::robust::weighted_variance;
use crate::math::spline::{CubicSpline, validate_nodes};

/// Membership probabilities are clipped to this before mixing.
pub const MAX_PROB: f64 = 0.99;

/// Lower bound on the error scale `r`, in the fit and when applied.
pub const R_FLOOR: f64 = 0.01;
const BKG_FLOOR: f64 = 1e-6;
const BAD_LOG_TERM: f64 = -100.0;
const NONFINITE_COST: f64 = 1e11;
const BKG_MIN_COUNT: usize = 3;

/// Which redshift the correction is conditioned on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionMode {
    /// First track (`corr`): conditioned on the known redshift.
    TrueRedshift,
    /// Second track (`corr2`): conditioned on the uncorrected zred.
    DerivedRedshift,
}

impl CorrectionMode {
    pub fn label(self) -> &'static str {
        match self {
            CorrectionMode::TrueRedshift => "zred",
            CorrectionMode::DerivedRedshift => "zred2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CorrectionTargets {
    pub offset: bool,
    pub slope: bool,
    pub r: bool,
    pub bkg: bool,
}

impl CorrectionTargets {
    pub const OFFSET: Self = Self { offset: true, slope: false, r: false, bkg: false };
    pub const SLOPE: Self = Self { offset: false, slope: true, r: false, bkg: false };
    pub const R: Self = Self { offset: false, slope: false, r: true, bkg: false };
    pub const BKG: Self = Self { offset: false, slope: false, r: false, bkg: true };
    pub const JOINT: Self = Self { offset: true, slope: true, r: true, bkg: true };

    pub fn is_empty(self) -> bool {
        !(self.offset || self.slope || self.r || self.bkg)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionParams {
    pub offset: Vec<f64>,
    pub slope: Vec<f64>,
    pub r: Vec<f64>,
    pub bkg: Vec<f64>,
}

impl CorrectionParams {
    pub fn pack(&self, t: CorrectionTargets) -> Vec<f64> {
        let mut out = Vec::new();
        for (on, v) in [
            (t.offset, &self.offset),
            (t.slope, &self.slope),
            (t.r, &self.r),
            (t.bkg, &self.bkg),
        ] {
            if on {
                out.extend_from_slice(v);
            }
        }
        out
    }

    pub fn unpack(&self, t: CorrectionTargets, x: &[f64]) -> CorrectionParams {
        let mut out = self.clone();
        let mut at = 0;
        for (on, v) in [
            (t.offset, &mut out.offset),
            (t.slope, &mut out.slope),
            (t.r, &mut out.r),
            (t.bkg, &mut out.bkg),
        ] {
            if on {
                let n = v.len();
                v.copy_from_slice(&x[at..at + n]);
                at += n;
            }
        }
        out
    }
}

/// Training subset chosen for a correction pass.
#[derive(Debug, Clone)]
pub struct CorrectionSelection {
    pub indices: Vec<usize>,
    /// Logistic likelihood weight of each selected object.
    pub weights: Vec<f64>,
    pub threshold: f64,
}

/// Drop the worst `outlier_frac` of likelihoods and anything with
/// `|z - zred| >= nsig · zred_e`; weight the rest by
/// `1 / (exp((threshold - lkhd) / softening) + 1)`.
pub fn select_training(
    lkhd: &[f64],
    z: &[f64],
    zred: &[f64],
    zred_e: &[f64],
    outlier_frac: f64,
    nsig: f64,
    softening: f64,
) -> Result<CorrectionSelection, CalibError> {
    let n = lkhd.len();
    ensure_len("redshifts", n, z.len())?;
    ensure_len("zreds", n, zred.len())?;
    ensure_len("zred errors", n, zred_e.len())?;
    if n == 0 {
        return Err(CalibError::InsufficientData(
            "no galaxies available for the correction fit".into(),
        ));
    }

    let mut sorted: Vec<f64> = lkhd.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return Err(CalibError::InsufficientData(
            "no finite zred likelihoods for the correction fit".into(),
        ));
    }
    sorted.sort_by(f64::total_cmp);
    let cut = ((outlier_frac * n as f64) as usize).min(sorted.len() - 1);
    let threshold = sorted[cut];

    let mut indices = Vec::new();
    let mut weights = Vec::new();
    for i in 0..n {
        if lkhd[i] > threshold && (z[i] - zred[i]).abs() < nsig * zred_e[i] {
            indices.push(i);
            weights.push(1.0 / (((threshold - lkhd[i]) / softening).exp() + 1.0));
        }
    }
    Ok(CorrectionSelection {
        indices,
        weights,
        threshold,
    })
}

#[derive(Debug, Clone, Copy)]
pub struct CorrectionNodes<'a> {
    pub offset: &'a [f64],
    /// Shared by slope, r and background variance.
    pub slope: &'a [f64],
}

#[derive(Debug, Clone, Copy)]
pub struct CorrectionObservations<'a> {
    /// Conditioning redshift (true z or derived zred).
    pub x: &'a [f64],
    /// `z_true - zred`.
    pub dz: &'a [f64],
    pub zred_e: &'a [f64],
    pub dmag: Option<&'a [f64]>,
    pub prob: &'a [f64],
    pub weight: Option<&'a [f64]>,
}

/// Seeds: median offsets, zero slope, unit r, and a background variance from
/// the lower-probability half of each slope-node window.
pub fn correction_start_values(
    nodes: CorrectionNodes<'_>,
    obs: &CorrectionObservations<'_>,
    min_count: usize,
) -> Result<CorrectionParams, CalibError> {
    let seeds = compute_start_values(
        &StartInputs {
            nodes: nodes.offset,
            z: obs.x,
            values: obs.dz,
            covariate: None,
            errors: None,
            min_count,
        },
        StartMode::Median,
    )?;

    let ns = nodes.slope.len();
    let mut bkg = vec![0.0; ns];
    for i in 0..ns {
        let (lo, hi) = node_window(nodes.slope, i);
        let mut idx: Vec<usize> = (0..obs.x.len()).filter(|&k| obs.x[k] > lo && obs.x[k] < hi).collect();
        if idx.len() < BKG_MIN_COUNT {
            if i > 0 {
                bkg[i] = bkg[i - 1];
            }
            continue;
        }
        idx.sort_by(|&a, &b| obs.prob[a].total_cmp(&obs.prob[b]));
        let low: Vec<f64> = idx[..idx.len() / 2].iter().map(|&k| obs.dz[k]).collect();
        let ones = vec![1.0; low.len()];
        bkg[i] = weighted_variance(&low, &ones).unwrap_or(0.0);
    }

    Ok(CorrectionParams {
        offset: seeds.centers().to_vec(),
        slope: vec![0.0; ns],
        r: vec![1.0; ns],
        bkg,
    })
}

pub struct CorrectionFitter<'a> {
    nodes: CorrectionNodes<'a>,
    obs: CorrectionObservations<'a>,
    mix: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct CorrectionFit {
    pub params: CorrectionParams,
    pub cost: f64,
    pub converged: bool,
}

impl<'a> CorrectionFitter<'a> {
    pub fn new(nodes: CorrectionNodes<'a>, obs: CorrectionObservations<'a>) -> Result<Self, CalibError> {
        validate_nodes(nodes.offset)?;
        validate_nodes(nodes.slope)?;
        let n = obs.x.len();
        ensure_len("redshift residuals", n, obs.dz.len())?;
        ensure_len("zred errors", n, obs.zred_e.len())?;
        ensure_len("probabilities", n, obs.prob.len())?;
        if let Some(d) = obs.dmag {
            ensure_len("magnitude offsets", n, d.len())?;
        }
        if let Some(w) = obs.weight {
            ensure_len("likelihood weights", n, w.len())?;
        }
        let mix = (0..n)
            .map(|i| obs.weight.map_or(1.0, |w| w[i]) * obs.prob[i].min(MAX_PROB))
            .collect();
        Ok(Self { nodes, obs, mix })
    }

    pub fn cost(&self, params: &CorrectionParams) -> f64 {
        let (Ok(c), Ok(s), Ok(r), Ok(b)) = (
            CubicSpline::new(self.nodes.offset, &params.offset),
            CubicSpline::new(self.nodes.slope, &params.slope),
            CubicSpline::new(self.nodes.slope, &params.r),
            CubicSpline::new(self.nodes.slope, &params.bkg),
        ) else {
            return NONFINITE_COST;
        };
        let o = &self.obs;

        let mut total = 0.0;
        for i in 0..o.x.len() {
            let x = o.x[i];
            let ci = c.eval(x);
            let dm = o.dmag.map_or(0.0, |d| d[i]);
            let sig = r.eval(x).max(R_FLOOR) * o.zred_e[i];
            let bsig = b.eval(x).max(BKG_FLOOR).sqrt();
            let signal = normal_pdf(o.dz[i], ci + s.eval(x) * dm, sig);
            let background = normal_pdf(o.dz[i], ci, bsig);
            let v = (self.mix[i] * signal + (1.0 - self.mix[i]) * background).ln();
            total += if v.is_finite() { v } else { BAD_LOG_TERM };
        }
        let t = -total;
        if t.is_finite() { t } else { NONFINITE_COST }
    }

    pub fn fit(
        &self,
        start: &CorrectionParams,
        targets: CorrectionTargets,
        opts: &SimplexOptions,
    ) -> Result<CorrectionFit, CalibError> {
        if targets.is_empty() {
            return Err(CalibError::config(
                "select at least one correction term to fit",
            ));
        }
        if targets.slope && self.obs.dmag.is_none() {
            return Err(CalibError::config(
                "correction slope requested without magnitude offsets",
            ));
        }
        ensure_len("offset start values", self.nodes.offset.len(), start.offset.len())?;
        for (what, len) in [
            ("slope start values", start.slope.len()),
            ("r start values", start.r.len()),
            ("background start values", start.bkg.len()),
        ] {
            ensure_len(what, self.nodes.slope.len(), len)?;
        }

        let x0 = start.pack(targets);
        let res = minimize(|x| self.cost(&start.unpack(targets, x)), &x0, opts);
        debug!(
            iterations = res.iterations,
            cost = res.cost,
            converged = res.converged,
            "correction stage finished"
        );
        Ok(CorrectionFit {
            params: start.unpack(targets, &res.x),
            cost: res.cost,
            converged: res.converged,
        })
    }

    /// Offset, optional slope, r, background, then everything together.
    pub fn fit_staged(
        &self,
        start: &CorrectionParams,
        fit_slope: bool,
        opts: &SimplexOptions,
    ) -> Result<CorrectionFit, CalibError> {
        let mut p = self.fit(start, CorrectionTargets::OFFSET, opts)?.params;
        if fit_slope {
            p = self.fit(&p, CorrectionTargets::SLOPE, opts)?.params;
        }
        p = self.fit(&p, CorrectionTargets::R, opts)?.params;
        p = self.fit(&p, CorrectionTargets::BKG, opts)?.params;
        let joint = CorrectionTargets {
            slope: fit_slope,
            ..CorrectionTargets::JOINT
        };
        self.fit(&p, joint, opts)
    }
}
