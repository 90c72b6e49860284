//! Maximum-likelihood fit of one color's red sequence: mean, slope, scatter vs. z.
//!
//! Each object contributes
//!
//! ```text
//! L_i = p_i · G_i + (1 - p_i) · B_i
//! G_i = φ((c_i - model_i) / σ_i) / σ_i / W_i
//! model_i = mean(z_i) + slope(z_i) · Δmag_i + lupcorr_i
//! σ_i² = max(scatter(z_i), floor)² + err_i²
//! ```
//!
//! where `W_i` is the Gaussian mass inside the object's truncation window (1
//! when no window is given) and `B_i` the background density. Without
//! membership probabilities the signal term stands alone.
//!
//! The caller drives the fit in stages by choosing which curves are active in
//! each call; curves held fixed are evaluated once per call and cached in a
//! stage-scoped [`FitContext`].

use tracing::debug;

use crate::error::{CalibError, ensure_len};
use crate::fit::simplex::{SimplexOptions, minimize};
use crate::math::gauss::{normal_pdf, window_mass};
use crate::math::spline::{CubicSpline, validate_nodes};

/// Scatter values are floored here before entering σ.
pub const SCATTER_FLOOR: f64 = 0.001;

/// Cost reported when the likelihood is not finite.
const NONFINITE_COST: f64 = 1e11;

/// Which curves are optimised in one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiagonalTargets {
    pub mean: bool,
    pub slope: bool,
    pub scatter: bool,
}

impl DiagonalTargets {
    pub const MEAN: Self = Self { mean: true, slope: false, scatter: false };
    pub const SLOPE: Self = Self { mean: false, slope: true, scatter: false };
    pub const SCATTER: Self = Self { mean: false, slope: false, scatter: true };
    pub const JOINT: Self = Self { mean: true, slope: true, scatter: true };

    pub fn is_empty(self) -> bool {
        !(self.mean || self.slope || self.scatter)
    }

    pub fn label(self) -> &'static str {
        match (self.mean, self.slope, self.scatter) {
            (true, false, false) => "mean",
            (false, true, false) => "slope",
            (false, false, true) => "scatter",
            (true, true, true) => "joint",
            (false, false, false) => "none",
            _ => "partial",
        }
    }
}

/// Node values of the three curves.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagonalParams {
    pub mean: Vec<f64>,
    pub slope: Vec<f64>,
    pub scatter: Vec<f64>,
}

impl DiagonalParams {
    /// Flatten the active curves, in mean/slope/scatter order.
    pub fn pack(&self, targets: DiagonalTargets) -> Vec<f64> {
        let mut out = Vec::new();
        if targets.mean {
            out.extend_from_slice(&self.mean);
        }
        if targets.slope {
            out.extend_from_slice(&self.slope);
        }
        if targets.scatter {
            out.extend_from_slice(&self.scatter);
        }
        out
    }

    /// Inverse of [`pack`](Self::pack): overwrite the active curves from `x`.
    pub fn unpack(&self, targets: DiagonalTargets, x: &[f64]) -> DiagonalParams {
        let mut out = self.clone();
        let mut at = 0;
        if targets.mean {
            let n = out.mean.len();
            out.mean.copy_from_slice(&x[at..at + n]);
            at += n;
        }
        if targets.slope {
            let n = out.slope.len();
            out.slope.copy_from_slice(&x[at..at + n]);
            at += n;
        }
        if targets.scatter {
            let n = out.scatter.len();
            out.scatter.copy_from_slice(&x[at..at + n]);
        }
        out
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiagonalNodes<'a> {
    pub mean: &'a [f64],
    pub slope: &'a [f64],
    pub scatter: &'a [f64],
}

/// Per-object color window `[lo, hi]` used to renormalise the signal term.
#[derive(Debug, Clone, Copy)]
pub struct Truncation<'a> {
    pub lo: &'a [f64],
    pub hi: &'a [f64],
}

#[derive(Debug, Clone, Copy)]
pub struct DiagonalObservations<'a> {
    pub z: &'a [f64],
    pub color: &'a [f64],
    pub color_err: &'a [f64],
    /// Reference magnitude minus pivot magnitude; required for slope fits.
    pub dmag: Option<&'a [f64]>,
    pub trunc: Option<Truncation<'a>>,
    pub prob: Option<&'a [f64]>,
    pub bkg: Option<&'a [f64]>,
}

#[derive(Debug, Clone)]
pub struct DiagonalFit {
    pub params: DiagonalParams,
    pub cost: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Stage-scoped cache: evaluations of every curve that is held fixed.
struct FitContext<'c> {
    targets: DiagonalTargets,
    start: &'c DiagonalParams,
    lupcorr: &'c [f64],
    mean: Option<Vec<f64>>,
    slope: Option<Vec<f64>>,
    sigma: Option<Vec<f64>>,
    norm: Option<Vec<f64>>,
}

pub struct DiagonalFitter<'a> {
    nodes: DiagonalNodes<'a>,
    obs: DiagonalObservations<'a>,
    err2: Vec<f64>,
    zero: Vec<f64>,
}

impl<'a> DiagonalFitter<'a> {
    pub fn new(nodes: DiagonalNodes<'a>, obs: DiagonalObservations<'a>) -> Result<Self, CalibError> {
        validate_nodes(nodes.mean)?;
        validate_nodes(nodes.slope)?;
        validate_nodes(nodes.scatter)?;

        let n = obs.z.len();
        ensure_len("colors", n, obs.color.len())?;
        ensure_len("color errors", n, obs.color_err.len())?;
        if let Some(d) = obs.dmag {
            ensure_len("magnitude offsets", n, d.len())?;
        }
        if let Some(t) = obs.trunc {
            ensure_len("truncation lower bounds", n, t.lo.len())?;
            ensure_len("truncation upper bounds", n, t.hi.len())?;
        }
        if let Some(p) = obs.prob {
            ensure_len("probabilities", n, p.len())?;
        }
        if let Some(b) = obs.bkg {
            ensure_len("background densities", n, b.len())?;
        }
        if obs.prob.is_some() && obs.bkg.is_none() {
            return Err(CalibError::config(
                "membership probabilities need background densities",
            ));
        }

        Ok(Self {
            nodes,
            obs,
            err2: obs.color_err.iter().map(|e| e * e).collect(),
            zero: vec![0.0; n],
        })
    }

    pub fn len(&self) -> usize {
        self.obs.z.len()
    }

    pub fn is_empty(&self) -> bool {
        self.obs.z.is_empty()
    }

    /// Run one stage: optimise the `targets` curves, holding the rest at `start`.
    pub fn fit(
        &self,
        start: &DiagonalParams,
        targets: DiagonalTargets,
        lupcorr: Option<&[f64]>,
        opts: &SimplexOptions,
    ) -> Result<DiagonalFit, CalibError> {
        let ctx = self.context(start, targets, lupcorr)?;
        let x0 = start.pack(targets);
        let res = minimize(|x| self.cost(&ctx, x), &x0, opts);
        debug!(
            stage = targets.label(),
            iterations = res.iterations,
            cost = res.cost,
            converged = res.converged,
            "diagonal stage finished"
        );
        Ok(DiagonalFit {
            params: start.unpack(targets, &res.x),
            cost: res.cost,
            iterations: res.iterations,
            converged: res.converged,
        })
    }

    /// Mean, slope, scatter, then joint. `lupcorr` is asked for the luptitude
    /// correction twice: for the seed, and again once the mean stage has
    /// converged; the later stages all use the second answer.
    pub fn fit_staged<F>(
        &self,
        start: &DiagonalParams,
        opts: &SimplexOptions,
        mut lupcorr: F,
    ) -> Result<DiagonalFit, CalibError>
    where
        F: FnMut(&DiagonalParams) -> Result<Option<Vec<f64>>, CalibError>,
    {
        let lup0 = lupcorr(start)?;
        let mut p = self.fit(start, DiagonalTargets::MEAN, lup0.as_deref(), opts)?.params;
        let lup1 = lupcorr(&p)?;
        p = self.fit(&p, DiagonalTargets::SLOPE, lup1.as_deref(), opts)?.params;
        p = self.fit(&p, DiagonalTargets::SCATTER, lup1.as_deref(), opts)?.params;
        self.fit(&p, DiagonalTargets::JOINT, lup1.as_deref(), opts)
    }

    /// Negative log-likelihood of a full parameter set.
    pub fn negative_log_likelihood(
        &self,
        params: &DiagonalParams,
        lupcorr: Option<&[f64]>,
    ) -> Result<f64, CalibError> {
        let ctx = self.context(params, DiagonalTargets::JOINT, lupcorr)?;
        Ok(self.cost(&ctx, &params.pack(DiagonalTargets::JOINT)))
    }

    fn context<'c>(
        &'c self,
        start: &'c DiagonalParams,
        targets: DiagonalTargets,
        lupcorr: Option<&'c [f64]>,
    ) -> Result<FitContext<'c>, CalibError> {
        if targets.is_empty() {
            return Err(CalibError::config(
                "select at least one of mean, slope, scatter to fit",
            ));
        }
        if targets.slope && self.obs.dmag.is_none() {
            return Err(CalibError::config(
                "slope fit requested without magnitude offsets",
            ));
        }
        ensure_len("mean start values", self.nodes.mean.len(), start.mean.len())?;
        ensure_len("slope start values", self.nodes.slope.len(), start.slope.len())?;
        ensure_len("scatter start values", self.nodes.scatter.len(), start.scatter.len())?;
        let lupcorr = match lupcorr {
            Some(l) => {
                ensure_len("luptitude corrections", self.len(), l.len())?;
                l
            }
            None => &self.zero,
        };

        let z = self.obs.z;
        let mean = if targets.mean {
            None
        } else {
            Some(CubicSpline::new(self.nodes.mean, &start.mean)?.eval_many(z))
        };
        let slope = if targets.slope {
            None
        } else {
            Some(CubicSpline::new(self.nodes.slope, &start.slope)?.eval_many(z))
        };
        let sigma = if targets.scatter {
            None
        } else {
            let spl = CubicSpline::new(self.nodes.scatter, &start.scatter)?;
            Some(self.total_sigma(&spl))
        };
        let norm = match (self.obs.trunc, &mean, &sigma) {
            (Some(t), Some(m), Some(s)) => Some(window_norms(t, m, s)),
            _ => None,
        };

        Ok(FitContext {
            targets,
            start,
            lupcorr,
            mean,
            slope,
            sigma,
            norm,
        })
    }

    fn total_sigma(&self, scatter: &CubicSpline) -> Vec<f64> {
        self.obs
            .z
            .iter()
            .zip(&self.err2)
            .map(|(&z, &e2)| {
                let s = scatter.eval(z).max(SCATTER_FLOOR);
                (s * s + e2).sqrt()
            })
            .collect()
    }

    fn cost(&self, ctx: &FitContext<'_>, x: &[f64]) -> f64 {
        let params = ctx.start.unpack(ctx.targets, x);
        let z = self.obs.z;

        let mean_owned;
        let mean: &[f64] = match &ctx.mean {
            Some(m) => m,
            None => {
                let Ok(spl) = CubicSpline::new(self.nodes.mean, &params.mean) else {
                    return NONFINITE_COST;
                };
                mean_owned = spl.eval_many(z);
                &mean_owned
            }
        };
        let slope_owned;
        let slope: &[f64] = match &ctx.slope {
            Some(s) => s,
            None => {
                let Ok(spl) = CubicSpline::new(self.nodes.slope, &params.slope) else {
                    return NONFINITE_COST;
                };
                slope_owned = spl.eval_many(z);
                &slope_owned
            }
        };
        let sigma_owned;
        let sigma: &[f64] = match &ctx.sigma {
            Some(s) => s,
            None => {
                let Ok(spl) = CubicSpline::new(self.nodes.scatter, &params.scatter) else {
                    return NONFINITE_COST;
                };
                sigma_owned = self.total_sigma(&spl);
                &sigma_owned
            }
        };
        let norm_owned;
        let norm: Option<&[f64]> = match (&ctx.norm, self.obs.trunc) {
            (Some(n), _) => Some(n),
            (None, Some(t)) => {
                norm_owned = window_norms(t, mean, sigma);
                Some(&norm_owned)
            }
            (None, None) => None,
        };

        let dmag = self.obs.dmag.unwrap_or(&self.zero);
        let mut total = 0.0;
        for i in 0..z.len() {
            let model = mean[i] + slope[i] * dmag[i] + ctx.lupcorr[i];
            let mut g = normal_pdf(self.obs.color[i], model, sigma[i]);
            if let Some(nm) = norm {
                g /= nm[i];
            }
            let like = match (self.obs.prob, self.obs.bkg) {
                (Some(p), Some(b)) => p[i] * g + (1.0 - p[i]) * b[i],
                _ => g,
            };
            total += like.ln();
        }

        let t = -total;
        if t.is_finite() { t } else { NONFINITE_COST }
    }
}

fn window_norms(t: Truncation<'_>, mean: &[f64], sigma: &[f64]) -> Vec<f64> {
    (0..mean.len())
        .map(|i| window_mass(t.lo[i], t.hi[i], mean[i], sigma[i]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand::rngs::StdRng;
    use rand_distr::Normal;

    struct Synthetic {
        z: Vec<f64>,
        color: Vec<f64>,
        err: Vec<f64>,
        dmag: Vec<f64>,
    }

    fn synthetic(n: usize, a: f64, b: f64, sigma: f64, seed: u64) -> Synthetic {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0, 1.0).unwrap();
        let mut s = Synthetic {
            z: Vec::with_capacity(n),
            color: Vec::with_capacity(n),
            err: Vec::with_capacity(n),
            dmag: Vec::with_capacity(n),
        };
        for _ in 0..n {
            let z = rng.gen_range(0.1..0.3);
            let err = 0.01;
            let total = (sigma * sigma + err * err).sqrt();
            s.z.push(z);
            s.color.push(a + b * z + total * noise.sample(&mut rng));
            s.err.push(err);
            s.dmag.push(rng.gen_range(-2.0..1.0));
        }
        s
    }

    fn observations(s: &Synthetic) -> DiagonalObservations<'_> {
        DiagonalObservations {
            z: &s.z,
            color: &s.color,
            color_err: &s.err,
            dmag: Some(&s.dmag),
            trunc: None,
            prob: None,
            bkg: None,
        }
    }

    #[test]
    fn staged_fit_recovers_linear_mean_and_scatter() {
        let s = synthetic(1500, 0.6, 2.0, 0.05, 7);
        let mean_nodes = [0.1, 0.2, 0.3];
        let slope_nodes = [0.1, 0.3];
        let scatter_nodes = [0.1, 0.3];
        let nodes = DiagonalNodes {
            mean: &mean_nodes,
            slope: &slope_nodes,
            scatter: &scatter_nodes,
        };
        let fitter = DiagonalFitter::new(nodes, observations(&s)).unwrap();
        let opts = SimplexOptions::default();

        let mut p = DiagonalParams {
            mean: vec![0.75, 1.0, 1.15],
            slope: vec![0.0, 0.0],
            scatter: vec![0.08, 0.08],
        };
        for targets in [
            DiagonalTargets::MEAN,
            DiagonalTargets::SLOPE,
            DiagonalTargets::SCATTER,
            DiagonalTargets::JOINT,
        ] {
            p = fitter.fit(&p, targets, None, &opts).unwrap().params;
        }

        for (z, m) in mean_nodes.iter().zip(&p.mean) {
            assert!((m - (0.6 + 2.0 * z)).abs() < 0.01, "mean at {z}: {m}");
        }
        for s in &p.slope {
            assert!(s.abs() < 0.01, "slope {s}");
        }
        for sc in &p.scatter {
            assert!((sc - 0.05).abs() < 0.008, "scatter {sc}");
        }
    }

    #[test]
    fn luptitude_correction_follows_the_fitted_mean() {
        let s = synthetic(1500, 0.6, 2.0, 0.05, 29);
        let mean_nodes = [0.1, 0.2, 0.3];
        let slope_nodes = [0.1, 0.3];
        let nodes = DiagonalNodes {
            mean: &mean_nodes,
            slope: &slope_nodes,
            scatter: &slope_nodes,
        };
        let fitter = DiagonalFitter::new(nodes, observations(&s)).unwrap();
        let start = DiagonalParams {
            mean: vec![0.75, 1.0, 1.15],
            slope: vec![0.0, 0.0],
            scatter: vec![0.08, 0.08],
        };

        // No correction for the seed; a 0.1 shift once the mean has been fit.
        let mut seen: Vec<Vec<f64>> = Vec::new();
        let fit = fitter
            .fit_staged(&start, &SimplexOptions::default(), |p| {
                seen.push(p.mean.clone());
                Ok((seen.len() > 1).then(|| vec![0.1; s.z.len()]))
            })
            .unwrap();

        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], start.mean);
        for (z, m) in mean_nodes.iter().zip(&seen[1]) {
            assert!((m - (0.6 + 2.0 * z)).abs() < 0.02, "mean-stage value at {z}: {m}");
        }
        // The joint stage saw the recomputed correction and absorbed it.
        for (z, m) in mean_nodes.iter().zip(&fit.params.mean) {
            assert!((m - (0.5 + 2.0 * z)).abs() < 0.02, "joint mean at {z}: {m}");
        }
    }

    #[test]
    fn truncated_fit_recovers_scatter() {
        let s = synthetic(3000, 1.0, 0.0, 0.05, 11);
        // Keep objects inside ±1.5σ of the truth and tell the fitter about the window.
        let width = 1.5 * (0.05f64.powi(2) + 0.01f64.powi(2)).sqrt();
        let keep: Vec<usize> = (0..s.z.len()).filter(|&i| (s.color[i] - 1.0).abs() < width).collect();
        let pick = |v: &[f64]| keep.iter().map(|&i| v[i]).collect::<Vec<f64>>();
        let (z, color, err) = (pick(&s.z), pick(&s.color), pick(&s.err));
        let lo = vec![1.0 - width; z.len()];
        let hi = vec![1.0 + width; z.len()];

        let mean_nodes = [0.1, 0.3];
        let nodes = DiagonalNodes {
            mean: &mean_nodes,
            slope: &mean_nodes,
            scatter: &mean_nodes,
        };
        let obs = DiagonalObservations {
            z: &z,
            color: &color,
            color_err: &err,
            dmag: None,
            trunc: Some(Truncation { lo: &lo, hi: &hi }),
            prob: None,
            bkg: None,
        };
        let fitter = DiagonalFitter::new(nodes, obs).unwrap();
        let start = DiagonalParams {
            mean: vec![1.02, 0.98],
            slope: vec![0.0, 0.0],
            scatter: vec![0.03, 0.03],
        };
        let targets = DiagonalTargets {
            mean: true,
            slope: false,
            scatter: true,
        };
        let fit = fitter.fit(&start, targets, None, &SimplexOptions::default()).unwrap();
        for sc in &fit.params.scatter {
            assert!((sc - 0.05).abs() < 0.01, "scatter {sc}");
        }
    }

    #[test]
    fn background_term_absorbs_field_objects() {
        let s = synthetic(800, 1.0, 0.0, 0.04, 3);
        let mut color = s.color.clone();
        let mut prob = vec![0.9; color.len()];
        // Every fifth object is a blue field galaxy with low membership probability.
        for i in (0..color.len()).step_by(5) {
            color[i] = 0.4;
            prob[i] = 0.05;
        }
        let bkg = vec![0.8; color.len()];
        let nodes_arr = [0.1, 0.3];
        let nodes = DiagonalNodes {
            mean: &nodes_arr,
            slope: &nodes_arr,
            scatter: &nodes_arr,
        };
        let obs = DiagonalObservations {
            z: &s.z,
            color: &color,
            color_err: &s.err,
            dmag: None,
            trunc: None,
            prob: Some(&prob),
            bkg: Some(&bkg),
        };
        let fitter = DiagonalFitter::new(nodes, obs).unwrap();
        let start = DiagonalParams {
            mean: vec![0.9, 0.9],
            slope: vec![0.0, 0.0],
            scatter: vec![0.05, 0.05],
        };
        let fit = fitter
            .fit(&start, DiagonalTargets::MEAN, None, &SimplexOptions::default())
            .unwrap();
        for m in &fit.params.mean {
            assert!((m - 1.0).abs() < 0.02, "mean {m}");
        }
    }

    #[test]
    fn stage_errors_are_configuration_errors() {
        let s = synthetic(10, 1.0, 0.0, 0.05, 1);
        let nodes_arr = [0.1, 0.3];
        let nodes = DiagonalNodes {
            mean: &nodes_arr,
            slope: &nodes_arr,
            scatter: &nodes_arr,
        };
        let mut obs = observations(&s);
        obs.dmag = None;
        let fitter = DiagonalFitter::new(nodes, obs).unwrap();
        let start = DiagonalParams {
            mean: vec![1.0, 1.0],
            slope: vec![0.0, 0.0],
            scatter: vec![0.05, 0.05],
        };
        let opts = SimplexOptions::default();
        assert!(matches!(
            fitter.fit(&start, DiagonalTargets::default(), None, &opts),
            Err(CalibError::Configuration(_))
        ));
        assert!(matches!(
            fitter.fit(&start, DiagonalTargets::SLOPE, None, &opts),
            Err(CalibError::Configuration(_))
        ));
    }

    #[test]
    fn mismatched_inputs_are_rejected() {
        let s = synthetic(10, 1.0, 0.0, 0.05, 1);
        let nodes_arr = [0.1, 0.3];
        let nodes = DiagonalNodes {
            mean: &nodes_arr,
            slope: &nodes_arr,
            scatter: &nodes_arr,
        };
        let mut obs = observations(&s);
        let short = vec![0.0; 3];
        obs.dmag = Some(&short);
        assert!(matches!(
            DiagonalFitter::new(nodes, obs),
            Err(CalibError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn pack_and_unpack_are_inverse_on_active_curves() {
        let p = DiagonalParams {
            mean: vec![1.0, 2.0],
            slope: vec![3.0],
            scatter: vec![4.0, 5.0, 6.0],
        };
        let t = DiagonalTargets {
            mean: true,
            slope: false,
            scatter: true,
        };
        let x = p.pack(t);
        assert_eq!(x, vec![1.0, 2.0, 4.0, 5.0, 6.0]);
        let q = p.unpack(t, &[9.0, 8.0, 7.0, 6.0, 5.0]);
        assert_eq!(q.mean, vec![9.0, 8.0]);
        assert_eq!(q.slope, vec![3.0]);
        assert_eq!(q.scatter, vec![7.0, 6.0, 5.0]);
    }
}
