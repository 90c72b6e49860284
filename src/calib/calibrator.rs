//! Stage sequencing for a full red-sequence calibration.
//!
//! Stages run strictly in order; each one reads what the previous stages wrote
//! into the [`ParameterTable`]:
//!
//! 1. filter the sample by redshift range and membership probability
//! 2. pivot magnitudes and median colors (high-probability subset)
//! 3. diagonal fits per color, outward from the reference band
//! 4. off-diagonal correlations for every color pair
//! 5. volume factor, then a checkpoint of the table
//! 6. raw zreds, two correction tracks, corrected zreds

use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::background::BackgroundDensity;
use crate::calib::zred::{RedSequenceModel, Zred, ZredCorrection};
use crate::domain::config::{CalibConfig, ScatterSeed};
use crate::domain::galaxy::{GalaxySample, gather};
use crate::domain::params::{NodeGrids, ParameterTable, VOLUME_NODESIZE};
use crate::error::{CalibError, StageBand};
use crate::fit::correction::{
    CorrectionFitter, CorrectionMode, CorrectionNodes, CorrectionObservations, correction_start_values,
    select_training,
};
use crate::fit::diagonal::{
    DiagonalFitter, DiagonalNodes, DiagonalObservations, DiagonalParams, SCATTER_FLOOR,
    Truncation,
};
use crate::fit::ecgmm::{EcgmmBounds, EcgmmFitter};
use crate::fit::median::MedianFitter;
use crate::fit::nodes::{node_window, searchsorted};
use crate::fit::offdiag::{OffDiagonalFitter, OffDiagonalObservations};
use crate::fit::startvals::{StartInputs, StartMode, compute_start_values};
use crate::math::cosmo::volume_factor;
use crate::math::luptitude::{ChainStep, chain_correction, chain_order};
use crate::math::robust::{MAD_TO_SIGMA, median};
use crate::math::spline::CubicSpline;

/// Minimum objects per window for the pivot / median-color seeds.
const MEDIAN_MIN_COUNT: usize = 3;
/// Minimum objects per window for the diagonal line seeds.
const DIAGONAL_MIN_COUNT: usize = 5;
/// Minimum objects per window for a mixture scatter seed.
const MIXTURE_MIN_COUNT: usize = 10;
/// Scatter seed for mixture windows with too few objects.
const MIXTURE_FALLBACK: f64 = 0.05;
/// Fewer shared objects than this skip an off-diagonal pair.
const PAIR_MIN_COUNT: usize = 3;
/// Fewer training objects than this skip a correction track.
const CORRECTION_MIN_COUNT: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct StageTiming {
    pub stage: &'static str,
    pub band: StageBand,
    pub seconds: f64,
}

/// Per-galaxy zred output of a calibration run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ZredRow {
    pub z: f64,
    pub refmag: f64,
    pub zred_uncorr: f64,
    pub zred_uncorr_e: f64,
    pub zred: f64,
    pub zred_e: f64,
    pub zred2: f64,
    pub zred2_e: f64,
    pub lkhd: f64,
    pub chisq: f64,
}

#[derive(Debug, Clone)]
pub struct CalibrationOutput {
    pub table: ParameterTable,
    /// The filtered sample the table was fit to.
    pub sample: GalaxySample,
    pub zreds: Vec<ZredRow>,
    pub timings: Vec<StageTiming>,
}

pub struct Calibrator<'a, B: BackgroundDensity + ?Sized> {
    config: &'a CalibConfig,
    background: &'a B,
}

impl<'a, B: BackgroundDensity + ?Sized> Calibrator<'a, B> {
    pub fn new(config: &'a CalibConfig, background: &'a B) -> Result<Self, CalibError> {
        config.validate()?;
        Ok(Self { config, background })
    }

    pub fn run(&self, sample: &GalaxySample) -> Result<CalibrationOutput, CalibError> {
        self.run_with_checkpoint(sample, |_| Ok(()))
    }

    /// Run every stage; `checkpoint` sees the table once the red-sequence
    /// model is complete and before the correction tracks are fit.
    pub fn run_with_checkpoint<F>(
        &self,
        sample: &GalaxySample,
        mut checkpoint: F,
    ) -> Result<CalibrationOutput, CalibError>
    where
        F: FnMut(&ParameterTable) -> Result<(), CalibError>,
    {
        let cfg = self.config;
        let mut timings = Vec::new();

        let mut run = timed(&mut timings, "filter", StageBand::All, || {
            Run::prepare(cfg, self.background, sample)
        })?;
        info!(
            galaxies = run.gals.len(),
            color_galaxies = run.colgals.len(),
            "calibration sample selected"
        );

        timed(&mut timings, "pivot magnitudes", StageBand::All, || run.pivotmags())?;
        timed(&mut timings, "median colors", StageBand::All, || run.medcols())?;

        for step in run.color_order() {
            timed(&mut timings, "diagonal fit", StageBand::Color(step.color), || run.diagonal(step))?;
        }
        for j in 0..cfg.ncol() {
            for k in j + 1..cfg.ncol() {
                timed(&mut timings, "off-diagonal fit", StageBand::Pair(j, k), || run.off_diagonal(j, k))?;
            }
        }

        run.table.volume_factor = volume_factor(
            &cfg.cosmology,
            cfg.zrange[1],
            &run.table.volume_factor_z,
            VOLUME_NODESIZE,
        );
        checkpoint(&run.table).map_err(|e| e.in_stage("checkpoint", StageBand::All))?;

        let raw = timed(&mut timings, "zred", StageBand::All, || run.zreds())?;
        for mode in [CorrectionMode::TrueRedshift, CorrectionMode::DerivedRedshift] {
            timed(&mut timings, "correction fit", StageBand::All, || run.corrections(&raw, mode))?;
        }
        let zreds = timed(&mut timings, "corrected zred", StageBand::All, || run.corrected(&raw))?;

        info!(
            colors = cfg.ncol(),
            galaxies = run.gals.len(),
            seconds = timings.iter().map(|t| t.seconds).sum::<f64>(),
            "calibration finished"
        );
        Ok(CalibrationOutput {
            table: run.table,
            sample: run.gals,
            zreds,
            timings,
        })
    }
}

fn timed<T>(
    timings: &mut Vec<StageTiming>,
    stage: &'static str,
    band: StageBand,
    f: impl FnOnce() -> Result<T, CalibError>,
) -> Result<T, CalibError> {
    let start = Instant::now();
    let out = f().map_err(|e| e.in_stage(stage, band))?;
    let seconds = start.elapsed().as_secs_f64();
    info!(stage, band = ?band, seconds, "stage done");
    timings.push(StageTiming { stage, band, seconds });
    Ok(out)
}

/// Mutable state of one calibration run.
struct Run<'r, B: BackgroundDensity + ?Sized> {
    cfg: &'r CalibConfig,
    background: &'r B,
    gals: GalaxySample,
    colgals: GalaxySample,
    probs: Vec<f64>,
    grids: NodeGrids,
    table: ParameterTable,
    colors: Vec<Vec<f64>>,
    color_errs: Vec<Vec<f64>>,
    /// `refmag - pivotmag(z)`, filled by the pivot stage.
    dmag: Vec<f64>,
    /// Objects inside each color's truncation window.
    in_window: Vec<Vec<bool>>,
    /// Final luptitude correction per color (zeros when disabled).
    lupcorr: Vec<Vec<f64>>,
    /// Model magnitudes per band, filled outward from the reference band.
    model_mags: Vec<Option<Vec<f64>>>,
}

impl<'r, B: BackgroundDensity + ?Sized> Run<'r, B> {
    fn prepare(cfg: &'r CalibConfig, background: &'r B, sample: &GalaxySample) -> Result<Self, CalibError> {
        sample.validate()?;
        if sample.nmag() != cfg.nmag {
            return Err(CalibError::config(format!(
                "configuration expects {} bands, catalog has {}",
                cfg.nmag,
                sample.nmag()
            )));
        }

        let idx = sample.filter_indices(cfg.zrange, &sample.pmem, cfg.calib_pcut);
        if idx.is_empty() {
            return Err(CalibError::InsufficientData(format!(
                "no galaxies with {} < z < {} and pmem > {}",
                cfg.zrange[0], cfg.zrange[1], cfg.calib_pcut
            )));
        }
        let gals = sample.select(&idx);
        let probs = gals.probabilities(cfg.calib_use_pcol).to_vec();

        let col_idx: Vec<usize> = (0..gals.len()).filter(|&i| probs[i] > cfg.calib_color_pcut).collect();
        if col_idx.len() < MEDIAN_MIN_COUNT {
            return Err(CalibError::InsufficientData(format!(
                "only {} galaxies above calib_color_pcut = {}",
                col_idx.len(),
                cfg.calib_color_pcut
            )));
        }
        let colgals = gals.select(&col_idx);

        let grids = NodeGrids::from_config(cfg)?;
        let table = ParameterTable::new(cfg, &grids);
        let ncol = cfg.ncol();
        let n = gals.len();
        let mut model_mags = vec![None; cfg.nmag];
        model_mags[cfg.ref_ind] = Some(gals.mag[cfg.ref_ind].clone());

        Ok(Self {
            cfg,
            background,
            colors: (0..ncol).map(|j| gals.color(j)).collect(),
            color_errs: (0..ncol).map(|j| gals.color_err(j)).collect(),
            dmag: vec![0.0; n],
            in_window: vec![vec![false; n]; ncol],
            lupcorr: vec![vec![0.0; n]; ncol],
            model_mags,
            gals,
            colgals,
            probs,
            grids,
            table,
        })
    }

    fn pivotmags(&mut self) -> Result<(), CalibError> {
        let nodes = &self.grids.pivot;
        let g = &self.colgals;
        let seeds = compute_start_values(
            &StartInputs {
                nodes,
                z: &g.z,
                values: &g.refmag,
                covariate: None,
                errors: None,
                min_count: MEDIAN_MIN_COUNT,
            },
            StartMode::Median,
        )?;
        let piv = MedianFitter::new(nodes, &g.z, &g.refmag)?.fit(seeds.centers(), &self.cfg.simplex)?;

        let spl = CubicSpline::new(nodes, &piv)?;
        self.dmag = self
            .gals
            .z
            .iter()
            .zip(&self.gals.refmag)
            .map(|(&z, &m)| m - spl.eval(z))
            .collect();
        self.table.pivotmag = piv;
        Ok(())
    }

    fn medcols(&mut self) -> Result<(), CalibError> {
        let nodes = &self.grids.pivot;
        let g = &self.colgals;
        for j in 0..self.cfg.ncol() {
            let col = g.color(j);
            let seeds = compute_start_values(
                &StartInputs {
                    nodes,
                    z: &g.z,
                    values: &col,
                    covariate: None,
                    errors: None,
                    min_count: MEDIAN_MIN_COUNT,
                },
                StartMode::Median,
            )?;
            let med = MedianFitter::new(nodes, &g.z, &col)?.fit(seeds.centers(), &self.cfg.simplex)?;

            let spl = CubicSpline::new(nodes, &med)?;
            let absdev: Vec<f64> = g.z.iter().zip(&col).map(|(&z, &c)| (c - spl.eval(z)).abs()).collect();
            let mad_seed: Vec<f64> = seeds.secondary().iter().map(|w| w / MAD_TO_SIGMA).collect();
            let mad = MedianFitter::new(nodes, &g.z, &absdev)?.fit(&mad_seed, &self.cfg.simplex)?;

            self.table.medcol[j] = med;
            self.table.medcol_width[j] = mad.iter().map(|m| MAD_TO_SIGMA * m).collect();
        }
        Ok(())
    }

    /// Colors in fitting order: outward from the reference band when
    /// luptitudes are on, natural order otherwise.
    fn color_order(&self) -> Vec<ChainStep> {
        if self.cfg.lupcorr.is_some() {
            chain_order(self.cfg.nmag, self.cfg.ref_ind)
        } else {
            (0..self.cfg.ncol())
                .map(|j| ChainStep {
                    color: j,
                    target: j + 1,
                    known: j,
                })
                .collect()
        }
    }

    /// Model color `mean(z) + slope(z) · Δmag` for every galaxy.
    fn model_color(&self, j: usize, p: &DiagonalParams) -> Result<Vec<f64>, CalibError> {
        let c = &self.table.colors[j];
        let mean = CubicSpline::new(&c.mean_z, &p.mean)?;
        let slope = CubicSpline::new(&c.slope_z, &p.slope)?;
        Ok(self
            .gals
            .z
            .iter()
            .zip(&self.dmag)
            .map(|(&z, &d)| mean.eval(z) + slope.eval(z) * d)
            .collect())
    }

    /// Luptitude correction of `step` for the current curves, plus the
    /// target band's model magnitudes.
    fn luptitude_step(
        &self,
        step: ChainStep,
        p: &DiagonalParams,
    ) -> Result<Option<(Vec<f64>, Vec<f64>)>, CalibError> {
        let Some(lup) = &self.cfg.lupcorr else {
            return Ok(None);
        };
        let Some(known) = &self.model_mags[step.known] else {
            return Err(CalibError::config(format!(
                "band {} has no model magnitudes yet for color {}",
                step.known, step.color
            )));
        };
        let model = self.model_color(step.color, p)?;
        chain_correction(lup, step, known, &model).map(Some)
    }

    fn diagonal(&mut self, step: ChainStep) -> Result<(), CalibError> {
        let j = step.color;
        let cfg = self.cfg;
        let z = &self.gals.z;
        let col = &self.colors[j];
        let err = &self.color_errs[j];

        let med = CubicSpline::new(&self.table.pivotmag_z, &self.table.medcol[j])?;
        let wid = CubicSpline::new(&self.table.pivotmag_z, &self.table.medcol_width[j])?;
        let mut u = Vec::new();
        let (mut lo, mut hi) = (Vec::new(), Vec::new());
        for i in 0..z.len() {
            let m = med.eval(z[i]);
            let half = cfg.calib_color_nsig * wid.eval(z[i]);
            if col[i] > m - half && col[i] < m + half {
                u.push(i);
                lo.push(m - half);
                hi.push(m + half);
            }
        }
        if u.is_empty() {
            return Err(CalibError::InsufficientData(format!(
                "no galaxies inside the truncation window of color {j:02}"
            )));
        }
        for &i in &u {
            self.in_window[j][i] = true;
        }

        let zu = gather(z, &u);
        let cu = gather(col, &u);
        let eu = gather(err, &u);
        let du = gather(&self.dmag, &u);
        let pu = gather(&self.probs, &u);
        let bu = self.background.diagonal(j, &cu, &gather(&self.gals.refmag, &u))?;

        let curves = &self.table.colors[j];
        let seeds = compute_start_values(
            &StartInputs {
                nodes: &curves.mean_z,
                z: &zu,
                values: &cu,
                covariate: Some(&du),
                errors: None,
                min_count: DIAGONAL_MIN_COUNT,
            },
            StartMode::Line,
        )?;
        let at = searchsorted(&curves.mean_z, &curves.slope_z);
        let p = DiagonalParams {
            mean: seeds.centers().to_vec(),
            slope: at.iter().map(|&i| seeds.secondary()[i]).collect(),
            scatter: self.scatter_seed(j)?,
        };

        let fitter = DiagonalFitter::new(
            DiagonalNodes {
                mean: &curves.mean_z,
                slope: &curves.slope_z,
                scatter: &self.grids.covmat,
            },
            DiagonalObservations {
                z: &zu,
                color: &cu,
                color_err: &eu,
                dmag: Some(&du),
                trunc: Some(Truncation { lo: &lo, hi: &hi }),
                prob: Some(&pu),
                bkg: Some(&bu),
            },
        )?;
        let joint = fitter.fit_staged(&p, &cfg.simplex, |q| {
            Ok(self.luptitude_step(step, q)?.map(|(_, c)| gather(&c, &u)))
        })?;
        let p = joint.params;
        info!(
            color = j,
            objects = u.len(),
            cost = joint.cost,
            converged = joint.converged,
            "diagonal fit done"
        );

        if let Some((mags, corr)) = self.luptitude_step(step, &p)? {
            self.model_mags[step.target] = Some(mags);
            self.lupcorr[j] = corr;
        }
        let curves = &mut self.table.colors[j];
        curves.mean = p.mean;
        curves.slope = p.slope;
        self.table.sigma[j][j] = p.scatter;
        Ok(())
    }

    fn scatter_seed(&self, j: usize) -> Result<Vec<f64>, CalibError> {
        let nodes = &self.grids.covmat;
        if let ScatterSeed::Constant { value } = self.cfg.scatter_seed {
            return Ok(vec![value; nodes.len()]);
        }

        let z = &self.gals.z;
        let col = &self.colors[j];
        let err = &self.color_errs[j];
        let mut out = vec![MIXTURE_FALLBACK; nodes.len()];
        for i in 0..nodes.len() {
            let (lo, hi) = node_window(nodes, i);
            let idx: Vec<usize> = (0..z.len()).filter(|&k| z[k] > lo && z[k] < hi).collect();
            if idx.len() < MIXTURE_MIN_COUNT {
                if i > 0 {
                    out[i] = out[i - 1];
                }
                continue;
            }
            let y = gather(col, &idx);
            let ye = gather(err, &idx);
            let center = median(&y).unwrap_or(0.0);
            let fit = EcgmmFitter::new(&y, &ye)?.fit(
                0.5,
                [center - 0.3, center],
                [0.1, 0.05],
                Some(EcgmmBounds::around(0.0)),
                -center,
            );
            out[i] = fit.red_sigma().clamp(0.01, 0.2);
        }
        Ok(out)
    }

    fn off_diagonal(&mut self, j: usize, k: usize) -> Result<(), CalibError> {
        let idx: Vec<usize> = (0..self.gals.len())
            .filter(|&i| self.in_window[j][i] && self.in_window[k][i])
            .collect();
        if idx.len() < PAIR_MIN_COUNT {
            warn!(
                first = j,
                second = k,
                shared = idx.len(),
                "too few shared objects; leaving correlation at zero"
            );
            return Ok(());
        }

        let residual = |c: usize| -> Result<(Vec<f64>, Vec<f64>), CalibError> {
            let curves = &self.table.colors[c];
            let p = DiagonalParams {
                mean: curves.mean.clone(),
                slope: curves.slope.clone(),
                scatter: self.table.sigma[c][c].clone(),
            };
            let model = self.model_color(c, &p)?;
            let scatter = CubicSpline::new(&self.grids.covmat, &p.scatter)?;
            let d = idx
                .iter()
                .map(|&i| self.colors[c][i] - model[i] - self.lupcorr[c][i])
                .collect();
            let s = idx
                .iter()
                .map(|&i| scatter.eval(self.gals.z[i]).max(SCATTER_FLOOR))
                .collect();
            Ok((d, s))
        };
        let (d1, s1) = residual(j)?;
        let (d2, s2) = residual(k)?;

        let z = gather(&self.gals.z, &idx);
        let n11 = gather(&self.gals.color_noise_cov(j, j), &idx);
        let n22 = gather(&self.gals.color_noise_cov(k, k), &idx);
        let n12 = gather(&self.gals.color_noise_cov(j, k), &idx);
        let prob = gather(&self.probs, &idx);
        let bkg = self.background.off_diagonal(
            j,
            k,
            &gather(&self.colors[j], &idx),
            &gather(&self.colors[k], &idx),
            &gather(&self.gals.refmag, &idx),
        )?;

        let fitter = OffDiagonalFitter::new(
            &self.grids.covmat,
            OffDiagonalObservations {
                z: &z,
                d1: &d1,
                d2: &d2,
                s1: &s1,
                s2: &s2,
                noise11: &n11,
                noise22: &n22,
                noise12: &n12,
                prob: Some(&prob),
                bkg: Some(&bkg),
            },
            self.cfg.calib_covmat_prior,
        )?;
        let fit = fitter.fit(&vec![0.0; self.grids.covmat.len()], &self.cfg.simplex)?;
        info!(first = j, second = k, objects = idx.len(), cost = fit.cost, "off-diagonal fit done");

        self.table.sigma[j][k] = fit.r.clone();
        self.table.sigma[k][j] = fit.r;
        Ok(())
    }

    fn zreds(&self) -> Result<Vec<Zred>, CalibError> {
        let model = RedSequenceModel::from_table(&self.table, self.cfg.zred_binsize)?;
        let out = model.estimate_all(&self.gals);
        let bad = out.iter().filter(|z| !z.is_valid()).count();
        if bad > 0 {
            warn!(failed = bad, "zred estimation failed for some galaxies");
        }
        Ok(out)
    }

    fn corrections(&mut self, raw: &[Zred], mode: CorrectionMode) -> Result<(), CalibError> {
        let cfg = self.cfg;
        let valid: Vec<usize> = (0..raw.len()).filter(|&i| raw[i].is_valid()).collect();
        let z = gather(&self.gals.z, &valid);
        let zred: Vec<f64> = valid.iter().map(|&i| raw[i].zred).collect();
        let zred_e: Vec<f64> = valid.iter().map(|&i| raw[i].zred_e).collect();
        let lkhd: Vec<f64> = valid.iter().map(|&i| raw[i].lkhd).collect();

        if valid.len() < CORRECTION_MIN_COUNT {
            warn!(track = mode.label(), valid = valid.len(), "too few zreds; skipping correction");
            return Ok(());
        }
        let sel = select_training(
            &lkhd,
            &z,
            &zred,
            &zred_e,
            cfg.calib_corr_outlier_frac,
            cfg.calib_corr_nsig,
            cfg.calib_corr_lkhd_softening,
        )?;
        if sel.indices.len() < CORRECTION_MIN_COUNT {
            warn!(
                track = mode.label(),
                selected = sel.indices.len(),
                "too few training galaxies; skipping correction"
            );
            return Ok(());
        }

        let s = &sel.indices;
        let zs = gather(&z, s);
        let zreds = gather(&zred, s);
        let x = match mode {
            CorrectionMode::TrueRedshift => zs.clone(),
            CorrectionMode::DerivedRedshift => zreds.clone(),
        };
        let dz: Vec<f64> = zs.iter().zip(&zreds).map(|(a, b)| a - b).collect();
        let e = gather(&zred_e, s);
        let rows: Vec<usize> = s.iter().map(|&i| valid[i]).collect();
        let dmag = gather(&self.dmag, &rows);
        let prob = gather(&self.probs, &rows);

        let nodes = CorrectionNodes {
            offset: &self.grids.corr,
            slope: &self.grids.corr_slope,
        };
        let obs = CorrectionObservations {
            x: &x,
            dz: &dz,
            zred_e: &e,
            dmag: Some(&dmag),
            prob: &prob,
            weight: Some(&sel.weights),
        };
        let start = correction_start_values(nodes, &obs, MEDIAN_MIN_COUNT)?;
        let fit = CorrectionFitter::new(nodes, obs)?.fit_staged(&start, !cfg.calib_corr_nocorrslope, &cfg.simplex)?;
        info!(
            track = mode.label(),
            objects = s.len(),
            cost = fit.cost,
            converged = fit.converged,
            "correction fit done"
        );

        match mode {
            CorrectionMode::TrueRedshift => self.table.corr = fit.params,
            CorrectionMode::DerivedRedshift => self.table.corr2 = fit.params,
        }
        Ok(())
    }

    fn corrected(&self, raw: &[Zred]) -> Result<Vec<ZredRow>, CalibError> {
        let t = &self.table;
        let model = RedSequenceModel::from_table(t, self.cfg.zred_binsize)?;
        let c1 = ZredCorrection::new(&t.corr_z, &t.corr_slope_z, &t.corr)?;
        let c2 = ZredCorrection::new(&t.corr_z, &t.corr_slope_z, &t.corr2)?;
        Ok(raw
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let refmag = self.gals.refmag[i];
                let dmag = refmag - model.pivotmag(r.zred);
                let a = c1.apply(r, dmag);
                let b = c2.apply(r, dmag);
                ZredRow {
                    z: self.gals.z[i],
                    refmag,
                    zred_uncorr: r.zred,
                    zred_uncorr_e: r.zred_e,
                    zred: a.zred,
                    zred_e: a.zred_e,
                    zred2: b.zred,
                    zred2_e: b.zred_e,
                    lkhd: r.lkhd,
                    chisq: r.chisq,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::{ConstantBackground, FieldBackground};
    use crate::data::sample::{SimulationConfig, simulate};
    use crate::math::luptitude::{DEFAULT_LUP_ZEROPOINT, LuptitudeConfig};

    fn small_sim() -> SimulationConfig {
        SimulationConfig {
            n_members: 1500,
            n_field: 300,
            ..SimulationConfig::default()
        }
    }

    fn config() -> CalibConfig {
        CalibConfig::for_bands(4, 2)
    }

    #[test]
    fn recovers_the_simulated_sequence() {
        let sim = small_sim();
        let sample = simulate(&sim).unwrap();
        let bkg = FieldBackground::estimate(&sample, &sample.pmem, 0.5).unwrap();
        let cfg = config();
        let out = Calibrator::new(&cfg, &bkg).unwrap().run(&sample).unwrap();

        let t = &out.table;
        for j in 0..3 {
            let c = &t.colors[j];
            for i in 1..c.mean_z.len() - 1 {
                let truth = sim.true_color(j, c.mean_z[i]);
                assert!(
                    (c.mean[i] - truth).abs() < 0.05,
                    "color {j} node {i}: {} vs {truth}",
                    c.mean[i]
                );
            }
            for i in 1..t.covmat_z.len() - 1 {
                let s = t.scatter(j)[i];
                assert!((s - 0.05).abs() < 0.03, "color {j} scatter {s}");
            }
        }
        for (i, &p) in t.pivotmag.iter().enumerate() {
            assert!((p - sim.pivotmag(t.pivotmag_z[i])).abs() < 0.5);
        }
        assert!(t.volume_factor.iter().all(|v| v.is_finite() && *v > 0.0));

        assert_eq!(out.zreds.len(), out.sample.len());
        let mut dz: Vec<f64> = out
            .zreds
            .iter()
            .zip(&out.sample.pmem)
            .filter(|(_, p)| **p > 0.75)
            .map(|(r, _)| (r.zred - r.z).abs())
            .collect();
        dz.sort_by(f64::total_cmp);
        assert!(dz[dz.len() / 2] < 0.04, "median |zred - z| = {}", dz[dz.len() / 2]);
        assert!(out.timings.iter().any(|t| t.stage == "correction fit"));
    }

    #[test]
    fn checkpoint_sees_the_model_before_corrections() {
        let sample = simulate(&SimulationConfig {
            n_members: 600,
            n_field: 0,
            ..SimulationConfig::default()
        })
        .unwrap();
        let cfg = config();
        let bkg = ConstantBackground { density: 0.05 };
        let mut seen = 0;
        let out = Calibrator::new(&cfg, &bkg)
            .unwrap()
            .run_with_checkpoint(&sample, |t| {
                seen += 1;
                assert!(t.scatter(0).iter().all(|s| *s > 0.0));
                assert!(t.corr.offset.iter().all(|o| *o == 0.0));
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, 1);
        assert_eq!(out.table.sigma[0][1], out.table.sigma[1][0]);
    }

    #[test]
    fn checkpoint_failure_is_fatal() {
        let sample = simulate(&SimulationConfig {
            n_members: 300,
            n_field: 0,
            ..SimulationConfig::default()
        })
        .unwrap();
        let cfg = config();
        let bkg = ConstantBackground { density: 0.05 };
        let err = Calibrator::new(&cfg, &bkg)
            .unwrap()
            .run_with_checkpoint(&sample, |_| Err(CalibError::config("disk full")))
            .unwrap_err();
        assert!(matches!(err, CalibError::Stage { stage: "checkpoint", .. }));
    }

    #[test]
    fn empty_selection_is_insufficient_data() {
        let mut sample = simulate(&SimulationConfig {
            n_members: 50,
            n_field: 0,
            ..SimulationConfig::default()
        })
        .unwrap();
        sample.pmem = vec![0.1; sample.len()];
        let cfg = config();
        let bkg = ConstantBackground { density: 0.05 };
        let err = Calibrator::new(&cfg, &bkg).unwrap().run(&sample).unwrap_err();
        assert!(matches!(err, CalibError::Stage { stage: "filter", .. }));
        assert!(matches!(err.root(), CalibError::InsufficientData(_)));
    }

    #[test]
    fn band_count_must_match() {
        let sample = simulate(&SimulationConfig {
            n_members: 50,
            n_field: 0,
            ..SimulationConfig::default()
        })
        .unwrap();
        let cfg = CalibConfig::for_bands(5, 2);
        let bkg = ConstantBackground { density: 0.05 };
        let err = Calibrator::new(&cfg, &bkg).unwrap().run(&sample).unwrap_err();
        assert!(matches!(err.root(), CalibError::Configuration(_)));
    }

    #[test]
    fn luptitude_chain_runs_outward() {
        let sample = simulate(&SimulationConfig {
            n_members: 600,
            n_field: 0,
            ..SimulationConfig::default()
        })
        .unwrap();
        let mut cfg = config();
        cfg.lupcorr = Some(LuptitudeConfig {
            b: vec![1.4e-10, 0.9e-10, 1.2e-10, 1.8e-10],
            zeropoint: DEFAULT_LUP_ZEROPOINT,
        });
        cfg.scatter_seed = ScatterSeed::Mixture;
        let bkg = ConstantBackground { density: 0.05 };
        let out = Calibrator::new(&cfg, &bkg).unwrap().run(&sample).unwrap();
        assert_eq!(out.table.lupcorr_b.len(), 4);
        let order: Vec<usize> = out
            .timings
            .iter()
            .filter(|t| t.stage == "diagonal fit")
            .filter_map(|t| match t.band {
                StageBand::Color(j) => Some(j),
                _ => None,
            })
            .collect();
        assert_eq!(order, vec![2, 1, 0]);
        assert!(out.table.colors.iter().all(|c| c.mean.iter().all(|m| m.is_finite())));
    }
}
