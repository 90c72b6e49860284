//! Debug bundle writer for inspecting a calibration run after the fact.

use std::fs::{File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::calib::calibrator::CalibrationOutput;
use crate::domain::config::CalibConfig;
use crate::error::AppError;
use crate::report::zred_stats;

/// Rows of the zred table written to the bundle.
const ZRED_PREVIEW_ROWS: usize = 25;

fn io_err(e: std::io::Error) -> AppError {
    AppError::new(4, format!("Failed to write debug bundle: {e}"))
}

/// Write `rscal_debug_<timestamp>.md` into `dir` and return its path.
pub fn write_debug_bundle(dir: &Path, config: &CalibConfig, run: &CalibrationOutput) -> Result<PathBuf, AppError> {
    create_dir_all(dir).map_err(|e| AppError::new(4, format!("Failed to create debug dir: {e}")))?;

    let ts = Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("rscal_debug_{ts}.md"));
    let mut file = File::create(&path).map_err(|e| AppError::new(4, format!("Failed to create debug file: {e}")))?;

    let t = &run.table;
    writeln!(file, "# rscal debug bundle").map_err(io_err)?;
    writeln!(file, "- generated: {}", Local::now().to_rfc3339()).map_err(io_err)?;
    writeln!(file, "- galaxies: {}", run.sample.len()).map_err(io_err)?;
    writeln!(file, "- colors: {} (reference band {})", t.ncol, t.ref_ind).map_err(io_err)?;
    writeln!(file, "- zrange: {:.3}..{:.3}", t.zrange[0], t.zrange[1]).map_err(io_err)?;

    writeln!(file, "\n## Configuration\n```json").map_err(io_err)?;
    let cfg_json = serde_json::to_string_pretty(config)
        .map_err(|e| AppError::new(4, format!("Failed to encode configuration: {e}")))?;
    writeln!(file, "{cfg_json}\n```").map_err(io_err)?;

    writeln!(file, "\n## Stage timings").map_err(io_err)?;
    writeln!(file, "| stage | color | seconds |\n| - | - | - |").map_err(io_err)?;
    for s in &run.timings {
        let band = s.band.label().unwrap_or_else(|| "-".into());
        writeln!(file, "| {} | {band} | {:.3} |", s.stage, s.seconds).map_err(io_err)?;
    }

    for (j, c) in t.colors.iter().enumerate() {
        writeln!(file, "\n## Color {j:02}").map_err(io_err)?;
        writeln!(file, "| z | mean |\n| - | - |").map_err(io_err)?;
        for (z, m) in c.mean_z.iter().zip(&c.mean) {
            writeln!(file, "| {z:.3} | {m:.5} |").map_err(io_err)?;
        }
        writeln!(file, "\n| z | scatter |\n| - | - |").map_err(io_err)?;
        for (z, s) in t.covmat_z.iter().zip(t.scatter(j)) {
            writeln!(file, "| {z:.3} | {s:.5} |").map_err(io_err)?;
        }
    }

    writeln!(file, "\n## Zreds").map_err(io_err)?;
    if let Some(s) = zred_stats(&run.zreds, |r| (r.zred, r.zred_e)) {
        writeln!(
            file,
            "- corrected: n={} bias={:+.4} scatter={:.4} outliers={:.3}",
            s.n, s.bias, s.scatter, s.outlier_frac
        )
        .map_err(io_err)?;
    }
    writeln!(file, "\n| z | zred_uncorr | zred | zred2 | lkhd | chisq |\n| - | - | - | - | - | - |").map_err(io_err)?;
    for r in run.zreds.iter().take(ZRED_PREVIEW_ROWS) {
        writeln!(
            file,
            "| {:.4} | {:.4} | {:.4} | {:.4} | {:.2} | {:.2} |",
            r.z, r.zred_uncorr, r.zred, r.zred2, r.lkhd, r.chisq
        )
        .map_err(io_err)?;
    }

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calib::calibrator::{CalibrationOutput, StageTiming, ZredRow};
    use crate::domain::galaxy::GalaxySample;
    use crate::domain::params::{NodeGrids, ParameterTable};
    use crate::error::StageBand;

    #[test]
    fn bundle_lists_stages_and_colors() {
        let cfg = CalibConfig::for_bands(3, 1);
        let grids = NodeGrids::from_config(&cfg).unwrap();
        let run = CalibrationOutput {
            table: ParameterTable::new(&cfg, &grids),
            sample: GalaxySample::default(),
            zreds: vec![ZredRow {
                z: 0.2,
                refmag: 18.0,
                zred_uncorr: 0.2,
                zred_uncorr_e: 0.01,
                zred: 0.2,
                zred_e: 0.01,
                zred2: 0.2,
                zred2_e: 0.01,
                lkhd: 1.0,
                chisq: 1.0,
            }],
            timings: vec![StageTiming {
                stage: "diagonal fit",
                band: StageBand::Color(1),
                seconds: 0.5,
            }],
        };
        let dir = tempfile::tempdir().unwrap();
        let path = write_debug_bundle(dir.path(), &cfg, &run).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("| diagonal fit | 01 |"));
        assert!(text.contains("## Color 01"));
        assert!(text.contains("calib_pcut"));
    }
}
