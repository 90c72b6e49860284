//! Formatted terminal output for calibration runs and saved parameter files.
//!
//! Formatting lives here so the fitting code never builds strings.

use crate::calib::calibrator::{CalibrationOutput, StageTiming};
use crate::domain::params::ParameterTable;
use crate::report::{ZredStats, zred_stats};

/// Node-by-node summary of a parameter table.
pub fn format_table_summary(t: &ParameterTable) -> String {
    let mut out = String::new();
    out.push_str("=== rscal - red-sequence parameters ===\n");
    out.push_str(&format!(
        "Colors: {} | reference band: {} | z=[{:.3}, {:.3}]\n",
        t.ncol, t.ref_ind, t.zrange[0], t.zrange[1]
    ));
    if !t.lupcorr_b.is_empty() {
        out.push_str(&format!("Luptitude b: {}\n", fmt_vec(&t.lupcorr_b, 3)));
    }

    out.push_str("\nPivot magnitude:\n");
    out.push_str(&node_table(&t.pivotmag_z, &[("pivotmag", t.pivotmag.as_slice())]));

    for (j, c) in t.colors.iter().enumerate() {
        out.push_str(&format!("\nColor {j:02} mean:\n"));
        out.push_str(&node_table(&c.mean_z, &[("mean", c.mean.as_slice())]));
        out.push_str(&format!("Color {j:02} slope: {}\n", fmt_vec(&c.slope, 4)));
    }

    out.push_str("\nIntrinsic scatter:\n");
    let scatter: Vec<(String, &[f64])> = (0..t.ncol).map(|j| (format!("sigma{j:02}"), t.scatter(j))).collect();
    let cols: Vec<(&str, &[f64])> = scatter.iter().map(|(n, v)| (n.as_str(), *v)).collect();
    out.push_str(&node_table(&t.covmat_z, &cols));

    if t.ncol > 1 {
        out.push_str("\nCorrelations (mean over nodes):\n");
        for j in 0..t.ncol {
            for k in j + 1..t.ncol {
                let r = t.correlation(j, k);
                let mean = r.iter().sum::<f64>() / r.len().max(1) as f64;
                out.push_str(&format!("  r({j:02},{k:02}) = {mean:+.3}\n"));
            }
        }
    }

    out.push_str("\nCorrections:\n");
    for (label, c) in [("zred ", &t.corr), ("zred2", &t.corr2)] {
        out.push_str(&format!("  {label} offset {}\n", fmt_vec(&c.offset, 4)));
        out.push_str(&format!("  {label} r      {}\n", fmt_vec(&c.r, 3)));
    }
    out
}

/// Summary printed after `calibrate`.
pub fn format_run_summary(run: &CalibrationOutput) -> String {
    let mut out = format_table_summary(&run.table);
    out.push_str(&format!("\nGalaxies used: {}\n", run.sample.len()));

    let tracks: [(&str, Option<ZredStats>); 3] = [
        ("raw  ", zred_stats(&run.zreds, |r| (r.zred_uncorr, r.zred_uncorr_e))),
        ("zred ", zred_stats(&run.zreds, |r| (r.zred, r.zred_e))),
        ("zred2", zred_stats(&run.zreds, |r| (r.zred2, r.zred2_e))),
    ];
    out.push_str("zred vs z:\n");
    for (label, stats) in tracks {
        match stats {
            Some(s) => out.push_str(&format!(
                "  {label} n={} bias={:+.4} scatter={:.4} outliers={:.1}%\n",
                s.n,
                s.bias,
                s.scatter,
                100.0 * s.outlier_frac
            )),
            None => out.push_str(&format!("  {label} (no valid zreds)\n")),
        }
    }
    out.push_str(&format_timings(&run.timings));
    out
}

pub fn format_timings(timings: &[StageTiming]) -> String {
    let mut out = String::from("\nStage timings:\n");
    for t in timings {
        let band = t.band.label().map(|b| format!(" [{b}]")).unwrap_or_default();
        out.push_str(&format!("  {:<18}{:<8} {:>8.3}s\n", t.stage, band, t.seconds));
    }
    out
}

fn node_table(z: &[f64], cols: &[(&str, &[f64])]) -> String {
    let mut out = format!("{:>8}", "z");
    for (name, _) in cols {
        out.push_str(&format!(" {name:>10}"));
    }
    out.push('\n');
    for (i, zi) in z.iter().enumerate() {
        out.push_str(&format!("{zi:>8.3}"));
        for (_, v) in cols {
            match v.get(i) {
                Some(x) => out.push_str(&format!(" {x:>10.4}")),
                None => out.push_str(&format!(" {:>10}", "-")),
            }
        }
        out.push('\n');
    }
    out
}

fn fmt_vec(v: &[f64], digits: usize) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.digits$}")).collect();
    format!("[{}]", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::CalibConfig;
    use crate::domain::params::NodeGrids;

    #[test]
    fn summary_lists_every_color() {
        let cfg = CalibConfig::for_bands(4, 2);
        let grids = NodeGrids::from_config(&cfg).unwrap();
        let t = ParameterTable::new(&cfg, &grids);
        let text = format_table_summary(&t);
        for label in ["Color 00 mean", "Color 02 slope", "sigma01", "r(00,02)", "zred2 offset"] {
            assert!(text.contains(label), "missing {label}\n{text}");
        }
    }

    #[test]
    fn node_table_marks_missing_values() {
        let text = node_table(&[0.1, 0.2], &[("a", &[1.0][..])]);
        assert!(text.lines().nth(2).unwrap().ends_with('-'));
    }

    #[test]
    fn vectors_use_requested_precision() {
        assert_eq!(fmt_vec(&[0.5, 1.25], 2), "[0.50, 1.25]");
    }
}
