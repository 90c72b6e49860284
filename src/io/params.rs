//! Read/write parameter-table JSON files.
//!
//! The file is a flat JSON object. Per-color curves use two-digit suffixes
//! (`z00`/`c00` for the mean, `zs00`/`slope00` for the slope); the header
//! carries `ncol`, `ref_ind`, the padded range `zrange0`/`zrange1` and one
//! `bvalue%d` (1-based) per band when luptitudes were used.
//!
//! `medcol`/`medcol_width` are stored node-major (`[pivot node][color]`);
//! `sigma` and `covmat_amp` are `[color][color][covariance node]`.

use std::fs::File;
use std::path::Path;

use serde_json::{Map, Value, json};

use crate::domain::params::{ColorCurves, ParameterTable};
use crate::error::AppError;
use crate::fit::correction::CorrectionParams;

/// `[a][b]` -> `[b][a]`; rows must share one length.
fn transpose(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let width = rows.first().map_or(0, Vec::len);
    (0..width).map(|i| rows.iter().map(|r| r[i]).collect()).collect()
}

fn correction_fields(out: &mut Map<String, Value>, prefix: &str, p: &CorrectionParams) {
    out.insert(prefix.to_string(), json!(p.offset));
    out.insert(format!("{prefix}_slope"), json!(p.slope));
    out.insert(format!("{prefix}_r"), json!(p.r));
    out.insert(format!("{prefix}_bkg"), json!(p.bkg));
}

/// Encode a table as the flat JSON object written to disk.
pub fn table_to_json(t: &ParameterTable) -> Value {
    let mut out = Map::new();
    let [z0, z1] = t.padded_zrange();
    out.insert("ncol".into(), json!(t.ncol));
    out.insert("ref_ind".into(), json!(t.ref_ind));
    out.insert("zrange0".into(), json!(z0));
    out.insert("zrange1".into(), json!(z1));
    out.insert("calib_zrange".into(), json!(t.zrange));
    for (b, v) in t.lupcorr_b.iter().enumerate() {
        out.insert(format!("bvalue{}", b + 1), json!(v));
    }

    out.insert("pivotmag_z".into(), json!(t.pivotmag_z));
    out.insert("pivotmag".into(), json!(t.pivotmag));
    out.insert("medcol".into(), json!(transpose(&t.medcol)));
    out.insert("medcol_width".into(), json!(transpose(&t.medcol_width)));

    for (j, c) in t.colors.iter().enumerate() {
        out.insert(format!("z{j:02}"), json!(c.mean_z));
        out.insert(format!("c{j:02}"), json!(c.mean));
        out.insert(format!("zs{j:02}"), json!(c.slope_z));
        out.insert(format!("slope{j:02}"), json!(c.slope));
    }

    out.insert("covmat_z".into(), json!(t.covmat_z));
    out.insert("sigma".into(), json!(t.sigma));
    out.insert("covmat_amp".into(), json!(t.covmat_amp()));
    out.insert("corr_z".into(), json!(t.corr_z));
    out.insert("corr_slope_z".into(), json!(t.corr_slope_z));
    correction_fields(&mut out, "corr", &t.corr);
    correction_fields(&mut out, "corr2", &t.corr2);
    out.insert("volume_factor_z".into(), json!(t.volume_factor_z));
    out.insert("volume_factor".into(), json!(t.volume_factor));
    Value::Object(out)
}

pub fn write_params_json(path: &Path, table: &ParameterTable) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create parameter file '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, &table_to_json(table))
        .map_err(|e| AppError::new(2, format!("Failed to write parameter file: {e}")))?;
    Ok(())
}

pub fn read_params_json(path: &Path) -> Result<ParameterTable, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open parameter file '{}': {e}", path.display())))?;
    let value: Value =
        serde_json::from_reader(file).map_err(|e| AppError::new(2, format!("Invalid parameter JSON: {e}")))?;
    table_from_json(&value)
}

/// Decode a table; every field written by [`table_to_json`] is required.
pub fn table_from_json(value: &Value) -> Result<ParameterTable, AppError> {
    let obj = value
        .as_object()
        .ok_or_else(|| AppError::new(2, "Parameter file must be a JSON object."))?;
    let field = |key: &str| -> Result<Value, AppError> {
        obj.get(key)
            .cloned()
            .ok_or_else(|| AppError::new(2, format!("Parameter file is missing '{key}'.")))
    };
    fn decode<T: serde::de::DeserializeOwned>(key: &str, v: Value) -> Result<T, AppError> {
        serde_json::from_value(v).map_err(|e| AppError::new(2, format!("Bad '{key}' in parameter file: {e}")))
    }
    let get = |key: &str| -> Result<Vec<f64>, AppError> { decode(key, field(key)?) };
    let correction = |prefix: &str| -> Result<CorrectionParams, AppError> {
        Ok(CorrectionParams {
            offset: get(prefix)?,
            slope: get(&format!("{prefix}_slope"))?,
            r: get(&format!("{prefix}_r"))?,
            bkg: get(&format!("{prefix}_bkg"))?,
        })
    };

    let ncol: usize = decode("ncol", field("ncol")?)?;
    let colors = (0..ncol)
        .map(|j| {
            Ok(ColorCurves {
                mean_z: get(&format!("z{j:02}"))?,
                mean: get(&format!("c{j:02}"))?,
                slope_z: get(&format!("zs{j:02}"))?,
                slope: get(&format!("slope{j:02}"))?,
            })
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    let node_major = |key: &str| -> Result<Vec<Vec<f64>>, AppError> {
        let rows: Vec<Vec<f64>> = decode(key, field(key)?)?;
        if rows.iter().any(|r| r.len() != ncol) {
            return Err(AppError::new(2, format!("'{key}' rows must have {ncol} colors.")));
        }
        Ok(transpose(&rows))
    };

    let mut lupcorr_b = Vec::new();
    while let Some(v) = obj.get(&format!("bvalue{}", lupcorr_b.len() + 1)) {
        lupcorr_b.push(decode("bvalue", v.clone())?);
    }

    let table = ParameterTable {
        ncol,
        ref_ind: decode("ref_ind", field("ref_ind")?)?,
        zrange: decode("calib_zrange", field("calib_zrange")?)?,
        lupcorr_b,
        pivotmag_z: get("pivotmag_z")?,
        pivotmag: get("pivotmag")?,
        medcol: node_major("medcol")?,
        medcol_width: node_major("medcol_width")?,
        colors,
        covmat_z: get("covmat_z")?,
        sigma: decode("sigma", field("sigma")?)?,
        corr_z: get("corr_z")?,
        corr_slope_z: get("corr_slope_z")?,
        corr: correction("corr")?,
        corr2: correction("corr2")?,
        volume_factor_z: get("volume_factor_z")?,
        volume_factor: get("volume_factor")?,
    };
    check_shapes(&table)?;
    let amp: Vec<Vec<Vec<f64>>> = decode("covmat_amp", field("covmat_amp")?)?;
    if amp.len() != ncol
        || amp
            .iter()
            .any(|row| row.len() != ncol || row.iter().any(|a| a.len() != table.covmat_z.len()))
    {
        return Err(AppError::new(2, "Parameter file has inconsistent covariance amplitudes."));
    }
    Ok(table)
}

fn check_shapes(t: &ParameterTable) -> Result<(), AppError> {
    let bad = |what: &str| AppError::new(2, format!("Parameter file has inconsistent {what}."));
    if t.pivotmag.len() != t.pivotmag_z.len() {
        return Err(bad("pivot magnitudes"));
    }
    if t.medcol.len() != t.ncol
        || t.medcol_width.len() != t.ncol
        || t.medcol.iter().chain(&t.medcol_width).any(|m| m.len() != t.pivotmag_z.len())
    {
        return Err(bad("median colors"));
    }
    for c in &t.colors {
        if c.mean.len() != c.mean_z.len() || c.slope.len() != c.slope_z.len() {
            return Err(bad("color curves"));
        }
    }
    if t.sigma.len() != t.ncol
        || t.sigma
            .iter()
            .any(|row| row.len() != t.ncol || row.iter().any(|s| s.len() != t.covmat_z.len()))
    {
        return Err(bad("covariance nodes"));
    }
    for c in [&t.corr, &t.corr2] {
        if c.offset.len() != t.corr_z.len()
            || [&c.slope, &c.r, &c.bkg].iter().any(|v| v.len() != t.corr_slope_z.len())
        {
            return Err(bad("correction nodes"));
        }
    }
    if t.volume_factor.len() != t.volume_factor_z.len() {
        return Err(bad("volume factor"));
    }
    Ok(())
}
