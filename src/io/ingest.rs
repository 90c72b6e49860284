//! CSV ingest of galaxy catalogs.
//!
//! Turns a CSV with one galaxy per row into a columnar [`GalaxySample`].
//!
//! Schema (header names are case-insensitive):
//! - `z`, `pmem` (required)
//! - `mag_0 .. mag_{n-1}` and `mag_err_0 .. mag_err_{n-1}` (required, contiguous)
//! - `refmag` (optional; defaults to the reference band's magnitude)
//! - `pcol` (optional)
//!
//! Bad rows are skipped and reported; a missing column aborts with exit code 2.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use csv::StringRecord;

use crate::domain::galaxy::GalaxySample;
use crate::error::AppError;

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct IngestedCatalog {
    pub sample: GalaxySample,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
    pub rows_used: usize,
}

struct Columns {
    z: usize,
    pmem: usize,
    refmag: Option<usize>,
    pcol: Option<usize>,
    mag: Vec<usize>,
    mag_err: Vec<usize>,
}

struct GalaxyRow {
    z: f64,
    refmag: Option<f64>,
    mag: Vec<f64>,
    mag_err: Vec<f64>,
    pmem: f64,
    pcol: Option<f64>,
}

/// Load a galaxy catalog; `ref_ind` picks the band used when `refmag` is absent.
pub fn load_galaxies(path: &Path, ref_ind: usize) -> Result<IngestedCatalog, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open CSV '{}': {e}", path.display())))?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read CSV headers: {e}")))?
        .clone();
    let cols = resolve_columns(&build_header_map(&headers))?;
    if ref_ind >= cols.mag.len() {
        return Err(AppError::new(
            2,
            format!("Reference band {ref_ind} is not among the {} magnitude columns.", cols.mag.len()),
        ));
    }

    let nmag = cols.mag.len();
    let mut sample = GalaxySample {
        mag: vec![Vec::new(); nmag],
        mag_err: vec![Vec::new(); nmag],
        pcol: cols.pcol.map(|_| Vec::new()),
        ..GalaxySample::default()
    };
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // Header is line 1.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        match parse_row(&record, &cols) {
            Ok(row) => {
                sample.z.push(row.z);
                sample.refmag.push(row.refmag.unwrap_or(row.mag[ref_ind]));
                for b in 0..nmag {
                    sample.mag[b].push(row.mag[b]);
                    sample.mag_err[b].push(row.mag_err[b]);
                }
                sample.pmem.push(row.pmem);
                if let (Some(p), Some(v)) = (sample.pcol.as_mut(), row.pcol) {
                    p.push(v);
                }
            }
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    let rows_used = sample.len();
    if rows_used == 0 {
        return Err(AppError::new(3, "No valid galaxy rows in the catalog."));
    }
    sample.validate()?;

    Ok(IngestedCatalog {
        sample,
        row_errors,
        rows_read,
        rows_used,
    })
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Strip a UTF-8 BOM on the first header.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn resolve_columns(header_map: &HashMap<String, usize>) -> Result<Columns, AppError> {
    let required = |name: &str| {
        header_map
            .get(name)
            .copied()
            .ok_or_else(|| AppError::new(2, format!("Missing required column '{name}'.")))
    };

    let mut mag = Vec::new();
    let mut mag_err = Vec::new();
    while let Some(&m) = header_map.get(&format!("mag_{}", mag.len())) {
        let e = required(&format!("mag_err_{}", mag.len()))?;
        mag.push(m);
        mag_err.push(e);
    }
    if mag.len() < 2 {
        return Err(AppError::new(
            2,
            "Need at least two magnitude columns (mag_0, mag_1, ...) to form a color.",
        ));
    }

    Ok(Columns {
        z: required("z")?,
        pmem: required("pmem")?,
        refmag: header_map.get("refmag").copied(),
        pcol: header_map.get("pcol").copied(),
        mag,
        mag_err,
    })
}

fn parse_row(record: &StringRecord, cols: &Columns) -> Result<GalaxyRow, String> {
    let field = |idx: usize, name: &str| -> Result<f64, String> {
        let raw = record
            .get(idx)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| format!("missing value for '{name}'"))?;
        let v: f64 = raw
            .parse()
            .map_err(|_| format!("invalid number for '{name}': '{raw}'"))?;
        if v.is_finite() {
            Ok(v)
        } else {
            Err(format!("non-finite value for '{name}'"))
        }
    };
    let probability = |idx: usize, name: &str| -> Result<f64, String> {
        let p = field(idx, name)?;
        if (0.0..=1.0).contains(&p) {
            Ok(p)
        } else {
            Err(format!("'{name}' must lie in [0, 1], got {p}"))
        }
    };

    let mut mag = Vec::with_capacity(cols.mag.len());
    let mut mag_err = Vec::with_capacity(cols.mag.len());
    for (b, (&m, &e)) in cols.mag.iter().zip(&cols.mag_err).enumerate() {
        mag.push(field(m, &format!("mag_{b}"))?);
        let err = field(e, &format!("mag_err_{b}"))?;
        if err <= 0.0 {
            return Err(format!("'mag_err_{b}' must be positive, got {err}"));
        }
        mag_err.push(err);
    }

    Ok(GalaxyRow {
        z: field(cols.z, "z")?,
        refmag: cols.refmag.map(|i| field(i, "refmag")).transpose()?,
        mag,
        mag_err,
        pmem: probability(cols.pmem, "pmem")?,
        pcol: cols.pcol.map(|i| probability(i, "pcol")).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(text: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(text.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_rows_and_reports_bad_ones() {
        let f = write_csv(
            "Z,mag_0,mag_1,mag_err_0,mag_err_1,pmem,pcol\n\
             0.2,19.0,18.0,0.02,0.01,0.9,0.8\n\
             0.3,abc,18.0,0.02,0.01,0.9,0.8\n\
             0.25,19.5,18.4,0.02,0.01,1.5,0.8\n\
             0.4,20.0,18.8,0.03,0.02,0.6,0.5\n",
        );
        let cat = load_galaxies(f.path(), 1).unwrap();
        assert_eq!(cat.rows_read, 4);
        assert_eq!(cat.rows_used, 2);
        assert_eq!(cat.row_errors.len(), 2);
        assert_eq!(cat.row_errors[0].line, 3);
        assert_eq!(cat.sample.refmag, vec![18.0, 18.8]);
        assert_eq!(cat.sample.pcol.as_deref(), Some(&[0.8, 0.5][..]));
        assert_eq!(cat.sample.nmag(), 2);
    }

    #[test]
    fn explicit_refmag_wins() {
        let f = write_csv("z,refmag,mag_0,mag_1,mag_err_0,mag_err_1,pmem\n0.2,17.5,19.0,18.0,0.02,0.01,0.9\n");
        let cat = load_galaxies(f.path(), 1).unwrap();
        assert_eq!(cat.sample.refmag, vec![17.5]);
        assert!(cat.sample.pcol.is_none());
    }

    #[test]
    fn missing_error_column_is_a_schema_error() {
        let f = write_csv("z,mag_0,mag_1,mag_err_0,pmem\n0.2,19.0,18.0,0.02,0.9\n");
        let err = load_galaxies(f.path(), 0).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("mag_err_1"));
    }

    #[test]
    fn no_valid_rows_is_exit_code_3() {
        let f = write_csv("z,mag_0,mag_1,mag_err_0,mag_err_1,pmem\n0.2,19.0,18.0,0.0,0.01,0.9\n");
        let err = load_galaxies(f.path(), 0).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
