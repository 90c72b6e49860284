//! CSV exports: per-galaxy zreds and synthetic catalogs.
//!
//! Catalog exports use the same schema `ingest` reads, so a simulated catalog
//! can be fed straight back into `calibrate`.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::calib::calibrator::ZredRow;
use crate::domain::galaxy::GalaxySample;
use crate::error::AppError;

/// Write one row per galaxy with raw and corrected zreds.
pub fn write_zreds_csv(path: &Path, rows: &[ZredRow]) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| AppError::new(2, format!("Failed to create zred CSV '{}': {e}", path.display())))?;
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| AppError::new(2, format!("Failed to write zred CSV row: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush zred CSV: {e}")))?;
    Ok(())
}

/// Write a catalog in the ingest schema.
pub fn write_catalog_csv(path: &Path, sample: &GalaxySample) -> Result<(), AppError> {
    let mut file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create catalog CSV '{}': {e}", path.display())))?;

    let nmag = sample.nmag();
    let mut header = vec!["z".to_string(), "refmag".to_string()];
    header.extend((0..nmag).map(|b| format!("mag_{b}")));
    header.extend((0..nmag).map(|b| format!("mag_err_{b}")));
    header.push("pmem".to_string());
    if sample.pcol.is_some() {
        header.push("pcol".to_string());
    }
    writeln!(file, "{}", header.join(","))
        .map_err(|e| AppError::new(2, format!("Failed to write catalog CSV header: {e}")))?;

    for i in 0..sample.len() {
        let mut fields = vec![format!("{:.6}", sample.z[i]), format!("{:.6}", sample.refmag[i])];
        fields.extend(sample.mag.iter().map(|m| format!("{:.6}", m[i])));
        fields.extend(sample.mag_err.iter().map(|e| format!("{:.6}", e[i])));
        fields.push(format!("{:.6}", sample.pmem[i]));
        if let Some(p) = &sample.pcol {
            fields.push(format!("{:.6}", p[i]));
        }
        writeln!(file, "{}", fields.join(","))
            .map_err(|e| AppError::new(2, format!("Failed to write catalog CSV row: {e}")))?;
    }
    Ok(())
}
