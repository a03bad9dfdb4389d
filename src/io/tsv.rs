//! Tab-separated numeric matrices
//!
//! One row per line, no header, values in `%.18e` notation.

use std::path::Path;

use ndarray::{Array2, ArrayView2};

use crate::error::{Error, Result};

/// Write `matrix` as tab-delimited text.
pub fn write_tsv(path: &Path, matrix: ArrayView2<'_, f64>) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_path(path)?;

    for row in matrix.rows() {
        writer.write_record(row.iter().map(|v| format!("{:.18e}", v)))?;
    }
    writer.flush()?;
    log::debug!("wrote {}x{} matrix to {}", matrix.nrows(), matrix.ncols(), path.display());
    Ok(())
}

/// Read a tab-delimited numeric matrix; every row must have the same width.
pub fn read_tsv(path: &Path) -> Result<Array2<f64>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_path(path)?;

    let mut values = Vec::new();
    let mut n_rows = 0;
    let mut n_cols = None;
    for record in reader.records() {
        let record = record?;
        match n_cols {
            None => n_cols = Some(record.len()),
            Some(n) if n != record.len() => {
                return Err(Error::ShapeMismatch {
                    what: "tsv row width",
                    expected: vec![n],
                    found: vec![record.len()],
                })
            }
            Some(_) => {}
        }
        for field in record.iter() {
            let value = field.trim().parse::<f64>().map_err(|e| Error::InvalidParameter {
                name: "tsv",
                reason: format!("{}: {:?} is not a number", e, field),
            })?;
            values.push(value);
        }
        n_rows += 1;
    }

    let n_cols = n_cols.unwrap_or(0);
    Array2::from_shape_vec((n_rows, n_cols), values).map_err(|_| Error::ShapeMismatch {
        what: "tsv matrix",
        expected: vec![n_rows, n_cols],
        found: vec![n_rows * n_cols],
    })
}
