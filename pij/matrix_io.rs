//! Headerless, tab-separated matrix files.
//!
//! One matrix row per line, one cell per tab-separated field. These are the
//! on-disk forms of the LLR, probability and genotype matrices used by the
//! command-line tool.

use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use ndarray::{Array2, ArrayView2};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatrixIoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error from the underlying CSV library: {0}")]
    Csv(#[from] csv::Error),
    #[error("Could not parse '{value}' at row {row}, column {col} as a {expected}.")]
    Parse {
        row: usize,
        col: usize,
        value: String,
        expected: &'static str,
    },
    #[error("Row {row} has {found} columns, but the first row has {expected}.")]
    Ragged {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("Matrix file '{}' contains no rows.", .0.display())]
    Empty(PathBuf),
    #[error("Matrix shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Reads a matrix of LLR (or probability) values.
pub fn read_matrix(path: &Path) -> Result<Array2<f64>, MatrixIoError> {
    read_cells(path, "number")
}

/// Reads a genotype matrix; cells must be small non-negative integers.
pub fn read_genotypes(path: &Path) -> Result<Array2<u8>, MatrixIoError> {
    read_cells(path, "genotype value (0-255)")
}

fn read_cells<T: FromStr>(
    path: &Path,
    expected: &'static str,
) -> Result<Array2<T>, MatrixIoError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)?;

    let mut cells = Vec::new();
    let mut ncol = None;
    let mut nrow = 0;
    let mut record = StringRecord::new();
    while reader.read_record(&mut record)? {
        let expected_cols = *ncol.get_or_insert(record.len());
        if record.len() != expected_cols {
            return Err(MatrixIoError::Ragged {
                row: nrow,
                expected: expected_cols,
                found: record.len(),
            });
        }
        for (col, field) in record.iter().enumerate() {
            let value = field.parse::<T>().map_err(|_| MatrixIoError::Parse {
                row: nrow,
                col,
                value: field.to_string(),
                expected,
            })?;
            cells.push(value);
        }
        nrow += 1;
    }

    let Some(ncol) = ncol else {
        return Err(MatrixIoError::Empty(path.to_path_buf()));
    };
    Ok(Array2::from_shape_vec((nrow, ncol), cells)?)
}

pub fn write_matrix(path: &Path, values: ArrayView2<f64>) -> Result<(), MatrixIoError> {
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_path(path)?;
    for row in values.rows() {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}
