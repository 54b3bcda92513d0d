//! CSV export of dense detection and track arrays.
//!
//! - Detection points: `frame,[z],y,x`
//! - Track vertices: `track_id,t,[z],y,x[,random_id]`

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use ndarray::{ArrayView1, ArrayView2};
use thiserror::Error;

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to flush data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },

    /// Array has a column count no header exists for.
    #[error("cannot export array with {found} columns, expected {expected}")]
    ColumnCount { expected: String, found: usize },

    /// Mismatched array lengths.
    #[error("array length mismatch: data has {rows} rows, property has {property_len} elements")]
    LengthMismatch { rows: usize, property_len: usize },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

fn create_csv_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    ensure_parent_dirs(path)?;
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(csv::Writer::from_writer(BufWriter::new(file)))
}

/// Leading index columns are written as integers, coordinates with 6 decimals.
fn format_row(row: ArrayView1<'_, f32>, index_columns: usize) -> Vec<String> {
    row.iter()
        .enumerate()
        .map(|(i, v)| {
            if i < index_columns {
                format!("{}", v.round() as i64)
            } else {
                format!("{:.6}", v)
            }
        })
        .collect()
}

fn write_rows(
    path: &Path,
    header: &[&str],
    data: ArrayView2<'_, f32>,
    index_columns: usize,
    extra: Option<ArrayView1<'_, f32>>,
) -> Result<()> {
    let mut csv_writer = create_csv_writer(path)?;
    let path_str = path.display().to_string();

    csv_writer
        .write_record(header)
        .map_err(|e| WriteError::CsvError {
            path: path_str.clone(),
            source: e,
        })?;

    for (i, row) in data.rows().into_iter().enumerate() {
        let mut record = format_row(row, index_columns);
        if let Some(extra) = &extra {
            record.push(format!("{}", extra[i].round() as i64));
        }
        csv_writer
            .write_record(&record)
            .map_err(|e| WriteError::CsvError {
                path: path_str.clone(),
                source: e,
            })?;
    }

    csv_writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })?;

    Ok(())
}

/// Write a detection point array `(N, 1 + D)` to CSV.
///
/// # Arguments
///
/// * `path` - Output file path (parent directories will be created if needed)
/// * `points` - Rows of `(frame, [z], y, x)`
///
/// # Errors
///
/// Returns an error if:
/// - `points` does not have 3 or 4 columns
/// - Parent directories cannot be created
/// - File cannot be created or written to
pub fn write_points_csv(path: &Path, points: ArrayView2<'_, f32>) -> Result<()> {
    let header: &[&str] = match points.ncols() {
        3 => &["frame", "y", "x"],
        4 => &["frame", "z", "y", "x"],
        found => {
            return Err(WriteError::ColumnCount {
                expected: "3 or 4".to_string(),
                found,
            })
        }
    };

    write_rows(path, header, points, 1, None)
}

/// Write a track vertex array `(N, 2 + D)` to CSV, optionally with the
/// per-vertex random id as a trailing column.
///
/// # Errors
///
/// Returns an error if:
/// - `vertices` does not have 4 or 5 columns
/// - `random_id` is not one entry per vertex
/// - File cannot be created or written to
pub fn write_tracks_csv(
    path: &Path,
    vertices: ArrayView2<'_, f32>,
    random_id: Option<ArrayView1<'_, f32>>,
) -> Result<()> {
    let mut header: Vec<&str> = match vertices.ncols() {
        4 => vec!["track_id", "t", "y", "x"],
        5 => vec!["track_id", "t", "z", "y", "x"],
        found => {
            return Err(WriteError::ColumnCount {
                expected: "4 or 5".to_string(),
                found,
            })
        }
    };

    if let Some(ids) = &random_id {
        if ids.len() != vertices.nrows() {
            return Err(WriteError::LengthMismatch {
                rows: vertices.nrows(),
                property_len: ids.len(),
            });
        }
        header.push("random_id");
    }

    write_rows(path, &header, vertices, 1, random_id)
}
