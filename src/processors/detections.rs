//! Flattening of per-frame detection records into one dense point array.

use log::{debug, warn};
use ndarray::{s, Array1, Array2};
use thiserror::Error;

use crate::core::loaders::{CoordEntry, DetectionRecord};
use crate::viewer::StatusReporter;

/// Errors that can occur while building the detection array.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("frame {frame}: '{axis}' has {found} entries, expected {expected}")]
    ShapeMismatch {
        frame: usize,
        axis: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("unsupported spatial dimensionality {0} (expected 2 or 3)")]
    Dimensionality(usize),
}

/// Result type for detection operations.
pub type Result<T> = std::result::Result<T, DetectionError>;

/// Infer spatial dimensionality from the first record's `zCoord`.
///
/// The result is assumed to hold for every frame of the file.
pub fn infer_detection_dims(records: &[DetectionRecord]) -> usize {
    match records.first() {
        Some(record) if record.is_3d() => 3,
        _ => 2,
    }
}

fn coord_values(entries: &[CoordEntry]) -> Array1<f32> {
    entries.iter().map(CoordEntry::value).collect()
}

/// Build the `(N, 1 + D)` detection array.
///
/// Column 0 holds the frame index (the record's position in the list) and the
/// remaining columns hold `(z, y, x)` or `(y, x)`. Frames are written as
/// contiguous blocks in list order.
///
/// # Arguments
///
/// * `records` - One record per frame
/// * `spatial_dims` - Explicit dimensionality; inferred from the first record if `None`
/// * `status` - Receives per-frame progress
///
/// # Returns
///
/// `None` if there are no records, so no layer should be created.
///
/// # Errors
///
/// Returns `ShapeMismatch` if any frame's coordinate lists differ in length.
pub fn build_detection_array(
    records: &[DetectionRecord],
    spatial_dims: Option<usize>,
    status: &dyn StatusReporter,
) -> Result<Option<Array2<f32>>> {
    if records.is_empty() {
        warn!("No detections found");
        return Ok(None);
    }

    let ndim = spatial_dims.unwrap_or_else(|| infer_detection_dims(records));
    if ndim != 2 && ndim != 3 {
        return Err(DetectionError::Dimensionality(ndim));
    }

    for (frame, record) in records.iter().enumerate() {
        let expected = record.x_coord.len();
        let mut axes = vec![("yCoord", record.y_coord.len())];
        if ndim == 3 {
            axes.push(("zCoord", record.z_coord.len()));
        }
        for (axis, found) in axes {
            if found != expected {
                return Err(DetectionError::ShapeMismatch {
                    frame,
                    axis,
                    expected,
                    found,
                });
            }
        }
    }

    let total: usize = records.iter().map(DetectionRecord::len).sum();
    let nframes = records.len();
    let mut points = Array2::<f32>::zeros((total, 1 + ndim));

    let mut offset = 0;
    for (frame, record) in records.iter().enumerate() {
        let count = record.len();
        let rows = offset..offset + count;

        points.slice_mut(s![rows.clone(), 0]).fill(frame as f32);
        if ndim == 3 {
            points.slice_mut(s![rows.clone(), 1]).assign(&coord_values(&record.z_coord));
        }
        points.slice_mut(s![rows.clone(), ndim - 1]).assign(&coord_values(&record.y_coord));
        points.slice_mut(s![rows, ndim]).assign(&coord_values(&record.x_coord));

        offset += count;
        status.progress("Loading detections", frame + 1, nframes);
    }

    debug!("{} detections over {} frames ({}D)", total, nframes, ndim);

    Ok(Some(points))
}
