//! Intensity-vs-frame plots of inspected tracks.
//!
//! Draws one line per sampled image into a PNG using the plotters library.
//! No text is rendered, so no font backend is needed.

use std::path::Path;

use plotters::prelude::*;
use plotters_bitmap::BitMapBackend;
use thiserror::Error;

use crate::processors::inspection::TrackProfile;

/// Errors that can occur during visualization.
#[derive(Error, Debug)]
pub enum VisualizationError {
    #[error("Plotting error: {0}")]
    PlottingError(String),

    #[error("Track {0} has no finite intensity samples")]
    EmptyProfile(usize),
}

/// Result type for visualization operations.
pub type Result<T> = std::result::Result<T, VisualizationError>;

/// Default plot width in pixels.
const DEFAULT_WIDTH: u32 = 1280;

/// Default plot height in pixels.
const DEFAULT_HEIGHT: u32 = 720;

/// Line colors, cycled per image.
const SERIES_COLORS: &[(u8, u8, u8)] = &[
    (228, 26, 28),   // Red
    (55, 126, 184),  // Blue
    (77, 175, 74),   // Green
    (152, 78, 163),  // Purple
    (255, 127, 0),   // Orange
    (166, 86, 40),   // Brown
    (247, 129, 191), // Pink
    (153, 153, 153), // Gray
];

/// Finite `(frame, intensity)` samples of every series.
fn finite_points(profile: &TrackProfile) -> Vec<Vec<(f32, f32)>> {
    profile
        .intensities
        .iter()
        .map(|series| {
            series
                .frames
                .iter()
                .zip(&series.values)
                .filter(|(_, v)| v.is_finite())
                .map(|(&t, &v)| (t, v))
                .collect()
        })
        .collect()
}

/// Compute (x_min, x_max, y_min, y_max) over all series, padded 5%.
fn compute_bounds(series: &[Vec<(f32, f32)>]) -> (f32, f32, f32, f32) {
    let mut x_min = f32::MAX;
    let mut x_max = f32::MIN;
    let mut y_min = f32::MAX;
    let mut y_max = f32::MIN;

    for &(x, y) in series.iter().flatten() {
        x_min = x_min.min(x);
        x_max = x_max.max(x);
        y_min = y_min.min(y);
        y_max = y_max.max(y);
    }

    // Avoid a zero-width axis for single frames or flat profiles
    if x_max - x_min < f32::EPSILON {
        x_min -= 0.5;
        x_max += 0.5;
    }
    if y_max - y_min < f32::EPSILON {
        y_min -= 0.5;
        y_max += 0.5;
    }

    let x_padding = (x_max - x_min) * 0.05;
    let y_padding = (y_max - y_min) * 0.05;
    (x_min - x_padding, x_max + x_padding, y_min - y_padding, y_max + y_padding)
}

/// Plot intensity against frame for every image sampled along a track.
///
/// # Arguments
///
/// * `output_path` - Path to save the PNG image
/// * `profile` - Inspected track with one intensity series per image
///
/// # Errors
///
/// Returns `EmptyProfile` if no series has a finite sample.
pub fn plot_intensity_profile(output_path: &Path, profile: &TrackProfile) -> Result<()> {
    let series = finite_points(profile);
    if series.iter().all(Vec::is_empty) {
        return Err(VisualizationError::EmptyProfile(profile.track_id));
    }

    let (x_min, x_max, y_min, y_max) = compute_bounds(&series);

    let root = BitMapBackend::new(output_path, (DEFAULT_WIDTH, DEFAULT_HEIGHT)).into_drawing_area();

    root.fill(&WHITE).map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    for (i, points) in series.iter().enumerate() {
        let (r, g, b) = SERIES_COLORS[i % SERIES_COLORS.len()];
        let color = RGBColor(r, g, b);

        chart
            .draw_series(LineSeries::new(points.iter().copied(), color.stroke_width(2)))
            .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

        chart
            .draw_series(points.iter().map(|&(x, y)| Circle::new((x, y), 3, color.filled())))
            .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;
    }

    root.present().map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    Ok(())
}
