//! One load action: images, then detections, then tracks.
//!
//! Each artifact kind is processed over its list of paths in order and every
//! finished layer is handed to the viewer immediately. A failing path aborts
//! the load; layers added before it stay in the viewer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use log::{info, warn};
use ndarray::Axis;

use crate::config::LoaderConfig;
use crate::core::loaders::{load_detections, load_tracks};
use crate::core::transforms::AxisTransform;
use crate::processors::detections::build_detection_array;
use crate::processors::image_stack::assemble_stack;
use crate::processors::tracks::{build_track_array, random_id_property};
use crate::viewer::{ImageLayer, Marker, PointStyle, PointsLayer, StatusReporter, TracksLayer, Viewer};

/// Name of the per-vertex shuffled-id property of track layers.
pub const RANDOM_ID_PROPERTY: &str = "random_id";

/// Inputs of one load action. Any list may be empty.
#[derive(Debug, Clone, Default)]
pub struct LoadRequest {
    pub image_dirs: Vec<PathBuf>,
    pub detection_files: Vec<PathBuf>,
    pub track_files: Vec<PathBuf>,
}

impl LoadRequest {
    pub fn is_empty(&self) -> bool {
        self.image_dirs.is_empty() && self.detection_files.is_empty() && self.track_files.is_empty()
    }
}

/// Layer names registered by a load action, per kind.
#[derive(Debug, Clone, Default)]
pub struct LoadSummary {
    pub images: Vec<String>,
    pub detections: Vec<String>,
    pub tracks: Vec<String>,
    /// Inputs that held nothing to show.
    pub skipped: Vec<PathBuf>,
}

impl LoadSummary {
    pub fn layer_count(&self) -> usize {
        self.images.len() + self.detections.len() + self.tracks.len()
    }
}

/// Display name of an image stack loaded from `dir`.
fn image_layer_name(prefix: &str, dir: &Path) -> String {
    let base = dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string());
    format!("{} {}", prefix, base)
}

/// Load one image directory as a `(T, ...spatial)` layer.
///
/// Returns `None` after a notice when the directory has no matching files.
pub fn load_image(
    dir: &Path,
    config: &LoaderConfig,
    viewer: &mut dyn Viewer,
    status: &dyn StatusReporter,
) -> Result<Option<String>> {
    let stack = assemble_stack(dir, &config.image, status)
        .with_context(|| format!("Failed to load images from {}", dir.display()))?;

    if stack.len_of(Axis(0)) == 0 {
        status.notice(&format!("No .{} images found in {}", config.image.extension, dir.display()));
        return Ok(None);
    }

    let name = viewer.add_image(ImageLayer {
        name: image_layer_name(&config.image.name_prefix, dir),
        data: stack,
        source: Some(dir.to_path_buf()),
    });
    Ok(Some(name))
}

/// Load one detections file as a points layer.
///
/// The coordinate transform is applied in the same `(t, [z], y, x)` order as
/// for tracks, so both layers stay registered.
pub fn load_detection_file(
    path: &Path,
    config: &LoaderConfig,
    viewer: &mut dyn Viewer,
    status: &dyn StatusReporter,
) -> Result<Option<String>> {
    let records = load_detections(path)
        .with_context(|| format!("Failed to read detections from {}", path.display()))?;

    let points = build_detection_array(&records, config.coordinates.ndim, status)
        .with_context(|| format!("Invalid detections in {}", path.display()))?;

    let Some(points) = points else {
        status.notice(&format!("No detections found in {}", path.display()));
        return Ok(None);
    };

    let transform = AxisTransform::from_config(&config.coordinates);
    let points = transform
        .apply(points.view())
        .with_context(|| format!("Failed to transform detections from {}", path.display()))?;

    let name = viewer.add_points(PointsLayer {
        name: config.detections.name.clone(),
        data: points,
        style: PointStyle {
            marker: Marker::Ring,
            edge_color: config.detections.edge_color,
            face_color: None,
            size: config.detections.point_size,
        },
    });
    Ok(Some(name))
}

/// Load one tracks file as a tracks layer colored by a shuffled track id.
pub fn load_track_file(
    path: &Path,
    config: &LoaderConfig,
    viewer: &mut dyn Viewer,
    status: &dyn StatusReporter,
) -> Result<Option<String>> {
    let tracks = load_tracks(path).with_context(|| format!("Failed to read tracks from {}", path.display()))?;

    let transform = AxisTransform::from_config(&config.coordinates);
    let vertices = build_track_array(&tracks, config.coordinates.ndim, &transform, status)
        .with_context(|| format!("Invalid tracks in {}", path.display()))?;

    let Some(vertices) = vertices else {
        status.notice(&format!("No tracks found in {}", path.display()));
        return Ok(None);
    };

    let mut properties = HashMap::new();
    properties.insert(RANDOM_ID_PROPERTY.to_string(), random_id_property(vertices.view()));

    let name = viewer.add_tracks(TracksLayer {
        name: config.tracks.name.clone(),
        data: vertices,
        blending: config.tracks.blending,
        tail_length: config.tracks.tail_length,
        properties,
        color_by: Some(RANDOM_ID_PROPERTY.to_string()),
    });
    Ok(Some(name))
}

fn load_sequence(
    request: &LoadRequest,
    config: &LoaderConfig,
    viewer: &mut dyn Viewer,
    status: &dyn StatusReporter,
) -> Result<LoadSummary> {
    let mut summary = LoadSummary::default();

    for dir in &request.image_dirs {
        match load_image(dir, config, viewer, status)? {
            Some(name) => summary.images.push(name),
            None => summary.skipped.push(dir.clone()),
        }
    }

    for path in &request.detection_files {
        match load_detection_file(path, config, viewer, status)? {
            Some(name) => summary.detections.push(name),
            None => summary.skipped.push(path.clone()),
        }
    }

    for path in &request.track_files {
        match load_track_file(path, config, viewer, status)? {
            Some(name) => summary.tracks.push(name),
            None => summary.skipped.push(path.clone()),
        }
    }

    Ok(summary)
}

/// Run one load action.
///
/// The status sink is marked busy for the duration of the call and released
/// again whether or not the load succeeds.
///
/// # Errors
///
/// Returns the first failing input with its path in the error context.
pub fn load_all(
    request: &LoadRequest,
    config: &LoaderConfig,
    viewer: &mut dyn Viewer,
    status: &dyn StatusReporter,
) -> Result<LoadSummary> {
    let start = Instant::now();
    status.set_busy(true);
    let result = load_sequence(request, config, viewer, status);
    status.set_busy(false);

    match &result {
        Ok(summary) => info!(
            "Loaded {} layers ({} skipped) in {:.2?}",
            summary.layer_count(),
            summary.skipped.len(),
            start.elapsed()
        ),
        Err(e) => warn!("Load aborted: {:#}", e),
    }

    result
}
