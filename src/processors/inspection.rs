//! Track inspection: resolve a clicked position to a track and sample every
//! loaded image along that track for intensity-vs-frame plotting.
//!
//! Uses a `kiddo` KD-tree over the vertices of the clicked frame. 2D vertices
//! are lifted into 3D with `z = 0` so one tree type serves both cases.

use kiddo::{ImmutableKdTree, SquaredEuclidean};
use log::debug;
use ndarray::{s, Array2, ArrayView2, Axis, IxDyn};
use thiserror::Error;

use crate::viewer::{ArtifactRegistry, ImageLayer};

/// Errors that can occur during track inspection.
#[derive(Error, Debug)]
pub enum InspectionError {
    #[error("no tracks layer with {0} spatial dimensions is loaded")]
    NoTracks(usize),

    #[error("position has {found} components, expected {expected} (t, [z], y, x)")]
    PositionDims { expected: usize, found: usize },

    #[error("pixel size has {found} components, expected {expected}")]
    PixelSize { expected: usize, found: usize },

    #[error("no track vertex within {tolerance} of the position in frame {frame}")]
    NoTrackNear { frame: i64, tolerance: f32 },

    #[error("track {0} does not exist")]
    UnknownTrack(usize),
}

/// Result type for inspection operations.
pub type Result<T> = std::result::Result<T, InspectionError>;

/// Intensities of one image layer sampled along a track.
#[derive(Debug, Clone, PartialEq)]
pub struct IntensityProfile {
    pub image_name: String,
    /// Frame of each sample.
    pub frames: Vec<f32>,
    /// `NaN` where the vertex falls outside the image.
    pub values: Vec<f32>,
}

/// Everything known about an inspected track.
#[derive(Debug, Clone)]
pub struct TrackProfile {
    pub track_id: usize,
    /// `(t, [z], y, x)` rows in temporal order.
    pub vertices: Array2<f32>,
    pub intensities: Vec<IntensityProfile>,
}

/// Spatial part of a vertex row lifted into 3D.
fn spatial_point(row: &[f32]) -> [f32; 3] {
    match row {
        [z, y, x] => [*z, *y, *x],
        [y, x] => [0.0, *y, *x],
        _ => [0.0; 3],
    }
}

/// Find the track whose vertex in the clicked frame is nearest to `position`.
///
/// # Arguments
///
/// * `tracks` - Track vertex array `(N, 2 + D)`
/// * `position` - Clicked `(t, [z], y, x)` position
/// * `tolerance` - Largest accepted spatial distance
///
/// # Errors
///
/// Returns `NoTrackNear` if the frame has no vertex within `tolerance`.
pub fn resolve_track_id(tracks: ArrayView2<'_, f32>, position: &[f32], tolerance: f32) -> Result<usize> {
    let spatial_dims = tracks.ncols().saturating_sub(2);
    if position.len() != 1 + spatial_dims {
        return Err(InspectionError::PositionDims {
            expected: 1 + spatial_dims,
            found: position.len(),
        });
    }

    let frame = position[0].round() as i64;
    let mut ids = Vec::new();
    let mut coords = Vec::new();
    for row in tracks.rows() {
        if row[1].round() as i64 == frame {
            ids.push(row[0] as usize);
            coords.push(spatial_point(&row.to_vec()[2..]));
        }
    }

    let not_found = InspectionError::NoTrackNear { frame, tolerance };
    if coords.is_empty() {
        return Err(not_found);
    }

    let tree: ImmutableKdTree<f32, 3> = ImmutableKdTree::new_from_slice(&coords);
    let query = spatial_point(&position[1..]);
    let nearest = tree.nearest_one::<SquaredEuclidean>(&query);

    if nearest.distance > tolerance * tolerance {
        return Err(not_found);
    }

    let track_id = ids[nearest.item as usize];
    debug!(
        "Resolved frame {} position {:?} to track {} (distance {})",
        frame,
        &position[1..],
        track_id,
        nearest.distance.sqrt()
    );
    Ok(track_id)
}

/// Rows `(t, [z], y, x)` of one track, sorted by time.
///
/// # Errors
///
/// Returns `UnknownTrack` if no vertex carries `track_id`.
pub fn extract_track(tracks: ArrayView2<'_, f32>, track_id: usize) -> Result<Array2<f32>> {
    let mut rows: Vec<usize> = tracks
        .rows()
        .into_iter()
        .enumerate()
        .filter(|(_, row)| row[0] as usize == track_id)
        .map(|(i, _)| i)
        .collect();

    if rows.is_empty() {
        return Err(InspectionError::UnknownTrack(track_id));
    }

    rows.sort_by(|&a, &b| tracks[[a, 1]].total_cmp(&tracks[[b, 1]]));
    let selected = tracks.select(Axis(0), &rows);
    Ok(selected.slice_move(s![.., 1..]))
}

/// Voxel index for one vertex, or `None` when it falls outside `shape`.
fn voxel_index(vertex: &[f32], pixel_size: &[f32], shape: &[usize]) -> Option<Vec<usize>> {
    let mut index = Vec::with_capacity(vertex.len());
    index.push(vertex[0].round());
    for (coord, size) in vertex[1..].iter().zip(pixel_size) {
        index.push((coord / size).round());
    }

    index
        .into_iter()
        .zip(shape)
        .map(|(i, &len)| (i >= 0.0 && (i as usize) < len).then_some(i as usize))
        .collect()
}

/// Look up each track vertex's intensity in every image of matching rank.
///
/// Coordinates are divided by `pixel_size` (one entry per spatial axis) and
/// rounded to the nearest voxel. Images whose rank is not `1 + D` are skipped.
///
/// # Errors
///
/// Returns `PixelSize` if `pixel_size` does not have one entry per spatial axis.
pub fn sample_intensities<'a, I>(
    track: ArrayView2<'_, f32>,
    images: I,
    pixel_size: &[f32],
) -> Result<Vec<IntensityProfile>>
where
    I: IntoIterator<Item = &'a ImageLayer>,
{
    let spatial_dims = track.ncols().saturating_sub(1);
    if pixel_size.len() != spatial_dims {
        return Err(InspectionError::PixelSize {
            expected: spatial_dims,
            found: pixel_size.len(),
        });
    }

    let frames: Vec<f32> = track.column(0).to_vec();
    let mut profiles = Vec::new();

    for image in images {
        if image.data.ndim() != 1 + spatial_dims {
            debug!(
                "Skipping image '{}' of rank {} for a {}D track",
                image.name,
                image.data.ndim(),
                spatial_dims
            );
            continue;
        }

        let values = track
            .rows()
            .into_iter()
            .map(|vertex| {
                voxel_index(&vertex.to_vec(), pixel_size, image.data.shape())
                    .map_or(f32::NAN, |index| image.data[IxDyn(&index)])
            })
            .collect();

        profiles.push(IntensityProfile {
            image_name: image.name.clone(),
            frames: frames.clone(),
            values,
        });
    }

    Ok(profiles)
}

/// Resolve, extract, and sample the track under a clicked position.
///
/// Uses the first tracks layer whose dimensionality matches `position` and
/// samples every image layer of the registry. `pixel_size` defaults to 1 on
/// every spatial axis.
pub fn inspect_track(
    registry: &ArtifactRegistry,
    position: &[f32],
    tolerance: f32,
    pixel_size: Option<&[f32]>,
) -> Result<TrackProfile> {
    let spatial_dims = position.len().saturating_sub(1);
    let layer = registry
        .tracks()
        .find(|layer| layer.spatial_dims() == spatial_dims)
        .ok_or(InspectionError::NoTracks(spatial_dims))?;

    let track_id = resolve_track_id(layer.data.view(), position, tolerance)?;
    let vertices = extract_track(layer.data.view(), track_id)?;

    let unit = vec![1.0; spatial_dims];
    let pixel_size = pixel_size.unwrap_or(&unit);
    let intensities = sample_intensities(vertices.view(), registry.images(), pixel_size)?;

    Ok(TrackProfile {
        track_id,
        vertices,
        intensities,
    })
}
