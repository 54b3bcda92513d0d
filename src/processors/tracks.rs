//! Flattening of track objects into one dense vertex array, and the
//! randomized per-track key used to color tracks apart.

use std::collections::{BTreeSet, HashMap};

use log::{debug, warn};
use ndarray::{s, Array1, Array2, ArrayView2};
use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;

use crate::core::loaders::TrackObject;
use crate::core::transforms::{drop_incomplete_rows, AxisTransform, TransformError};
use crate::viewer::StatusReporter;

/// Errors that can occur while building the track array.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("track {track}: {source}")]
    Transform {
        /// 1-based track id
        track: usize,
        #[source]
        source: TransformError,
    },

    #[error("unsupported spatial dimensionality {0} (expected 2 or 3)")]
    Dimensionality(usize),
}

/// Result type for track operations.
pub type Result<T> = std::result::Result<T, TrackError>;

/// Infer spatial dimensionality from the first track: 2D if all of its z
/// values are exactly zero (or it has none), 3D otherwise.
pub fn infer_track_dims(tracks: &[TrackObject]) -> usize {
    match tracks.first() {
        Some(track) if !track.has_flat_z() => 3,
        _ => 2,
    }
}

/// Build the `(N, 2 + D)` vertex array.
///
/// Tracks get sequential ids starting at 1 in list order. Each track is
/// reduced to its complete timepoints, transformed, and written as one
/// contiguous block. Rows are counted before allocating, so the array holds
/// exactly the kept vertices regardless of the advisory `numFrames`.
///
/// # Arguments
///
/// * `tracks` - Track objects in file order
/// * `spatial_dims` - Explicit dimensionality; inferred from the first track if `None`
/// * `transform` - Axis convention and scale factors applied to `(t, [z], y, x)`
/// * `status` - Receives per-track progress
///
/// # Returns
///
/// `None` if there are no tracks, so no layer should be created.
pub fn build_track_array(
    tracks: &[TrackObject],
    spatial_dims: Option<usize>,
    transform: &AxisTransform,
    status: &dyn StatusReporter,
) -> Result<Option<Array2<f32>>> {
    if tracks.is_empty() {
        warn!("No tracks found");
        return Ok(None);
    }

    let ndim = spatial_dims.unwrap_or_else(|| infer_track_dims(tracks));
    if ndim != 2 && ndim != 3 {
        return Err(TrackError::Dimensionality(ndim));
    }

    let ntracks = tracks.len();
    let mut blocks: Vec<Array2<f32>> = Vec::with_capacity(ntracks);

    for (index, track) in tracks.iter().enumerate() {
        let track_id = index + 1;
        let block = drop_incomplete_rows(track, ndim)
            .and_then(|block| transform.apply(block.view()))
            .map_err(|source| TrackError::Transform {
                track: track_id,
                source,
            })?;

        if block.nrows() > track.num_frames {
            debug!(
                "track {} keeps {} vertices but declares numFrames={}",
                track_id,
                block.nrows(),
                track.num_frames
            );
        }

        blocks.push(block);
        status.progress("Loading tracks", track_id, ntracks);
    }

    let total: usize = blocks.iter().map(|b| b.nrows()).sum();
    let nominal: usize = tracks.iter().map(|t| t.num_frames).sum();
    let mut vertices = Array2::<f32>::zeros((total, 2 + ndim));

    let mut offset = 0;
    for (index, block) in blocks.iter().enumerate() {
        let rows = offset..offset + block.nrows();
        vertices.slice_mut(s![rows.clone(), 0]).fill((index + 1) as f32);
        vertices.slice_mut(s![rows, 1..]).assign(block);
        offset += block.nrows();
    }

    debug!(
        "{} tracks, {} kept vertices of {} nominal ({}D)",
        ntracks, total, nominal, ndim
    );

    Ok(Some(vertices))
}

/// Map every track id to a randomly permuted id drawn from `rng`.
///
/// The mapping is a bijection on the ids present in column 0, so every
/// vertex of a track receives the same key and distinct tracks stay distinct.
pub fn random_id_property_with<R: Rng + ?Sized>(
    vertices: ArrayView2<'_, f32>,
    rng: &mut R,
) -> Array1<f32> {
    let ids = vertices.column(0);

    let unique: Vec<i64> = ids
        .iter()
        .map(|&id| id as i64)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut shuffled = unique.clone();
    shuffled.shuffle(rng);

    let lookup: HashMap<i64, i64> = unique.into_iter().zip(shuffled).collect();

    ids.mapv(|id| lookup.get(&(id as i64)).map_or(id, |&mapped| mapped as f32))
}

/// Randomly permuted track-id key, freshly drawn on every call.
///
/// Only meant as a coloring key; it is not stable across loads.
pub fn random_id_property(vertices: ArrayView2<'_, f32>) -> Array1<f32> {
    random_id_property_with(vertices, &mut rand::thread_rng())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loaders::read_tracks;
    use crate::core::transforms::AxisConvention;
    use crate::viewer::NoStatus;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sample_tracks() -> Vec<TrackObject> {
        let json = r#"[
            {"t":[0,1,2],"x":[1.0,2.0,3.0],"y":[4.0,5.0,6.0],"z":[0,0,0],"numFrames":3},
            {"t":[5,6],"x":[7.0,null],"y":[8.0,9.0],"z":[0,0],"numFrames":2},
            {"t":[1,2,3,4],"x":[1.0,1.5,2.0,2.5],"y":[0.0,0.0,0.0,0.0],"z":[0,0,0,0],"numFrames":4}
        ]"#;
        read_tracks(json.as_bytes()).unwrap()
    }

    #[test]
    fn test_single_track_with_null() {
        let json = r#"[{"t":[0,1],"x":[1.0,null],"y":[2.0,5.0],"z":[0,0],"numFrames":2}]"#;
        let tracks = read_tracks(json.as_bytes()).unwrap();

        let vertices = build_track_array(&tracks, None, &AxisTransform::default(), &NoStatus)
            .unwrap()
            .unwrap();

        assert_eq!(vertices, array![[1.0f32, 0.0, 2.0, 1.0]]);
    }

    #[test]
    fn test_length_is_sum_of_kept_rows() {
        let tracks = sample_tracks();
        let vertices = build_track_array(&tracks, None, &AxisTransform::default(), &NoStatus)
            .unwrap()
            .unwrap();

        assert_eq!(vertices.shape(), &[8, 4]);
        let nominal: usize = tracks.iter().map(|t| t.num_frames).sum();
        assert!(vertices.nrows() < nominal);
    }

    #[test]
    fn test_ids_are_contiguous_and_start_at_one() {
        let tracks = sample_tracks();
        let vertices = build_track_array(&tracks, None, &AxisTransform::default(), &NoStatus)
            .unwrap()
            .unwrap();

        let ids: Vec<f32> = vertices.column(0).to_vec();
        assert_eq!(ids, vec![1.0, 1.0, 1.0, 2.0, 3.0, 3.0, 3.0, 3.0]);

        let times: Vec<f32> = vertices.column(1).to_vec();
        assert_eq!(times, vec![0.0, 1.0, 2.0, 5.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_3d_inferred_from_nonzero_z() {
        let json = r#"[{"t":[0,1],"x":[1.0,2.0],"y":[3.0,4.0],"z":[5.0,null],"numFrames":2}]"#;
        let tracks = read_tracks(json.as_bytes()).unwrap();

        assert_eq!(infer_track_dims(&tracks), 3);
        let vertices = build_track_array(&tracks, None, &AxisTransform::default(), &NoStatus)
            .unwrap()
            .unwrap();
        assert_eq!(vertices, array![[1.0f32, 0.0, 5.0, 3.0, 1.0]]);
    }

    #[test]
    fn test_transform_is_applied_per_track() {
        let json = r#"{"t":[2],"x":[1.0],"y":[2.0],"z":[3.0],"numFrames":1}"#;
        let tracks = read_tracks(json.as_bytes()).unwrap();
        let transform = AxisTransform {
            convention: AxisConvention::Xyz,
            rescale: Some(vec![1.0, 2.0, 2.0, 2.0]),
            scale: None,
        };

        let vertices = build_track_array(&tracks, None, &transform, &NoStatus)
            .unwrap()
            .unwrap();
        assert_eq!(vertices, array![[1.0f32, 2.0, 4.0, 6.0, 2.0]]);
    }

    #[test]
    fn test_bad_scale_length_names_the_track() {
        let tracks = sample_tracks();
        let transform = AxisTransform {
            convention: AxisConvention::Zyx,
            rescale: None,
            scale: Some(vec![1.0, 1.0]),
        };

        let result = build_track_array(&tracks, None, &transform, &NoStatus);
        assert!(matches!(result, Err(TrackError::Transform { track: 1, .. })));
    }

    #[test]
    fn test_empty_tracks_produce_no_array() {
        let result = build_track_array(&[], None, &AxisTransform::default(), &NoStatus).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_random_id_is_bijection_on_track_partition() {
        let tracks = sample_tracks();
        let vertices = build_track_array(&tracks, None, &AxisTransform::default(), &NoStatus)
            .unwrap()
            .unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let keys = random_id_property_with(vertices.view(), &mut rng);
        assert_eq!(keys.len(), vertices.nrows());

        let mut by_original: HashMap<i64, BTreeSet<i64>> = HashMap::new();
        let mut by_key: HashMap<i64, BTreeSet<i64>> = HashMap::new();
        for (id, key) in vertices.column(0).iter().zip(keys.iter()) {
            by_original.entry(*id as i64).or_default().insert(*key as i64);
            by_key.entry(*key as i64).or_default().insert(*id as i64);
        }

        assert_eq!(by_original.len(), by_key.len());
        assert!(by_original.values().all(|keys| keys.len() == 1));
        assert!(by_key.values().all(|ids| ids.len() == 1));

        let original_ids: BTreeSet<i64> = by_original.keys().copied().collect();
        let shuffled_ids: BTreeSet<i64> = by_key.keys().copied().collect();
        assert_eq!(original_ids, shuffled_ids);
    }

    #[test]
    fn test_random_id_thread_rng_keeps_cardinality() {
        let vertices = array![[1.0f32, 0.0, 0.0, 0.0], [1.0, 1.0, 0.0, 0.0], [4.0, 0.0, 1.0, 1.0]];
        let keys = random_id_property(vertices.view());

        assert_eq!(keys[0], keys[1]);
        assert_ne!(keys[0], keys[2]);
        let unique: BTreeSet<i64> = keys.iter().map(|&k| k as i64).collect();
        assert_eq!(unique, [1, 4].into_iter().collect());
    }
}
