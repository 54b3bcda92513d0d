//! Coordinate transformations for detection and track data.
//!
//! This module provides the missing-value filter that turns a track object
//! into a dense coordinate block, and the axis reordering/rescaling applied
//! to blocks laid out as `(t, [z], y, x)`.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::loaders::TrackObject;
use crate::config::CoordinateConfig;

/// Errors that can occur during coordinate transforms.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("unknown axis convention '{0}' (expected zyx, xyz or xzy)")]
    UnknownConvention(String),

    #[error("{name} has {found} factors, expected {expected} (time plus spatial axes)")]
    FactorLength {
        name: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("unsupported spatial dimensionality {0} (expected 2 or 3)")]
    Dimensionality(usize),

    #[error("track is missing the '{0}' coordinate")]
    MissingAxis(&'static str),

    #[error("coordinate '{axis}' has {found} entries, expected {expected}")]
    LengthMismatch {
        axis: &'static str,
        expected: usize,
        found: usize,
    },
}

/// Result type for transform operations.
pub type Result<T> = std::result::Result<T, TransformError>;

/// Spatial axis order the tracker wrote its coordinates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisConvention {
    /// Canonical order; no permutation.
    #[default]
    Zyx,
    Xyz,
    Xzy,
}

impl AxisConvention {
    /// Column permutation over a `(t, [z], y, x)` block.
    ///
    /// Output column `j` is taken from input column `perm[j]`. In 2D there is
    /// no z axis to exchange, so every convention reduces to the identity.
    pub fn permutation(&self, spatial_dims: usize) -> Result<Vec<usize>> {
        match spatial_dims {
            2 => Ok(vec![0, 1, 2]),
            3 => Ok(match self {
                AxisConvention::Zyx => vec![0, 1, 2, 3],
                AxisConvention::Xyz => vec![0, 2, 1, 3],
                AxisConvention::Xzy => vec![0, 2, 3, 1],
            }),
            other => Err(TransformError::Dimensionality(other)),
        }
    }
}

impl FromStr for AxisConvention {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "zyx" => Ok(AxisConvention::Zyx),
            "xyz" => Ok(AxisConvention::Xyz),
            "xzy" => Ok(AxisConvention::Xzy),
            _ => Err(TransformError::UnknownConvention(s.to_string())),
        }
    }
}

impl fmt::Display for AxisConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AxisConvention::Zyx => "zyx",
            AxisConvention::Xyz => "xyz",
            AxisConvention::Xzy => "xzy",
        };
        f.write_str(name)
    }
}

/// Inverse of a column permutation.
pub fn inverse_permutation(perm: &[usize]) -> Vec<usize> {
    let mut inverse = vec![0; perm.len()];
    for (target, &source) in perm.iter().enumerate() {
        inverse[source] = target;
    }
    inverse
}

/// Reorder the columns of a block: output column `j` is input column `perm[j]`.
pub fn permute_columns(coords: ArrayView2<'_, f32>, perm: &[usize]) -> Array2<f32> {
    coords.select(Axis(1), perm)
}

/// Axis convention plus per-axis rescale and display scale factors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AxisTransform {
    pub convention: AxisConvention,
    /// Raw-to-physical factors, time first. `None` means all ones.
    pub rescale: Option<Vec<f32>>,
    /// Display scale factors, time first. `None` means all ones.
    pub scale: Option<Vec<f32>>,
}

impl AxisTransform {
    pub fn from_config(config: &CoordinateConfig) -> Self {
        Self {
            convention: config.json_format,
            rescale: config.rescale.clone(),
            scale: config.scale.clone(),
        }
    }

    /// Combined per-column factor `rescale * scale` for a block with `columns` columns.
    ///
    /// # Errors
    ///
    /// Returns `FactorLength` if either tuple does not have one entry per column.
    pub fn factors(&self, columns: usize) -> Result<Vec<f32>> {
        let check = |name: &'static str, values: &Option<Vec<f32>>| -> Result<Vec<f32>> {
            match values {
                Some(v) if v.len() != columns => Err(TransformError::FactorLength {
                    name,
                    expected: columns,
                    found: v.len(),
                }),
                Some(v) => Ok(v.clone()),
                None => Ok(vec![1.0; columns]),
            }
        };

        let rescale = check("rescale", &self.rescale)?;
        let scale = check("scale", &self.scale)?;

        Ok(rescale.iter().zip(&scale).map(|(r, s)| r * s).collect())
    }

    /// Permute the spatial columns of a `(t, [z], y, x)` block per the
    /// convention, then multiply every column by its combined factor.
    ///
    /// # Errors
    ///
    /// Returns an error if the block is not 3 or 4 columns wide or the factor
    /// tuples do not match its width.
    pub fn apply(&self, coords: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        let columns = coords.ncols();
        let spatial_dims = columns
            .checked_sub(1)
            .ok_or(TransformError::Dimensionality(0))?;

        let perm = self.convention.permutation(spatial_dims)?;
        let factors = self.factors(columns)?;

        let mut out = permute_columns(coords, &perm);
        for (mut column, factor) in out.columns_mut().into_iter().zip(factors) {
            column *= factor;
        }

        Ok(out)
    }
}

/// Stack a track's coordinates into a `(t, [z], y, x)` block and drop every
/// timepoint where any of those coordinates is missing.
///
/// Kept rows stay in their original temporal order. A track with no complete
/// timepoint yields an empty block with the right column count.
///
/// # Errors
///
/// Returns an error if a required axis is absent or the sequences differ in length.
pub fn drop_incomplete_rows(track: &TrackObject, spatial_dims: usize) -> Result<Array2<f32>> {
    let columns: Vec<(&'static str, &[Option<f64>])> = match spatial_dims {
        2 => vec![
            ("t", track.t.as_slice()),
            ("y", track.y.as_slice()),
            ("x", track.x.as_slice()),
        ],
        3 => {
            let z = track.z.as_deref().ok_or(TransformError::MissingAxis("z"))?;
            vec![
                ("t", track.t.as_slice()),
                ("z", z),
                ("y", track.y.as_slice()),
                ("x", track.x.as_slice()),
            ]
        }
        other => return Err(TransformError::Dimensionality(other)),
    };

    let rows = track.t.len();
    for &(axis, values) in &columns {
        if values.len() != rows {
            return Err(TransformError::LengthMismatch {
                axis,
                expected: rows,
                found: values.len(),
            });
        }
    }

    let kept: Vec<usize> = (0..rows)
        .filter(|&i| columns.iter().all(|(_, values)| values[i].is_some()))
        .collect();

    let mut block = Array2::<f32>::zeros((kept.len(), columns.len()));
    for (out_row, &i) in kept.iter().enumerate() {
        for (col, (_, values)) in columns.iter().enumerate() {
            block[[out_row, col]] = values[i].unwrap_or_default() as f32;
        }
    }

    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn track(t: Vec<Option<f64>>, z: Option<Vec<Option<f64>>>, y: Vec<Option<f64>>, x: Vec<Option<f64>>) -> TrackObject {
        let num_frames = t.len();
        TrackObject { t, x, y, z, num_frames }
    }

    #[test]
    fn test_convention_from_str() {
        assert_eq!("zyx".parse::<AxisConvention>().unwrap(), AxisConvention::Zyx);
        assert_eq!("XZY".parse::<AxisConvention>().unwrap(), AxisConvention::Xzy);
        assert!(matches!(
            "yxz".parse::<AxisConvention>(),
            Err(TransformError::UnknownConvention(_))
        ));
    }

    #[test]
    fn test_zyx_is_identity() {
        let coords = array![[0.0f32, 1.0, 2.0, 3.0], [1.0, 4.0, 5.0, 6.0]];
        let out = AxisTransform::default().apply(coords.view()).unwrap();
        assert_eq!(out, coords);
    }

    #[test]
    fn test_xyz_then_inverse_restores_order() {
        let coords = array![[0.0f32, 1.0, 2.0, 3.0], [1.0, 4.0, 5.0, 6.0]];
        let transform = AxisTransform {
            convention: AxisConvention::Xyz,
            ..Default::default()
        };

        let forward = transform.apply(coords.view()).unwrap();
        assert_eq!(forward.row(0).to_vec(), vec![0.0, 2.0, 1.0, 3.0]);

        let perm = AxisConvention::Xyz.permutation(3).unwrap();
        let restored = permute_columns(forward.view(), &inverse_permutation(&perm));
        assert_eq!(restored, coords);
    }

    #[test]
    fn test_xzy_permutation_and_inverse() {
        let coords = array![[7.0f32, 1.0, 2.0, 3.0]];
        let perm = AxisConvention::Xzy.permutation(3).unwrap();

        let forward = permute_columns(coords.view(), &perm);
        assert_eq!(forward.row(0).to_vec(), vec![7.0, 2.0, 3.0, 1.0]);

        let restored = permute_columns(forward.view(), &inverse_permutation(&perm));
        assert_eq!(restored, coords);
    }

    #[test]
    fn test_conventions_are_identity_in_2d() {
        for convention in [AxisConvention::Zyx, AxisConvention::Xyz, AxisConvention::Xzy] {
            assert_eq!(convention.permutation(2).unwrap(), vec![0, 1, 2]);
        }
    }

    #[test]
    fn test_rescale_and_scale_multiply_per_axis() {
        let coords = array![[2.0f32, 10.0, 10.0, 10.0]];
        let transform = AxisTransform {
            convention: AxisConvention::Zyx,
            rescale: Some(vec![1.0, 0.5, 0.1, 0.1]),
            scale: Some(vec![1.0, 2.0, 1.0, 3.0]),
        };

        let out = transform.apply(coords.view()).unwrap();
        let expected = [2.0f32, 10.0, 1.0, 3.0];
        for (got, want) in out.row(0).iter().zip(expected) {
            assert!((got - want).abs() < 1e-5);
        }
    }

    #[test]
    fn test_factor_length_mismatch_is_error() {
        let coords = array![[0.0f32, 1.0, 2.0]];
        let transform = AxisTransform {
            convention: AxisConvention::Zyx,
            rescale: Some(vec![1.0, 1.0, 1.0, 1.0]),
            scale: None,
        };

        assert!(matches!(
            transform.apply(coords.view()),
            Err(TransformError::FactorLength { name: "rescale", expected: 3, found: 4 })
        ));
    }

    #[test]
    fn test_drop_incomplete_rows_2d() {
        let obj = track(
            vec![Some(0.0), Some(1.0)],
            Some(vec![Some(0.0), Some(0.0)]),
            vec![Some(2.0), Some(5.0)],
            vec![Some(1.0), None],
        );

        let block = drop_incomplete_rows(&obj, 2).unwrap();
        assert_eq!(block, array![[0.0f32, 2.0, 1.0]]);
    }

    #[test]
    fn test_drop_incomplete_rows_keeps_order_3d() {
        let obj = track(
            vec![Some(0.0), Some(1.0), Some(2.0), Some(3.0)],
            Some(vec![Some(9.0), None, Some(8.0), Some(7.0)]),
            vec![Some(1.0), Some(1.0), None, Some(3.0)],
            vec![Some(4.0), Some(4.0), Some(4.0), Some(6.0)],
        );

        let block = drop_incomplete_rows(&obj, 3).unwrap();
        assert_eq!(block, array![[0.0f32, 9.0, 1.0, 4.0], [3.0, 7.0, 3.0, 6.0]]);
    }

    #[test]
    fn test_drop_incomplete_rows_all_missing_is_empty() {
        let obj = track(vec![None, Some(1.0)], None, vec![Some(1.0), None], vec![Some(1.0), Some(1.0)]);

        let block = drop_incomplete_rows(&obj, 2).unwrap();
        assert_eq!(block.shape(), &[0, 3]);
    }

    #[test]
    fn test_drop_incomplete_rows_missing_z_in_3d() {
        let obj = track(vec![Some(0.0)], None, vec![Some(1.0)], vec![Some(1.0)]);
        assert!(matches!(
            drop_incomplete_rows(&obj, 3),
            Err(TransformError::MissingAxis("z"))
        ));
    }

    #[test]
    fn test_drop_incomplete_rows_length_mismatch() {
        let obj = track(vec![Some(0.0), Some(1.0)], None, vec![Some(1.0)], vec![Some(1.0), Some(2.0)]);
        assert!(matches!(
            drop_incomplete_rows(&obj, 2),
            Err(TransformError::LengthMismatch { axis: "y", .. })
        ));
    }
}
