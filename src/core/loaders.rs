//! Data loaders for tracker result files and image slices.
//!
//! This module provides parsers for:
//! - Detection JSON files (one record per frame with `xCoord`/`yCoord`/`zCoord`)
//! - Track JSON files (a single track object or a list of them)
//! - Directories of single-timepoint TIFF slices (2D pages or 3D page stacks)

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3, ArrayD};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tiff::decoder::{Decoder, DecodingResult};

/// Errors that can occur during file loading.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TIFF decoding error in {path}: {source}")]
    Tiff {
        path: PathBuf,
        #[source]
        source: tiff::TiffError,
    },

    #[error("Unsupported pixel layout in {path}: {reason}")]
    UnsupportedLayout { path: PathBuf, reason: String },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// One coordinate entry of a detection record.
///
/// The tracker either writes a bare value or a `[value, spread]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CoordEntry {
    Value(f32),
    WithSpread(f32, f32),
}

impl CoordEntry {
    /// The coordinate value itself.
    #[inline]
    pub fn value(&self) -> f32 {
        match *self {
            CoordEntry::Value(v) => v,
            CoordEntry::WithSpread(v, _) => v,
        }
    }
}

/// All detections found in one frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionRecord {
    #[serde(rename = "xCoord")]
    pub x_coord: Vec<CoordEntry>,

    #[serde(rename = "yCoord")]
    pub y_coord: Vec<CoordEntry>,

    /// Empty for 2D data.
    #[serde(rename = "zCoord", default)]
    pub z_coord: Vec<CoordEntry>,
}

impl DetectionRecord {
    /// Number of detections in this frame.
    #[inline]
    pub fn len(&self) -> usize {
        self.x_coord.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x_coord.is_empty()
    }

    /// Returns true if the record carries z coordinates.
    #[inline]
    pub fn is_3d(&self) -> bool {
        !self.z_coord.is_empty()
    }
}

/// One linked track: per-timepoint coordinates, any of which may be missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackObject {
    pub t: Vec<Option<f64>>,
    pub x: Vec<Option<f64>>,
    pub y: Vec<Option<f64>>,

    #[serde(default)]
    pub z: Option<Vec<Option<f64>>>,

    /// Advisory vertex count written by the tracker.
    #[serde(rename = "numFrames")]
    pub num_frames: usize,
}

impl TrackObject {
    /// Returns true if every z value is present and exactly zero (or z is absent).
    pub fn has_flat_z(&self) -> bool {
        match &self.z {
            Some(z) => z.iter().all(|v| *v == Some(0.0)),
            None => true,
        }
    }
}

/// Track files hold either one object or a list of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TrackFile {
    Many(Vec<TrackObject>),
    One(Box<TrackObject>),
}

impl TrackFile {
    fn into_vec(self) -> Vec<TrackObject> {
        match self {
            TrackFile::Many(tracks) => tracks,
            TrackFile::One(track) => vec![*track],
        }
    }
}

/// Parse detection records from any reader.
pub fn read_detections<R: Read>(reader: R) -> Result<Vec<DetectionRecord>> {
    let records: Vec<DetectionRecord> = serde_json::from_reader(reader)?;
    Ok(records)
}

/// Load detection records from a JSON file.
///
/// # Arguments
///
/// * `path` - Path to the detections JSON file
///
/// # Returns
///
/// One `DetectionRecord` per frame, in frame order.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a record lacks `xCoord`/`yCoord`.
pub fn load_detections<P: AsRef<Path>>(path: P) -> Result<Vec<DetectionRecord>> {
    let file = File::open(path.as_ref())?;
    read_detections(BufReader::new(file))
}

/// Parse track objects from any reader. A single object becomes a one-element list.
pub fn read_tracks<R: Read>(reader: R) -> Result<Vec<TrackObject>> {
    let file: TrackFile = serde_json::from_reader(reader)?;
    Ok(file.into_vec())
}

/// Load track objects from a JSON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or an object lacks
/// `t`, `x`, `y` or `numFrames`.
pub fn load_tracks<P: AsRef<Path>>(path: P) -> Result<Vec<TrackObject>> {
    let file = File::open(path.as_ref())?;
    read_tracks(BufReader::new(file))
}

/// List files with the given extension in a directory, sorted by file name.
///
/// The extension is matched exactly (case included) and without the leading dot.
/// Frame order is purely the lexicographic file name order.
pub fn list_image_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let extension = extension.trim_start_matches('.');

    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == extension)
        })
        .collect();

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    Ok(files)
}

fn decoding_to_f32(result: DecodingResult) -> Option<Vec<f32>> {
    let values = match result {
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|p| p as f32).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|p| p as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|p| p as f32).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|p| p as f32).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|p| p as f32).collect(),
        #[allow(unreachable_patterns)]
        _ => return None,
    };
    Some(values)
}

/// Read one timepoint from a TIFF file.
///
/// A single-page file yields a `(height, width)` array; a multi-page file
/// yields a `(pages, height, width)` volume. Only single-sample (grayscale)
/// pixels are supported.
///
/// # Errors
///
/// Returns an error if decoding fails, pages differ in size, or pixels
/// carry more than one sample.
pub fn read_tiff_frame(path: &Path) -> Result<ArrayD<f32>> {
    let tiff_err = |source| LoaderError::Tiff {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path)?;
    let mut decoder = Decoder::new(BufReader::new(file)).map_err(tiff_err)?;

    let (width, height) = decoder.dimensions().map_err(tiff_err)?;
    let (width, height) = (width as usize, height as usize);
    let mut pages: Vec<Vec<f32>> = Vec::new();

    loop {
        let page_dims = decoder.dimensions().map_err(tiff_err)?;
        if (page_dims.0 as usize, page_dims.1 as usize) != (width, height) {
            return Err(LoaderError::ShapeMismatch(format!(
                "{}: page {} is {}x{}, expected {}x{}",
                path.display(),
                pages.len(),
                page_dims.0,
                page_dims.1,
                width,
                height
            )));
        }

        let decoded = decoder.read_image().map_err(tiff_err)?;
        let values = decoding_to_f32(decoded).ok_or_else(|| LoaderError::UnsupportedLayout {
            path: path.to_path_buf(),
            reason: "unsupported sample format".to_string(),
        })?;

        if values.len() != width * height {
            return Err(LoaderError::UnsupportedLayout {
                path: path.to_path_buf(),
                reason: format!(
                    "{} samples for {}x{} pixels (multi-channel images are not supported)",
                    values.len(),
                    width,
                    height
                ),
            });
        }

        pages.push(values);

        if !decoder.more_images() {
            break;
        }
        decoder.next_image().map_err(tiff_err)?;
    }

    let shape_err = |e: ndarray::ShapeError| LoaderError::ShapeMismatch(e.to_string());

    if pages.len() == 1 {
        let plane = Array2::from_shape_vec((height, width), pages.remove(0)).map_err(shape_err)?;
        Ok(plane.into_dyn())
    } else {
        let depth = pages.len();
        let flat: Vec<f32> = pages.into_iter().flatten().collect();
        let volume = Array3::from_shape_vec((depth, height, width), flat).map_err(shape_err)?;
        Ok(volume.into_dyn())
    }
}
