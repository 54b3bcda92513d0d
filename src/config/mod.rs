//! Configuration types for the loader pipeline.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::transforms::AxisConvention;

/// Configuration for coordinate handling shared by detections and tracks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinateConfig {
    /// Axis convention the tracker wrote its coordinates in
    #[serde(default)]
    pub json_format: AxisConvention,

    /// Raw-to-physical factor per axis, time first (e.g. [1, 0.2, 0.1, 0.1])
    #[serde(default)]
    pub rescale: Option<Vec<f32>>,

    /// Display scale per axis, time first
    #[serde(default)]
    pub scale: Option<Vec<f32>>,

    /// Explicit spatial dimensionality; inferred from the data when absent
    #[serde(default)]
    pub ndim: Option<usize>,
}

impl Default for CoordinateConfig {
    fn default() -> Self {
        Self {
            json_format: AxisConvention::Zyx,
            rescale: None,
            scale: None,
            ndim: None,
        }
    }
}

/// Intensity normalization method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizeMethod {
    #[default]
    Off,
    MinMax,
    Percentile,
}

/// Configuration for intensity normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeConfig {
    #[serde(default)]
    pub method: NormalizeMethod,

    /// Compute bounds per frame instead of over the whole stack
    #[serde(default)]
    pub per_frame: bool,

    #[serde(default = "default_low_percentile")]
    pub low_percentile: f32,

    #[serde(default = "default_high_percentile")]
    pub high_percentile: f32,
}

fn default_low_percentile() -> f32 {
    0.1
}

fn default_high_percentile() -> f32 {
    99.9
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            method: NormalizeMethod::Off,
            per_frame: false,
            low_percentile: default_low_percentile(),
            high_percentile: default_high_percentile(),
        }
    }
}

/// Configuration for the per-frame median filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedianFilterConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Window edge length in pixels (the UI keeps this within 1..=20)
    #[serde(default = "default_kernel_size")]
    pub kernel_size: usize,
}

fn default_kernel_size() -> usize {
    3
}

impl Default for MedianFilterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            kernel_size: default_kernel_size(),
        }
    }
}

/// Configuration for image stack loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    /// File extension of frame files (without the dot)
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Layer name prefix; the directory name is appended
    #[serde(default = "default_image_prefix")]
    pub name_prefix: String,

    #[serde(default)]
    pub normalize: NormalizeConfig,

    #[serde(default)]
    pub median_filter: MedianFilterConfig,

    /// Worker threads for the filter step (defaults to one per CPU core)
    #[serde(default)]
    pub workers: Option<usize>,
}

fn default_extension() -> String {
    "tif".to_string()
}

fn default_image_prefix() -> String {
    "Movie".to_string()
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            extension: default_extension(),
            name_prefix: default_image_prefix(),
            normalize: NormalizeConfig::default(),
            median_filter: MedianFilterConfig::default(),
            workers: None,
        }
    }
}

/// Configuration for the detections layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_detections_name")]
    pub name: String,

    /// RGB edge color of the open markers
    #[serde(default = "default_edge_color")]
    pub edge_color: [u8; 3],

    #[serde(default = "default_point_size")]
    pub point_size: f32,
}

fn default_detections_name() -> String {
    "Detections".to_string()
}

fn default_edge_color() -> [u8; 3] {
    [255, 165, 0] // orange
}

fn default_point_size() -> f32 {
    10.0
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            name: default_detections_name(),
            edge_color: default_edge_color(),
            point_size: default_point_size(),
        }
    }
}

/// Blending mode of a rendered layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Blending {
    #[default]
    Translucent,
    Opaque,
    Additive,
}

/// Configuration for the tracks layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackConfig {
    #[serde(default = "default_tracks_name")]
    pub name: String,

    #[serde(default)]
    pub blending: Blending,

    /// Number of past frames drawn behind the current vertex
    #[serde(default = "default_tail_length")]
    pub tail_length: usize,
}

fn default_tracks_name() -> String {
    "Tracks".to_string()
}

fn default_tail_length() -> usize {
    30
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            name: default_tracks_name(),
            blending: Blending::Translucent,
            tail_length: default_tail_length(),
        }
    }
}

/// Main loader configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoaderConfig {
    #[serde(default)]
    pub coordinates: CoordinateConfig,

    #[serde(default)]
    pub image: ImageConfig,

    #[serde(default)]
    pub detections: DetectionConfig,

    #[serde(default)]
    pub tracks: TrackConfig,
}

impl LoaderConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: LoaderConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
