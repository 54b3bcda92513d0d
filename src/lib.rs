//! Loader for u-track microscopy tracking results.
//!
//! This crate provides tools for:
//! - Parsing u-track detection and track JSON files into dense `ndarray` arrays
//! - Reordering and rescaling coordinates from the tracker's axis convention
//! - Assembling `.tif` slice directories into normalized, median-filtered stacks
//! - Handing finished layers to a viewer and inspecting tracks against images
//!
//! # Example
//!
//! ```no_run
//! use utrack_loader::config::LoaderConfig;
//! use utrack_loader::pipeline::{load_all, LoadRequest};
//! use utrack_loader::viewer::{ArtifactRegistry, NoStatus};
//!
//! let request = LoadRequest {
//!     track_files: vec!["tracks.json".into()],
//!     ..Default::default()
//! };
//! let mut registry = ArtifactRegistry::new();
//! load_all(&request, &LoaderConfig::default(), &mut registry, &NoStatus).unwrap();
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod pipeline;
pub mod processors;
pub mod viewer;
pub mod visualization;

pub use config::{ImageConfig, LoaderConfig};
pub use viewer::{ArtifactRegistry, StatusReporter, Viewer};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
