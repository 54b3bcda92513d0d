//! Core file I/O and coordinate transforms.

pub mod loaders;
pub mod transforms;
pub mod writers;

pub use loaders::{DetectionRecord, LoaderError, TrackObject};
pub use transforms::{AxisConvention, AxisTransform, TransformError};
pub use writers::{write_points_csv, write_tracks_csv, WriteError};
