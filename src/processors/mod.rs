//! Builders that turn parsed inputs into dense viewer arrays.

pub mod detections;
pub mod image_stack;
pub mod inspection;
pub mod tracks;

// Re-export key types for convenience
pub use detections::{build_detection_array, DetectionError};
pub use image_stack::{assemble_stack, median_filter_stack, normalize, ImageStackError};
pub use inspection::{inspect_track, InspectionError, IntensityProfile, TrackProfile};
pub use tracks::{build_track_array, random_id_property, TrackError};
