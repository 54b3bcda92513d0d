//! Interface to the layered viewer that displays loaded artifacts.
//!
//! The loader never touches a concrete viewer. It hands finished layers to a
//! [`Viewer`] and reports progress through a [`StatusReporter`]. The
//! [`ArtifactRegistry`] is an in-memory viewer that keeps every layer tagged
//! by kind, so later queries (e.g. intensity lookup) select layers by kind.

use std::collections::HashMap;
use std::path::PathBuf;

use ndarray::{Array1, Array2, ArrayD};

use crate::config::Blending;

/// Progress and busy-state sink passed into each load.
///
/// Every method has a no-op default so callers implement only what they show.
pub trait StatusReporter: Send + Sync {
    /// Toggle the host's busy indicator.
    fn set_busy(&self, _busy: bool) {}

    /// Report `current` of `total` steps done for a named stage.
    fn progress(&self, _stage: &str, _current: usize, _total: usize) {}

    /// Show a user-facing diagnostic (e.g. "No detections found").
    fn notice(&self, _message: &str) {}
}

/// Status sink that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStatus;

impl StatusReporter for NoStatus {}

/// Marker symbol for point layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// Open circle: edge only.
    Ring,
    Disc,
}

/// Display style of a point layer.
#[derive(Debug, Clone, PartialEq)]
pub struct PointStyle {
    pub marker: Marker,
    pub edge_color: [u8; 3],
    /// `None` is a transparent fill.
    pub face_color: Option<[u8; 3]>,
    pub size: f32,
}

/// Dense `(T, ...spatial)` intensity stack.
#[derive(Debug, Clone)]
pub struct ImageLayer {
    pub name: String,
    pub data: ArrayD<f32>,
    pub source: Option<PathBuf>,
}

/// Dense `(N, 1 + D)` point array: frame index then coordinates.
#[derive(Debug, Clone)]
pub struct PointsLayer {
    pub name: String,
    pub data: Array2<f32>,
    pub style: PointStyle,
}

/// Dense `(N, 2 + D)` vertex array: track id, time, then coordinates.
#[derive(Debug, Clone)]
pub struct TracksLayer {
    pub name: String,
    pub data: Array2<f32>,
    pub blending: Blending,
    pub tail_length: usize,
    /// Per-vertex properties, each the length of `data`.
    pub properties: HashMap<String, Array1<f32>>,
    /// Property used as the color grouping key.
    pub color_by: Option<String>,
}

impl TracksLayer {
    /// Number of spatial dimensions of the vertex array.
    pub fn spatial_dims(&self) -> usize {
        self.data.ncols().saturating_sub(2)
    }
}

/// Kind tag of a registered artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Image,
    Points,
    Tracks,
}

/// A layer handed to the viewer, tagged by kind.
#[derive(Debug, Clone)]
pub enum Artifact {
    Image(ImageLayer),
    Points(PointsLayer),
    Tracks(TracksLayer),
}

impl Artifact {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Artifact::Image(_) => ArtifactKind::Image,
            Artifact::Points(_) => ArtifactKind::Points,
            Artifact::Tracks(_) => ArtifactKind::Tracks,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Artifact::Image(layer) => &layer.name,
            Artifact::Points(layer) => &layer.name,
            Artifact::Tracks(layer) => &layer.name,
        }
    }

    fn set_name(&mut self, name: String) {
        match self {
            Artifact::Image(layer) => layer.name = name,
            Artifact::Points(layer) => layer.name = name,
            Artifact::Tracks(layer) => layer.name = name,
        }
    }

    /// Shape of the underlying dense array.
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Artifact::Image(layer) => layer.data.shape().to_vec(),
            Artifact::Points(layer) => layer.data.shape().to_vec(),
            Artifact::Tracks(layer) => layer.data.shape().to_vec(),
        }
    }
}

/// Sink for finished layers.
///
/// Each method returns the name the layer was registered under, which may
/// differ from the requested one when names collide.
pub trait Viewer {
    fn add_image(&mut self, layer: ImageLayer) -> String;
    fn add_points(&mut self, layer: PointsLayer) -> String;
    fn add_tracks(&mut self, layer: TracksLayer) -> String;
}

/// In-memory viewer keeping layers in insertion order.
#[derive(Debug, Clone, Default)]
pub struct ArtifactRegistry {
    artifacts: Vec<Artifact>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter()
    }

    pub fn of_kind(&self, kind: ArtifactKind) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter().filter(move |a| a.kind() == kind)
    }

    pub fn images(&self) -> impl Iterator<Item = &ImageLayer> {
        self.artifacts.iter().filter_map(|a| match a {
            Artifact::Image(layer) => Some(layer),
            _ => None,
        })
    }

    pub fn points(&self) -> impl Iterator<Item = &PointsLayer> {
        self.artifacts.iter().filter_map(|a| match a {
            Artifact::Points(layer) => Some(layer),
            _ => None,
        })
    }

    pub fn tracks(&self) -> impl Iterator<Item = &TracksLayer> {
        self.artifacts.iter().filter_map(|a| match a {
            Artifact::Tracks(layer) => Some(layer),
            _ => None,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.name() == name)
    }

    /// `base` if unused, otherwise `base [n]` with the smallest free `n`.
    fn unique_name(&self, base: &str) -> String {
        if self.get(base).is_none() {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{} [{}]", base, n))
            .find(|candidate| self.get(candidate).is_none())
            .unwrap_or_else(|| base.to_string())
    }

    fn push(&mut self, mut artifact: Artifact) -> String {
        let name = self.unique_name(artifact.name());
        artifact.set_name(name.clone());
        self.artifacts.push(artifact);
        name
    }
}

impl Viewer for ArtifactRegistry {
    fn add_image(&mut self, layer: ImageLayer) -> String {
        self.push(Artifact::Image(layer))
    }

    fn add_points(&mut self, layer: PointsLayer) -> String {
        self.push(Artifact::Points(layer))
    }

    fn add_tracks(&mut self, layer: TracksLayer) -> String {
        self.push(Artifact::Tracks(layer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, ArrayD, IxDyn};

    fn image(name: &str) -> ImageLayer {
        ImageLayer {
            name: name.to_string(),
            data: ArrayD::zeros(IxDyn(&[2, 3, 3])),
            source: None,
        }
    }

    fn points(name: &str) -> PointsLayer {
        PointsLayer {
            name: name.to_string(),
            data: Array2::zeros((4, 3)),
            style: PointStyle {
                marker: Marker::Ring,
                edge_color: [255, 165, 0],
                face_color: None,
                size: 10.0,
            },
        }
    }

    #[test]
    fn test_registry_queries_by_kind() {
        let mut registry = ArtifactRegistry::new();
        registry.add_image(image("Movie a"));
        registry.add_points(points("Detections"));
        registry.add_image(image("Movie b"));

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.images().count(), 2);
        assert_eq!(registry.points().count(), 1);
        assert_eq!(registry.tracks().count(), 0);
        assert_eq!(registry.of_kind(ArtifactKind::Image).count(), 2);
        assert_eq!(registry.get("Detections").map(Artifact::kind), Some(ArtifactKind::Points));
    }

    #[test]
    fn test_registry_deduplicates_names() {
        let mut registry = ArtifactRegistry::new();
        assert_eq!(registry.add_points(points("Detections")), "Detections");
        assert_eq!(registry.add_points(points("Detections")), "Detections [1]");
        assert_eq!(registry.add_points(points("Detections")), "Detections [2]");

        let names: Vec<&str> = registry.iter().map(Artifact::name).collect();
        assert_eq!(names, vec!["Detections", "Detections [1]", "Detections [2]"]);
    }

    #[test]
    fn test_artifact_shape() {
        let artifact = Artifact::Image(image("Movie"));
        assert_eq!(artifact.shape(), vec![2, 3, 3]);
    }
}
