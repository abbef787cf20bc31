//! Sizing of the enlarged hover preview

use crate::PreviewConfig;
use std::path::PathBuf;
use thumbnail_cache::{MediaKind, ThumbnailArtifact};

/// What the preview surface should display for a hovered item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewSurface {
    pub artifact_path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Animated artifacts (video loops) are played rather than drawn once
    pub animated: bool,
}

impl PreviewSurface {
    pub fn for_artifact(artifact: &ThumbnailArtifact, config: &PreviewConfig) -> Self {
        let (width, height) = preview_size(artifact.width, artifact.height, config);
        Self {
            artifact_path: artifact.artifact_path.clone(),
            width,
            height,
            animated: artifact.kind == MediaKind::Video,
        }
    }
}

/// Enlarge a thumbnail size for the hover preview.
///
/// The factor is `min(max_magnification, max_preview / width, max_preview / height)`,
/// so the aspect ratio is kept and neither axis exceeds the preview bound.
/// Each axis is floored and kept at least 1.
pub fn preview_size(width: u32, height: u32, config: &PreviewConfig) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width.max(1), height.max(1));
    }

    let bound = f64::from(config.max_preview_dimension);
    let scale = config
        .max_magnification
        .min(bound / f64::from(width))
        .min(bound / f64::from(height));

    let scaled = |side: u32| ((f64::from(side) * scale).floor() as u32).max(1);
    (scaled(width), scaled(height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_thumbnails_double() {
        let config = PreviewConfig::default();
        assert_eq!(preview_size(100, 80, &config), (200, 160));
        assert_eq!(preview_size(192, 192, &config), (384, 384));
    }

    #[test]
    fn test_large_thumbnails_hit_preview_bound() {
        let config = PreviewConfig::default();
        assert_eq!(preview_size(256, 192, &config), (384, 288));
        assert_eq!(preview_size(144, 256, &config), (216, 384));
    }

    #[test]
    fn test_degenerate_sizes() {
        let config = PreviewConfig::default();
        assert_eq!(preview_size(0, 10, &config), (1, 10));
        assert_eq!(preview_size(384, 1, &config), (384, 1));
    }

    #[test]
    fn test_surface_for_video_is_animated() {
        let artifact = ThumbnailArtifact {
            source_path: PathBuf::from("/v/clip.mp4"),
            kind: MediaKind::Video,
            artifact_path: PathBuf::from("/cache/abc.gif"),
            width: 256,
            height: 144,
            from_cache: true,
        };
        let surface = PreviewSurface::for_artifact(&artifact, &PreviewConfig::default());
        assert!(surface.animated);
        assert_eq!((surface.width, surface.height), (384, 216));
        assert_eq!(surface.artifact_path, artifact.artifact_path);
    }
}
