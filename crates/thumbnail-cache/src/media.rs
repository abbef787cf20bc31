//! Media classification by file extension

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Recognised still-image extensions
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif"];

/// Recognised video extensions
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Rendered as a single PNG still
    Image,
    /// Rendered as a looping GIF of evenly spaced frames
    Video,
}

impl MediaKind {
    /// Classify a path by its extension, case-insensitively.
    /// Returns `None` for anything that is neither a known image nor video.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }

    /// Extension of the cached artifact, without the dot
    pub fn artifact_extension(&self) -> &'static str {
        match self {
            MediaKind::Image => "png",
            MediaKind::Video => "gif",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

impl std::str::FromStr for MediaKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            _ => bail!("Invalid media kind: {}. Valid options: image, video", s),
        }
    }
}
