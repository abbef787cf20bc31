//! Enlarged hover previews for the media browser
//!
//! Still images are shown as the cached thumbnail scaled up by a bounded
//! factor. Videos get a jump-scrub session: playback starts muted, and once
//! the duration is known the player hops through evenly spaced jump points,
//! spending a fixed slice of time at each before looping back to the start.

pub mod geometry;
pub mod scrub;

pub use geometry::{preview_size, PreviewSurface};
pub use scrub::{jump_points, PreviewPlayer, PreviewScrubController, ScrubSession, ScrubState};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Tunables for the hover preview
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Neither preview axis grows past this many pixels
    pub max_preview_dimension: u32,
    pub max_magnification: f64,
    /// Number of jump points a video preview cycles through
    pub segments: u32,
    /// How long playback runs at each jump point before hopping on
    pub segment_duration_ms: u64,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            max_preview_dimension: 384,
            max_magnification: 2.0,
            segments: 8,
            segment_duration_ms: 1000,
        }
    }
}

impl PreviewConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read preview config: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse preview config: {}", path.display()))
    }
}
