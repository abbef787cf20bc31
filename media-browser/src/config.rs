//! Combined configuration file for the command-line front end
//!
//! ```json
//! {
//!   "thumbnails": { "max_dimension": 256, "workers": 4 },
//!   "preview": { "segments": 8 }
//! }
//! ```

use anyhow::{Context, Result};
use preview_scrub::PreviewConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thumbnail_cache::ThumbnailConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub thumbnails: ThumbnailConfig,
    pub preview: PreviewConfig,
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub cache_dir: Option<PathBuf>,
    pub workers: Option<usize>,
    pub max_dimension: Option<u32>,
    pub frames: Option<u32>,
}

impl AppConfig {
    /// Load `path` if given, otherwise start from defaults, then apply overrides
    pub fn resolve(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?
            }
            None => AppConfig::default(),
        };

        if let Some(dir) = &overrides.cache_dir {
            config.thumbnails.cache_dir = dir.clone();
        }
        if let Some(workers) = overrides.workers {
            config.thumbnails.workers = workers.max(1);
        }
        if let Some(max_dimension) = overrides.max_dimension {
            config.thumbnails.max_dimension = max_dimension.max(1);
        }
        if let Some(frames) = overrides.frames {
            config.thumbnails.video_frame_count = frames.max(1);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_without_file() -> Result<()> {
        let config = AppConfig::resolve(None, &Overrides::default())?;
        assert_eq!(config, AppConfig::default());
        Ok(())
    }

    #[test]
    fn test_overrides_beat_file_values() -> Result<()> {
        let temp_dir = tempdir()?;
        let path = temp_dir.path().join("media-browser.json");
        fs::write(
            &path,
            r#"{ "thumbnails": { "max_dimension": 128, "workers": 2 }, "preview": { "segments": 4 } }"#,
        )?;

        let overrides = Overrides {
            workers: Some(6),
            frames: Some(0),
            ..Overrides::default()
        };
        let config = AppConfig::resolve(Some(&path), &overrides)?;
        assert_eq!(config.thumbnails.max_dimension, 128);
        assert_eq!(config.thumbnails.workers, 6);
        assert_eq!(config.thumbnails.video_frame_count, 1);
        assert_eq!(config.preview.segments, 4);
        assert_eq!(config.preview.segment_duration_ms, 1000);
        Ok(())
    }
}
