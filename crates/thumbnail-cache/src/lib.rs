//! Thumbnail generation and caching library for the media browser
//!
//! This crate turns a listing of media files into small representative
//! thumbnails: a still PNG for images and a looping GIF sampled evenly across
//! the stream for videos. Artifacts live in a flat on-disk cache keyed by a
//! digest of the source path, and a bounded worker pool generates them in the
//! background, delivering results as they complete.
//!
//! # Features
//!
//! - **Path-keyed disk cache**: `<digest>.png` / `<digest>.gif`, no index file
//! - **Aspect-preserving resampling**: Lanczos3, never upscales
//! - **Uniform video sampling**: evenly spaced frames assembled into a looping GIF
//! - **Bounded scheduling**: fixed-size rayon pool with per-job failure isolation
//! - **Batch supersession**: unstarted jobs of a stale listing can be dropped

pub mod cache;
pub mod error;
pub mod generate;
pub mod media;
pub mod scheduler;
pub mod video;

pub use cache::{ThumbnailArtifact, ThumbnailCache};
pub use error::GenerationError;
pub use generate::{make_still, scaled_size, ArtifactGenerator, MediaGenerator, Rendered};
pub use media::MediaKind;
pub use scheduler::{
    BatchSummary, BatchToken, GenerationJob, GenerationResult, GenerationScheduler, ResultStream,
};
pub use video::{make_loop, sample_indices, FfmpegSource, VideoSource};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Upper bound on the default worker count, whatever the hardware reports
const MAX_DEFAULT_WORKERS: usize = 16;

/// Standard configuration for thumbnail generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub cache_dir: PathBuf,
    pub max_dimension: u32,
    pub video_frame_count: u32,
    pub frame_delay_ms: u32,
    pub workers: usize,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            cache_dir: Self::default_cache_dir(),
            max_dimension: 256,
            video_frame_count: 16,
            frame_delay_ms: 125, // 8 fps
            workers: Self::default_workers(),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }
}

impl ThumbnailConfig {
    /// Load configuration from a JSON file; absent fields keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// `<user cache dir>/media-browser/thumbs`, or the temp dir when there is none
    pub fn default_cache_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("media-browser")
            .join("thumbs")
    }

    pub fn default_workers() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .clamp(1, MAX_DEFAULT_WORKERS)
    }
}

/// Derive the cache key for a source path.
///
/// The key depends on the path string alone, never on file contents or
/// modification time: the first 16 bytes of its SHA-256 digest, hex encoded.
pub fn cache_key(source_path: &str) -> String {
    use sha2::{Digest, Sha256};

    let digest = Sha256::digest(source_path.as_bytes());
    hex::encode(&digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::tempdir;

    #[test]
    fn test_cache_key_is_deterministic() {
        let key1 = cache_key("/media/holiday/beach.jpg");
        let key2 = cache_key("/media/holiday/beach.jpg");

        assert_eq!(key1, key2);
        assert_eq!(key1.len(), 32); // 16 bytes as hex = 32 chars
        assert!(key1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_cache_key_ignores_file_contents() -> Result<()> {
        let temp_dir = tempdir()?;
        let file_path = temp_dir.path().join("clip.mp4");
        let path_str = file_path.to_string_lossy().to_string();

        let before = cache_key(&path_str);
        fs::write(&file_path, b"first")?;
        let written = cache_key(&path_str);
        fs::write(&file_path, b"second, longer content")?;
        let rewritten = cache_key(&path_str);

        assert_eq!(before, written);
        assert_eq!(written, rewritten);
        Ok(())
    }

    #[test]
    fn test_cache_key_no_collisions() {
        let mut seen = HashSet::new();
        for dir in 0..50 {
            for file in 0..100 {
                let path = format!("/srv/media/album-{}/IMG_{:04}.jpg", dir, file);
                assert!(seen.insert(cache_key(&path)), "collision for {}", path);
            }
        }
        assert_eq!(seen.len(), 5000);
    }

    #[test]
    fn test_config_defaults() {
        let config = ThumbnailConfig::default();
        assert_eq!(config.max_dimension, 256);
        assert_eq!(config.video_frame_count, 16);
        assert!(config.workers >= 1 && config.workers <= MAX_DEFAULT_WORKERS);
        assert!(config.cache_dir.ends_with("media-browser/thumbs"));
    }

    #[test]
    fn test_config_load_partial_file() -> Result<()> {
        let temp_dir = tempdir()?;
        let config_path = temp_dir.path().join("config.json");
        fs::write(&config_path, r#"{ "max_dimension": 128, "workers": 3 }"#)?;

        let config = ThumbnailConfig::load(&config_path)?;
        assert_eq!(config.max_dimension, 128);
        assert_eq!(config.workers, 3);
        assert_eq!(config.video_frame_count, 16);
        assert_eq!(config.ffmpeg_path, "ffmpeg");
        Ok(())
    }

    #[test]
    fn test_config_load_rejects_garbage() -> Result<()> {
        let temp_dir = tempdir()?;
        let config_path = temp_dir.path().join("config.json");
        fs::write(&config_path, "not json")?;

        assert!(ThumbnailConfig::load(&config_path).is_err());
        assert!(ThumbnailConfig::load(&temp_dir.path().join("missing.json")).is_err());
        Ok(())
    }
}
