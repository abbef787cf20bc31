//! On-disk thumbnail cache
//!
//! One flat directory holds every artifact as `<cache key>.<png|gif>`. There is
//! no manifest: a file that exists and whose header decodes *is* a cache hit.
//! Unreadable entries are treated as misses and overwritten. Artifacts are
//! written to a temporary file in the same directory and renamed into place,
//! so readers never observe a half-written file.
//!
//! Two workers generating the same key race harmlessly: both produce the same
//! bytes and the later rename wins.

use crate::error::GenerationError;
use crate::generate::{ArtifactGenerator, MediaGenerator, Rendered};
use crate::media::MediaKind;
use crate::{cache_key, ThumbnailConfig};
use anyhow::{Context, Result};
use image::ImageReader;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A thumbnail present in the cache directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThumbnailArtifact {
    pub source_path: PathBuf,
    pub kind: MediaKind,
    pub artifact_path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// True when the artifact was already on disk and nothing was decoded
    pub from_cache: bool,
}

/// Lookup-or-generate store over a single cache directory
pub struct ThumbnailCache {
    cache_dir: PathBuf,
    config: ThumbnailConfig,
    generator: Arc<dyn ArtifactGenerator>,
}

impl ThumbnailCache {
    /// Create a cache in `config.cache_dir` backed by the default generator
    pub fn new(config: ThumbnailConfig) -> Result<Self> {
        let generator = Arc::new(MediaGenerator::from_config(&config));
        Self::with_generator(config, generator)
    }

    /// Create a cache with a custom artifact generator
    pub fn with_generator(config: ThumbnailConfig, generator: Arc<dyn ArtifactGenerator>) -> Result<Self> {
        let cache_dir = config.cache_dir.clone();
        fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create cache directory: {}", cache_dir.display()))?;

        Ok(Self {
            cache_dir,
            config,
            generator,
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn config(&self) -> &ThumbnailConfig {
        &self.config
    }

    /// Where the artifact for `source` of the given kind lives
    pub fn artifact_path(&self, source: &Path, kind: MediaKind) -> PathBuf {
        let key = cache_key(&source.to_string_lossy());
        self.cache_dir.join(format!("{}.{}", key, kind.artifact_extension()))
    }

    /// Return the cached artifact for `source` if one exists and is readable
    pub fn lookup(&self, source: &Path, kind: MediaKind) -> Option<ThumbnailArtifact> {
        let source = std::path::absolute(source).ok()?;
        let artifact_path = self.artifact_path(&source, kind);
        let (width, height) = read_dimensions(&artifact_path)?;

        Some(ThumbnailArtifact {
            source_path: source,
            kind,
            artifact_path,
            width,
            height,
            from_cache: true,
        })
    }

    /// Return the cached artifact for `source`, generating and storing it on a miss.
    ///
    /// Cached entries are trusted without comparing against the source's
    /// modification time.
    pub fn lookup_or_generate(&self, source: &Path, kind: MediaKind) -> Result<ThumbnailArtifact, GenerationError> {
        let source = std::path::absolute(source).map_err(|e| GenerationError::unreadable(source, e))?;
        let artifact_path = self.artifact_path(&source, kind);

        if artifact_path.exists() {
            match read_dimensions(&artifact_path) {
                Some((width, height)) => {
                    debug!("Cache hit for {}: {}", source.display(), artifact_path.display());
                    return Ok(ThumbnailArtifact {
                        source_path: source,
                        kind,
                        artifact_path,
                        width,
                        height,
                        from_cache: true,
                    });
                }
                None => warn!("Corrupt cache entry {}, regenerating", artifact_path.display()),
            }
        }

        let rendered = match kind {
            MediaKind::Image => self.generator.make_still(&source, self.config.max_dimension)?,
            MediaKind::Video => self.generator.make_loop(
                &source,
                self.config.max_dimension,
                self.config.video_frame_count,
            )?,
        };

        self.store(&artifact_path, &rendered)?;
        info!(
            "Generated {} thumbnail {}x{} for {}",
            kind,
            rendered.width,
            rendered.height,
            source.display()
        );

        Ok(ThumbnailArtifact {
            source_path: source,
            kind,
            artifact_path,
            width: rendered.width,
            height: rendered.height,
            from_cache: false,
        })
    }

    /// Write artifact bytes via a same-directory temp file and an atomic rename
    fn store(&self, artifact_path: &Path, rendered: &Rendered) -> Result<(), GenerationError> {
        let write_err = |e: &dyn std::fmt::Display| GenerationError::cache_write(artifact_path, e);

        // The directory may have been removed since construction
        fs::create_dir_all(&self.cache_dir).map_err(|e| write_err(&e))?;

        let mut temp = tempfile::Builder::new()
            .prefix(".partial-")
            .tempfile_in(&self.cache_dir)
            .map_err(|e| write_err(&e))?;
        temp.write_all(&rendered.bytes).map_err(|e| write_err(&e))?;
        temp.as_file().sync_all().map_err(|e| write_err(&e))?;
        temp.persist(artifact_path).map_err(|e| write_err(&e.error))?;

        Ok(())
    }
}

/// Read the pixel size from an artifact header; `None` when missing or corrupt
fn read_dimensions(path: &Path) -> Option<(u32, u32)> {
    ImageReader::open(path)
        .ok()?
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}
