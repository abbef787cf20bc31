//! Bounded background scheduler for thumbnail generation
//!
//! A listing of source paths is classified by extension and each recognised
//! file becomes an independent job on a fixed-size rayon pool. Results are
//! delivered over a channel as soon as each job finishes, so they arrive in
//! completion order rather than submission order. A failing job produces a
//! failed result and never disturbs its siblings.
//!
//! Running jobs are never interrupted. Cancelling a batch only drops the jobs
//! that have not started yet, which is how a stale directory listing is
//! abandoned when the user navigates elsewhere.

use crate::cache::{ThumbnailArtifact, ThumbnailCache};
use crate::error::GenerationError;
use crate::media::MediaKind;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A single unit of generation work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationJob {
    pub source_path: PathBuf,
    pub kind: MediaKind,
}

impl GenerationJob {
    /// Build a job for `path`, or `None` when its extension is not recognised
    pub fn classify(path: impl Into<PathBuf>) -> Option<Self> {
        let source_path = path.into();
        let kind = MediaKind::from_path(&source_path)?;
        Some(Self { source_path, kind })
    }
}

/// Identifies the listing a result belongs to, so consumers can discard
/// results from a directory that is no longer displayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BatchToken(u64);

impl BatchToken {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Outcome of one generation job
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub batch: BatchToken,
    /// The path exactly as submitted, whether or not generation succeeded
    pub source_path: PathBuf,
    pub kind: MediaKind,
    /// Absent when generation failed
    pub artifact_path: Option<PathBuf>,
    /// Artifact size, or a `max_dimension` square placeholder on failure
    pub dimensions: (u32, u32),
    pub from_cache: bool,
    pub error: Option<GenerationError>,
}

impl GenerationResult {
    fn from_outcome(
        batch: BatchToken,
        job: GenerationJob,
        outcome: Result<ThumbnailArtifact, GenerationError>,
        placeholder: u32,
    ) -> Self {
        match outcome {
            Ok(artifact) => Self {
                batch,
                source_path: job.source_path,
                kind: artifact.kind,
                artifact_path: Some(artifact.artifact_path),
                dimensions: (artifact.width, artifact.height),
                from_cache: artifact.from_cache,
                error: None,
            },
            Err(error) => Self {
                batch,
                source_path: job.source_path,
                kind: job.kind,
                artifact_path: None,
                dimensions: (placeholder, placeholder),
                from_cache: false,
                error: Some(error),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.artifact_path.is_some()
    }

    /// The artifact this result describes, if generation succeeded
    pub fn artifact(&self) -> Option<ThumbnailArtifact> {
        let artifact_path = self.artifact_path.clone()?;
        Some(ThumbnailArtifact {
            source_path: self.source_path.clone(),
            kind: self.kind,
            artifact_path,
            width: self.dimensions.0,
            height: self.dimensions.1,
            from_cache: self.from_cache,
        })
    }
}

/// Counts for a drained batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub cache_hits: usize,
    pub generated: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn record(&mut self, result: &GenerationResult) {
        self.total += 1;
        match (result.is_success(), result.from_cache) {
            (false, _) => self.failed += 1,
            (true, true) => self.cache_hits += 1,
            (true, false) => self.generated += 1,
        }
    }

    pub fn log_completion(&self, token: BatchToken) {
        info!(
            "Batch {} complete: {} results, {} generated, {} cached, {} failed",
            token.id(),
            self.total,
            self.generated,
            self.cache_hits,
            self.failed
        );
    }
}

/// Receiving end of a submitted batch.
///
/// Iterating blocks until the next result is ready and ends once every job
/// has either reported or been cancelled before starting.
pub struct ResultStream {
    token: BatchToken,
    queued: usize,
    receiver: Receiver<GenerationResult>,
    cancel_flag: Arc<AtomicBool>,
}

impl ResultStream {
    pub fn token(&self) -> BatchToken {
        self.token
    }

    /// Number of jobs dispatched for this batch (unrecognised files excluded)
    pub fn queued(&self) -> usize {
        self.queued
    }

    /// Drop every job of this batch that has not started yet
    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::Relaxed)
    }

    /// Non-blocking poll, for callers driving an event loop
    pub fn try_next(&self) -> Option<GenerationResult> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Wait at most `timeout` for the next result
    pub fn next_timeout(&self, timeout: Duration) -> Option<GenerationResult> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Drain the stream, tallying outcomes
    pub fn collect_summary(self) -> BatchSummary {
        let token = self.token;
        let mut summary = BatchSummary::default();
        for result in self {
            summary.record(&result);
        }
        summary.log_completion(token);
        summary
    }
}

impl Iterator for ResultStream {
    type Item = GenerationResult;

    fn next(&mut self) -> Option<Self::Item> {
        self.receiver.recv().ok()
    }
}

/// Fixed-size worker pool mapping listings to thumbnail jobs
pub struct GenerationScheduler {
    cache: Arc<ThumbnailCache>,
    pool: rayon::ThreadPool,
    workers: usize,
    next_batch: AtomicU64,
    current_batch: Mutex<Option<Arc<AtomicBool>>>,
}

impl GenerationScheduler {
    /// Create a scheduler sized by the cache's `workers` setting
    pub fn new(cache: Arc<ThumbnailCache>) -> Result<Self> {
        let workers = cache.config().workers;
        Self::with_workers(cache, workers)
    }

    pub fn with_workers(cache: Arc<ThumbnailCache>, workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("thumb-worker-{}", index))
            .build()
            .context("Failed to build thumbnail worker pool")?;

        Ok(Self {
            cache,
            pool,
            workers,
            next_batch: AtomicU64::new(1),
            current_batch: Mutex::new(None),
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn cache(&self) -> &Arc<ThumbnailCache> {
        &self.cache
    }

    /// Dispatch every recognised path in `listing` and return immediately.
    /// Unrecognised extensions are skipped without producing a result.
    pub fn submit<I, P>(&self, listing: I) -> ResultStream
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.dispatch(listing, Arc::new(AtomicBool::new(false)))
    }

    /// Like `submit`, but first cancels the unstarted jobs of the previous
    /// superseding batch. Use it for "the user opened another directory".
    pub fn submit_superseding<I, P>(&self, listing: I) -> ResultStream
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let cancel_flag = Arc::new(AtomicBool::new(false));
        if let Some(previous) = self.current_batch.lock().replace(Arc::clone(&cancel_flag)) {
            previous.store(true, Ordering::Relaxed);
        }
        self.dispatch(listing, cancel_flag)
    }

    /// Cancel the unstarted jobs of the latest superseding batch
    pub fn cancel_current(&self) {
        if let Some(flag) = self.current_batch.lock().take() {
            flag.store(true, Ordering::Relaxed);
        }
    }

    /// Generate a single thumbnail on the pool and wait for it.
    /// Returns `None` when the path is not a recognised media file.
    pub fn submit_one(&self, source_path: &Path) -> Option<GenerationResult> {
        let job = GenerationJob::classify(source_path)?;
        let token = self.next_token();
        let cache = Arc::clone(&self.cache);
        Some(self.pool.install(move || run_job(&cache, job, token)))
    }

    fn next_token(&self) -> BatchToken {
        BatchToken(self.next_batch.fetch_add(1, Ordering::Relaxed))
    }

    fn dispatch<I, P>(&self, listing: I, cancel_flag: Arc<AtomicBool>) -> ResultStream
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let token = self.next_token();
        let (sender, receiver) = mpsc::channel();
        let mut queued = 0;

        for path in listing {
            let path = path.into();
            let Some(job) = GenerationJob::classify(&path) else {
                debug!("Skipping unrecognised file {}", path.display());
                continue;
            };
            queued += 1;

            let sender = sender.clone();
            let cache = Arc::clone(&self.cache);
            let cancel_flag = Arc::clone(&cancel_flag);
            self.pool.spawn(move || {
                if cancel_flag.load(Ordering::Relaxed) {
                    return;
                }
                let result = run_job(&cache, job, token);
                // The consumer may have dropped the stream; nothing left to do then
                let _ = sender.send(result);
            });
        }

        info!("Dispatched batch {} with {} jobs", token.id(), queued);

        ResultStream {
            token,
            queued,
            receiver,
            cancel_flag,
        }
    }
}

impl Drop for GenerationScheduler {
    fn drop(&mut self) {
        self.cancel_current();
    }
}

/// Run one job to completion, turning failures and decoder panics into a result
fn run_job(cache: &ThumbnailCache, job: GenerationJob, token: BatchToken) -> GenerationResult {
    let started = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        cache.lookup_or_generate(&job.source_path, job.kind)
    }))
    .unwrap_or_else(|_| Err(GenerationError::unreadable(&job.source_path, "decoder panicked")));

    if let Err(e) = &outcome {
        warn!("Failed to generate thumbnail for {}: {}", job.source_path.display(), e);
    } else {
        debug!("Finished {} in {:?}", job.source_path.display(), started.elapsed());
    }

    GenerationResult::from_outcome(token, job, outcome, cache.config().max_dimension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::{ArtifactGenerator, Rendered};
    use crate::ThumbnailConfig;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::collections::HashSet;
    use std::io::Cursor;
    use std::sync::mpsc::Sender;
    use tempfile::{tempdir, TempDir};

    fn tiny_png() -> Vec<u8> {
        let mut bytes = Vec::new();
        RgbImage::from_pixel(4, 3, Rgb([1, 2, 3]))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    /// Succeeds for every path except those containing "bad"
    struct StubGenerator;

    impl ArtifactGenerator for StubGenerator {
        fn make_still(&self, source: &Path, _: u32) -> Result<Rendered, GenerationError> {
            if source.to_string_lossy().contains("bad") {
                return Err(GenerationError::unreadable(source, "stub rejects"));
            }
            Ok(Rendered { bytes: tiny_png(), width: 4, height: 3 })
        }

        fn make_loop(&self, source: &Path, max_dimension: u32, _: u32) -> Result<Rendered, GenerationError> {
            self.make_still(source, max_dimension)
        }
    }

    /// Reports when a job starts, then blocks until released
    struct GatedGenerator {
        started: std::sync::Mutex<Sender<PathBuf>>,
        release: std::sync::Mutex<Receiver<()>>,
    }

    impl ArtifactGenerator for GatedGenerator {
        fn make_still(&self, source: &Path, _: u32) -> Result<Rendered, GenerationError> {
            self.started.lock().unwrap().send(source.to_path_buf()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
            Ok(Rendered { bytes: tiny_png(), width: 4, height: 3 })
        }

        fn make_loop(&self, source: &Path, max_dimension: u32, _: u32) -> Result<Rendered, GenerationError> {
            self.make_still(source, max_dimension)
        }
    }

    struct PanickingGenerator;

    impl ArtifactGenerator for PanickingGenerator {
        fn make_still(&self, _: &Path, _: u32) -> Result<Rendered, GenerationError> {
            panic!("decoder bug");
        }

        fn make_loop(&self, _: &Path, _: u32, _: u32) -> Result<Rendered, GenerationError> {
            panic!("decoder bug");
        }
    }

    fn scheduler_with(
        generator: Arc<dyn ArtifactGenerator>,
        workers: usize,
    ) -> Result<(TempDir, GenerationScheduler)> {
        let temp_dir = tempdir()?;
        let config = ThumbnailConfig {
            cache_dir: temp_dir.path().join("thumbs"),
            ..ThumbnailConfig::default()
        };
        let cache = Arc::new(ThumbnailCache::with_generator(config, generator)?);
        Ok((temp_dir, GenerationScheduler::with_workers(cache, workers)?))
    }

    #[test]
    fn test_job_classification() {
        let job = GenerationJob::classify("/a/b.MOV").unwrap();
        assert_eq!(job.kind, MediaKind::Video);
        assert_eq!(job.source_path, PathBuf::from("/a/b.MOV"));
        assert!(GenerationJob::classify("/a/b.pdf").is_none());
    }

    #[test]
    fn test_submit_skips_unrecognised_files() -> Result<()> {
        let (_temp_dir, scheduler) = scheduler_with(Arc::new(StubGenerator), 2)?;
        let stream = scheduler.submit(["/m/a.jpg", "/m/notes.txt", "/m/b.mp4", "/m/c"]);
        assert_eq!(stream.queued(), 2);

        let results: Vec<_> = stream.collect();
        assert_eq!(results.len(), 2);
        let sources: HashSet<_> = results.iter().map(|r| r.source_path.clone()).collect();
        assert!(sources.contains(Path::new("/m/a.jpg")));
        assert!(sources.contains(Path::new("/m/b.mp4")));
        Ok(())
    }

    #[test]
    fn test_failures_are_isolated() -> Result<()> {
        let (_temp_dir, scheduler) = scheduler_with(Arc::new(StubGenerator), 3)?;
        let mut listing: Vec<String> = (0..10).map(|i| format!("/m/ok-{}.png", i)).collect();
        listing.push("/m/bad.png".to_string());

        let stream = scheduler.submit(listing);
        let token = stream.token();
        let results: Vec<_> = stream.collect();

        assert_eq!(results.len(), 11);
        assert!(results.iter().all(|r| r.batch == token));
        let failed: Vec<_> = results.iter().filter(|r| !r.is_success()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].source_path, PathBuf::from("/m/bad.png"));
        assert_eq!(failed[0].dimensions, (256, 256));
        assert_eq!(failed[0].error.as_ref().map(|e| e.kind()), Some("unreadable_source"));
        Ok(())
    }

    #[test]
    fn test_relative_paths_reported_as_submitted() -> Result<()> {
        let (_temp_dir, scheduler) = scheduler_with(Arc::new(StubGenerator), 2)?;
        let results: Vec<_> = scheduler.submit(["clips/good.png", "clips/bad.png"]).collect();
        assert_eq!(results.len(), 2);

        let good = results.iter().find(|r| r.is_success()).unwrap();
        let bad = results.iter().find(|r| !r.is_success()).unwrap();
        assert_eq!(good.source_path, PathBuf::from("clips/good.png"));
        assert_eq!(bad.source_path, PathBuf::from("clips/bad.png"));

        // Cache key still comes from the absolute form
        let absolute = std::path::absolute("clips/good.png")?;
        let expected = scheduler.cache().artifact_path(&absolute, MediaKind::Image);
        assert_eq!(good.artifact_path.as_ref(), Some(&expected));
        assert_eq!(good.artifact().unwrap().source_path, PathBuf::from("clips/good.png"));
        Ok(())
    }

    #[test]
    fn test_summary_counts_hits() -> Result<()> {
        let (_temp_dir, scheduler) = scheduler_with(Arc::new(StubGenerator), 2)?;
        let listing = ["/m/one.jpg", "/m/two.jpg", "/m/bad.jpg"];

        let first = scheduler.submit(listing).collect_summary();
        assert_eq!(first, BatchSummary { total: 3, cache_hits: 0, generated: 2, failed: 1 });

        let second = scheduler.submit(listing).collect_summary();
        assert_eq!(second, BatchSummary { total: 3, cache_hits: 2, generated: 0, failed: 1 });
        Ok(())
    }

    #[test]
    fn test_submit_one() -> Result<()> {
        let (_temp_dir, scheduler) = scheduler_with(Arc::new(StubGenerator), 1)?;

        let result = scheduler.submit_one(Path::new("/m/clip.webm")).unwrap();
        assert!(result.is_success());
        assert_eq!(result.kind, MediaKind::Video);
        assert_eq!(result.dimensions, (4, 3));
        let artifact = result.artifact().unwrap();
        assert_eq!(Some(&artifact.artifact_path), result.artifact_path.as_ref());
        assert_eq!((artifact.width, artifact.height), (4, 3));

        assert!(scheduler.submit_one(Path::new("/m/clip.srt")).is_none());
        Ok(())
    }

    #[test]
    fn test_batches_get_distinct_tokens() -> Result<()> {
        let (_temp_dir, scheduler) = scheduler_with(Arc::new(StubGenerator), 1)?;
        let a = scheduler.submit(["/m/a.jpg"]);
        let b = scheduler.submit(["/m/b.jpg"]);
        assert_ne!(a.token(), b.token());
        assert!(a.token() < b.token());
        Ok(())
    }

    #[test]
    fn test_cancel_drops_unstarted_jobs() -> Result<()> {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let generator = Arc::new(GatedGenerator {
            started: std::sync::Mutex::new(started_tx),
            release: std::sync::Mutex::new(release_rx),
        });
        let (_temp_dir, scheduler) = scheduler_with(generator, 1)?;

        let stream = scheduler.submit(["/m/1.jpg", "/m/2.jpg", "/m/3.jpg", "/m/4.jpg"]);
        assert_eq!(stream.queued(), 4);

        // The single worker is now busy with exactly one job
        started_rx.recv_timeout(Duration::from_secs(10))?;
        stream.cancel();
        release_tx.send(())?;

        let results: Vec<_> = stream.collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_success());
        Ok(())
    }

    #[test]
    fn test_superseding_batch_cancels_previous() -> Result<()> {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let generator = Arc::new(GatedGenerator {
            started: std::sync::Mutex::new(started_tx),
            release: std::sync::Mutex::new(release_rx),
        });
        let (_temp_dir, scheduler) = scheduler_with(generator, 1)?;

        let old = scheduler.submit_superseding(["/old/1.jpg", "/old/2.jpg", "/old/3.jpg"]);
        started_rx.recv_timeout(Duration::from_secs(10))?;

        let new = scheduler.submit_superseding(["/new/1.jpg", "/new/2.jpg"]);
        assert!(old.is_cancelled());
        assert!(!new.is_cancelled());

        for _ in 0..3 {
            release_tx.send(())?;
        }

        assert_eq!(old.count(), 1);
        let fresh: Vec<_> = new.collect();
        assert_eq!(fresh.len(), 2);
        assert!(fresh.iter().all(|r| r.source_path.starts_with("/new")));
        Ok(())
    }

    #[test]
    fn test_panicking_job_becomes_failed_result() -> Result<()> {
        let (_temp_dir, scheduler) = scheduler_with(Arc::new(PanickingGenerator), 2)?;
        let results: Vec<_> = scheduler.submit(["/m/a.jpg", "/m/b.jpg"]).collect();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.is_success()));
        Ok(())
    }
}
