mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::{AppConfig, Overrides};
use preview_scrub::{PreviewPlayer, PreviewScrubController};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thumbnail_cache::{
    BatchSummary, FfmpegSource, GenerationResult, GenerationScheduler, MediaKind, ThumbnailCache,
};
use tracing::info;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "media-browser")]
#[command(about = "Generate cached thumbnails and hover previews for media folders")]
struct Cli {
    /// JSON config file with `thumbnails` and `preview` sections
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding cached thumbnails
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Number of concurrent generation workers
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Longest thumbnail edge in pixels
    #[arg(long, global = true)]
    max_dimension: Option<u32>,

    /// Frames sampled into each video loop
    #[arg(long, global = true)]
    frames: Option<u32>,

    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate thumbnails for every image and video under a folder
    Scan {
        /// Folder to scan
        path: PathBuf,

        /// Descend into subfolders
        #[arg(short, long)]
        recursive: bool,

        /// Print one JSON object per result
        #[arg(long)]
        json: bool,
    },

    /// Generate (or fetch) the thumbnail for a single file
    Thumb {
        file: PathBuf,
    },

    /// Show the enlarged hover preview and, for videos, the scrub plan
    Preview {
        file: PathBuf,

        /// Video duration, instead of asking ffprobe
        #[arg(long)]
        duration_ms: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let overrides = Overrides {
        cache_dir: cli.cache_dir,
        workers: cli.workers,
        max_dimension: cli.max_dimension,
        frames: cli.frames,
    };
    let config = AppConfig::resolve(cli.config.as_deref(), &overrides)?;

    let cache = Arc::new(ThumbnailCache::new(config.thumbnails.clone())?);
    let scheduler = GenerationScheduler::new(cache)?;

    match cli.command {
        Commands::Scan { path, recursive, json } => scan_folder(&scheduler, &path, recursive, json),
        Commands::Thumb { file } => thumbnail_file(&scheduler, &file).map(|_| ()),
        Commands::Preview { file, duration_ms } => preview_file(&scheduler, &config, &file, duration_ms),
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Every regular file under `folder`, sorted; classification happens in the scheduler
fn list_files(folder: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    if !folder.is_dir() {
        bail!("Path is not a directory: {}", folder.display());
    }
    let folder = std::path::absolute(folder)
        .with_context(|| format!("Failed to resolve {}", folder.display()))?;

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut paths: Vec<PathBuf> = WalkDir::new(&folder)
        .max_depth(max_depth)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    paths.sort();
    Ok(paths)
}

fn scan_folder(scheduler: &GenerationScheduler, folder: &Path, recursive: bool, as_json: bool) -> Result<()> {
    let files = list_files(folder, recursive)?;
    info!(
        "Scanning {} files in {} with {} workers",
        files.len(),
        folder.display(),
        scheduler.workers()
    );

    let started = Instant::now();
    let stream = scheduler.submit(files);
    if stream.queued() == 0 {
        println!("⚠️  No supported media files found in {}", folder.display());
        return Ok(());
    }

    let token = stream.token();
    let mut summary = BatchSummary::default();
    for result in stream {
        summary.record(&result);
        print_result(&result, as_json)?;
    }
    summary.log_completion(token);

    if as_json {
        println!("{}", serde_json::to_string(&json!({ "summary": summary }))?);
    } else {
        println!(
            "✅ {} media files in {:.1?}: {} generated, {} cached, {} failed",
            summary.total,
            started.elapsed(),
            summary.generated,
            summary.cache_hits,
            summary.failed
        );
    }
    Ok(())
}

fn print_result(result: &GenerationResult, as_json: bool) -> Result<()> {
    if as_json {
        let line = json!({
            "batch": result.batch.id(),
            "source_path": result.source_path,
            "kind": result.kind,
            "artifact_path": result.artifact_path,
            "width": result.dimensions.0,
            "height": result.dimensions.1,
            "from_cache": result.from_cache,
            "error": result.error.as_ref().map(|e| json!({ "kind": e.kind(), "message": e.to_string() })),
        });
        println!("{}", serde_json::to_string(&line)?);
        return Ok(());
    }

    match (&result.artifact_path, &result.error) {
        (Some(artifact), _) => println!(
            "{} {} {}x{}{} -> {}",
            if result.kind == MediaKind::Video { "🎞️ " } else { "🖼️ " },
            result.source_path.display(),
            result.dimensions.0,
            result.dimensions.1,
            if result.from_cache { " (cached)" } else { "" },
            artifact.display()
        ),
        (None, Some(error)) => println!("❌ {}", error),
        (None, None) => println!("❌ {}: no thumbnail", result.source_path.display()),
    }
    Ok(())
}

fn thumbnail_file(scheduler: &GenerationScheduler, file: &Path) -> Result<GenerationResult> {
    let Some(result) = scheduler.submit_one(file) else {
        bail!("Not a recognised image or video file: {}", file.display());
    };
    print_result(&result, false)?;
    if let Some(error) = &result.error {
        bail!("Thumbnail generation failed ({})", error.kind());
    }
    Ok(result)
}

/// Prints the commands the scrub controller issues
struct ConsolePlayer;

impl PreviewPlayer for ConsolePlayer {
    fn play_muted(&mut self, source: &Path) {
        println!("▶️  play (muted) {}", source.display());
    }

    fn seek(&mut self, position_ms: u64) {
        println!("⏩ seek {}ms", position_ms);
    }

    fn stop(&mut self) {
        println!("⏹️  stop");
    }
}

fn preview_file(
    scheduler: &GenerationScheduler,
    config: &AppConfig,
    file: &Path,
    duration_ms: Option<u64>,
) -> Result<()> {
    let result = thumbnail_file(scheduler, file)?;
    let artifact = result.artifact().context("Thumbnail result has no artifact")?;

    let mut controller = PreviewScrubController::new(ConsolePlayer, config.preview.clone());
    let surface = controller.hover(&artifact);
    println!(
        "🔍 preview {}x{} from {}{}",
        surface.width,
        surface.height,
        surface.artifact_path.display(),
        if surface.animated { " (animated)" } else { "" }
    );

    if artifact.kind != MediaKind::Video {
        return Ok(());
    }

    let duration = match duration_ms {
        Some(ms) => Some(ms),
        None => FfmpegSource::open(
            &artifact.source_path,
            &config.thumbnails.ffprobe_path,
            &config.thumbnails.ffmpeg_path,
        )?
        .duration_ms(),
    };
    let Some(duration) = duration else {
        println!("⚠️  Duration unknown, preview would stay loading");
        return Ok(());
    };

    controller.metadata_ready(i64::try_from(duration).unwrap_or(i64::MAX));

    // Play one full cycle through the jump points
    let segment = config.preview.segment_duration_ms;
    let points = controller
        .session()
        .map(|s| s.jump_points.clone())
        .unwrap_or_default();
    for point in &points {
        controller.position_update(point + segment);
    }
    controller.close();
    Ok(())
}
