//! Jump-scrub state machine for video hover previews
//!
//! ```text
//! Idle --open--> Loading --metadata_ready(d > 0)--> Scrubbing --position_update--> Scrubbing
//!   \______________\_________________________________\__close / superseded__> Closed
//! ```
//!
//! The controller is driven entirely by discrete events from the preview
//! surface (`open`, `metadata_ready`, `position_update`, `close`) and issues
//! commands to a `PreviewPlayer`. Nothing here blocks or spawns; the owning
//! event loop calls in from a single thread.

use crate::geometry::PreviewSurface;
use crate::PreviewConfig;
use std::path::{Path, PathBuf};
use thumbnail_cache::{MediaKind, ThumbnailArtifact};
use tracing::debug;

/// Media backend behind the preview surface
pub trait PreviewPlayer {
    /// Start playback of `source` from the beginning with audio muted
    fn play_muted(&mut self, source: &Path);

    fn seek(&mut self, position_ms: u64);

    /// Stop playback and release the media handle
    fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrubState {
    Idle,
    /// Playing, waiting for the stream duration
    Loading,
    Scrubbing,
    /// Terminal for the session
    Closed,
}

/// State of one open video preview
#[derive(Debug, Clone)]
pub struct ScrubSession {
    pub source_path: PathBuf,
    pub jump_points: Vec<u64>,
    pub current_index: usize,
    pub is_ready: bool,
    state: ScrubState,
    seek_target_ms: u64,
    last_position_ms: Option<u64>,
    /// Set by a backward seek: reports at or past this position still
    /// describe playback from before the seek
    stale_from_ms: Option<u64>,
}

impl ScrubSession {
    fn new(source_path: &Path) -> Self {
        Self {
            source_path: source_path.to_path_buf(),
            jump_points: Vec::new(),
            current_index: 0,
            is_ready: false,
            state: ScrubState::Idle,
            seek_target_ms: 0,
            last_position_ms: None,
            stale_from_ms: None,
        }
    }

    pub fn state(&self) -> ScrubState {
        self.state
    }

    fn begin_seek(&mut self, target_ms: u64) -> u64 {
        let backward = target_ms < self.seek_target_ms;
        self.seek_target_ms = target_ms;
        self.stale_from_ms = self
            .last_position_ms
            .filter(|&last| backward && last > target_ms);
        target_ms
    }
}

/// `floor(i * total_duration_ms / segments)` for `i in 0..segments`
pub fn jump_points(total_duration_ms: u64, segments: u32) -> Vec<u64> {
    let segments = u64::from(segments.max(1));
    (0..segments)
        .map(|i| (u128::from(i) * u128::from(total_duration_ms) / u128::from(segments)) as u64)
        .collect()
}

/// Owns at most one `ScrubSession` and the player it drives
pub struct PreviewScrubController<P: PreviewPlayer> {
    player: P,
    config: PreviewConfig,
    session: Option<ScrubSession>,
}

impl<P: PreviewPlayer> PreviewScrubController<P> {
    pub fn new(player: P, config: PreviewConfig) -> Self {
        Self {
            player,
            config,
            session: None,
        }
    }

    /// State of the current session; `Idle` when none was ever opened
    pub fn state(&self) -> ScrubState {
        self.session
            .as_ref()
            .map(ScrubSession::state)
            .unwrap_or(ScrubState::Idle)
    }

    pub fn session(&self) -> Option<&ScrubSession> {
        self.session.as_ref()
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    pub fn config(&self) -> &PreviewConfig {
        &self.config
    }

    /// Handle a hover over a grid item: supersede any running preview, start
    /// scrubbing for videos, and return the enlarged surface to display
    pub fn hover(&mut self, artifact: &ThumbnailArtifact) -> PreviewSurface {
        self.close();
        if artifact.kind == MediaKind::Video {
            self.open(&artifact.source_path);
        } else {
            self.session = None;
        }
        PreviewSurface::for_artifact(artifact, &self.config)
    }

    /// Open a fresh session for `source`, tearing down the previous one first
    pub fn open(&mut self, source: &Path) {
        self.close();

        let mut session = ScrubSession::new(source);
        self.player.play_muted(source);
        session.state = ScrubState::Loading;
        debug!("Preview loading {}", source.display());
        self.session = Some(session);
    }

    /// Stream metadata arrived. Non-positive durations leave the session
    /// loading until it is closed.
    pub fn metadata_ready(&mut self, total_duration_ms: i64) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.state != ScrubState::Loading {
            return;
        }
        if total_duration_ms <= 0 {
            debug!(
                "Ignoring duration {}ms for {}",
                total_duration_ms,
                session.source_path.display()
            );
            return;
        }

        session.jump_points = jump_points(total_duration_ms as u64, self.config.segments);
        session.current_index = 0;
        session.is_ready = true;
        session.state = ScrubState::Scrubbing;
        let target = session.begin_seek(session.jump_points[0]);
        self.player.seek(target);
        debug!(
            "Scrubbing {} through {:?}",
            session.source_path.display(),
            session.jump_points
        );
    }

    /// Playback position changed. Once a full segment has played since the
    /// last seek, hop to the next jump point, wrapping to the first.
    ///
    /// Positions short of the seek target were reported before the seek
    /// landed and are ignored. After a backward seek the same holds for
    /// positions at or past where playback was when the seek was issued,
    /// until the first report below that point.
    pub fn position_update(&mut self, position_ms: u64) {
        let segment = self.config.segment_duration_ms;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.state == ScrubState::Closed {
            return;
        }
        session.last_position_ms = Some(position_ms);
        if session.state != ScrubState::Scrubbing {
            return;
        }

        if let Some(stale_from) = session.stale_from_ms {
            if position_ms >= stale_from {
                return;
            }
            session.stale_from_ms = None;
        }
        if position_ms < session.seek_target_ms {
            return;
        }
        if position_ms - session.seek_target_ms < segment {
            return;
        }

        session.current_index = (session.current_index + 1) % session.jump_points.len();
        let target = session.begin_seek(session.jump_points[session.current_index]);
        self.player.seek(target);
    }

    /// Stop playback and mark the session closed. Idempotent.
    pub fn close(&mut self) {
        if let Some(session) = self.session.as_mut() {
            if session.state != ScrubState::Closed {
                self.player.stop();
                session.state = ScrubState::Closed;
                session.is_ready = false;
                debug!("Preview closed for {}", session.source_path.display());
            }
        }
    }
}

impl<P: PreviewPlayer> Drop for PreviewScrubController<P> {
    fn drop(&mut self) {
        self.close();
    }
}
