//! Per-job failure taxonomy
//!
//! Generation failures stay local to one job; the scheduler carries them
//! inside a `GenerationResult` instead of aborting the batch.

use std::fmt::Display;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// Missing file, permission denied, or a format the decoder rejects
    #[error("Unreadable source {path}: {reason}")]
    UnreadableSource { path: PathBuf, reason: String },

    #[error("Video reports zero frames: {path}")]
    NoFrames { path: PathBuf },

    /// Every sampled frame failed to decode
    #[error("No sampled frame could be decoded from {path}")]
    DecodeFailure { path: PathBuf },

    #[error("Failed to encode thumbnail for {path}: {reason}")]
    EncodeFailure { path: PathBuf, reason: String },

    #[error("Failed to write cache file {path}: {reason}")]
    CacheWriteFailure { path: PathBuf, reason: String },
}

impl GenerationError {
    pub fn unreadable(path: &Path, reason: impl Display) -> Self {
        Self::UnreadableSource {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub fn encode(path: &Path, reason: impl Display) -> Self {
        Self::EncodeFailure {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub fn cache_write(path: &Path, reason: impl Display) -> Self {
        Self::CacheWriteFailure {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Short stable name of the failure kind, for logs and machine output
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnreadableSource { .. } => "unreadable_source",
            Self::NoFrames { .. } => "no_frames",
            Self::DecodeFailure { .. } => "decode_failure",
            Self::EncodeFailure { .. } => "encode_failure",
            Self::CacheWriteFailure { .. } => "cache_write_failure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_path() {
        let err = GenerationError::unreadable(Path::new("/tmp/a.jpg"), "permission denied");
        assert_eq!(err.to_string(), "Unreadable source /tmp/a.jpg: permission denied");
        assert_eq!(err.kind(), "unreadable_source");

        let err = GenerationError::NoFrames { path: PathBuf::from("/tmp/b.mp4") };
        assert!(err.to_string().contains("/tmp/b.mp4"));
        assert_eq!(err.kind(), "no_frames");
    }
}
