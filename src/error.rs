use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failures of a single preparation step.
///
/// The orchestrator treats every variant as fatal for the current segment
/// only; the run continues with the next segment.
#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    #[error(
        "frame {frame_id}: detection expects {}x{}, decoded frame is {}x{}",
        expected.0, expected.1, actual.0, actual.1
    )]
    ResolutionMismatch {
        frame_id: u64,
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("malformed detection record in {}: {reason}", path.display())]
    MalformedRecord { path: PathBuf, reason: String },

    #[error("{tool} failed: {reason}")]
    Extract { tool: String, reason: String },

    #[error("failed to write {}: {reason}", path.display())]
    Encode { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("face detector failed: {0}")]
    Detector(String),
}

impl PrepareError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        PrepareError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn decode(path: &Path, reason: impl Into<String>) -> Self {
        PrepareError::Decode {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn malformed(path: &Path, reason: impl Into<String>) -> Self {
        PrepareError::MalformedRecord {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn encode(path: &Path, reason: impl std::fmt::Display) -> Self {
        PrepareError::Encode {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

pub type PrepareResult<T> = std::result::Result<T, PrepareError>;
