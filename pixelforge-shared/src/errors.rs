//! Error types shared by every pixelforge crate.

use std::fmt;
use std::path::PathBuf;
use std::process::ExitStatus;

use serde::{Deserialize, Serialize};

/// Result alias used throughout pixelforge.
pub type PixelforgeResult<T> = Result<T, PixelforgeError>;

/// How a child process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitInfo {
    /// Exited normally with the given code.
    Code(i32),
    /// Terminated by a signal (Unix only).
    Signal(i32),
    /// Neither a code nor a signal was reported.
    Unknown,
}

impl ExitInfo {
    pub fn success(&self) -> bool {
        matches!(self, ExitInfo::Code(0))
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitInfo::Code(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitInfo::Signal(signal);
            }
        }

        ExitInfo::Unknown
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitInfo::Code(code) => write!(f, "exit code {}", code),
            ExitInfo::Signal(signal) => write!(f, "killed by signal {}", signal),
            ExitInfo::Unknown => write!(f, "unknown exit status"),
        }
    }
}

/// Every failure the build cache, pipeline executor and renderer can report.
///
/// Variants carry full operator-facing detail (commands, diagnostics). The
/// HTTP boundary never echoes them to clients.
#[derive(Debug, thiserror::Error)]
pub enum PixelforgeError {
    #[error("source file does not exist: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("build tool not found or not executable: {program}")]
    ToolMissing { program: String },

    #[error("build failed: {command}\n{diagnostics}")]
    BuildFailed {
        command: String,
        diagnostics: String,
    },

    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("failed to spawn stage {stage} ({program}): {reason}")]
    SpawnFailed {
        stage: usize,
        program: String,
        reason: String,
    },

    #[error("stage {stage} ({program}) failed with {exit}\n{diagnostics}")]
    StageFailed {
        stage: usize,
        program: String,
        exit: ExitInfo,
        diagnostics: String,
    },

    #[error("{operation} timed out after {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u128 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PixelforgeError {
    /// Index of the pipeline stage this error is attributed to, if any.
    pub fn stage(&self) -> Option<usize> {
        match self {
            PixelforgeError::SpawnFailed { stage, .. } | PixelforgeError::StageFailed { stage, .. } => {
                Some(*stage)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_info_display() {
        assert_eq!(ExitInfo::Code(2).to_string(), "exit code 2");
        assert_eq!(ExitInfo::Signal(9).to_string(), "killed by signal 9");
        assert!(ExitInfo::Code(0).success());
        assert!(!ExitInfo::Code(1).success());
        assert!(!ExitInfo::Signal(15).success());
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_info_from_status() {
        use std::os::unix::process::ExitStatusExt;

        // Raw wait status: exit code lives in the high byte, signal in the low bits.
        assert_eq!(ExitInfo::from(ExitStatus::from_raw(3 << 8)), ExitInfo::Code(3));
        assert_eq!(ExitInfo::from(ExitStatus::from_raw(9)), ExitInfo::Signal(9));
    }

    #[test]
    fn test_stage_attribution() {
        let err = PixelforgeError::StageFailed {
            stage: 1,
            program: "convert".into(),
            exit: ExitInfo::Code(1),
            diagnostics: String::new(),
        };
        assert_eq!(err.stage(), Some(1));
        assert_eq!(PixelforgeError::Internal("x".into()).stage(), None);
    }
}
