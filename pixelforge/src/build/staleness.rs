//! Timestamp-based staleness check.

use std::fmt;
use std::io::ErrorKind;
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use pixelforge_shared::errors::{PixelforgeError, PixelforgeResult};

/// Relationship between a source file and its built executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// Executable exists and is at least as new as the source.
    Fresh,
    /// No executable at the target path.
    Missing,
    /// Executable is older than the source.
    Stale {
        source: SystemTime,
        artifact: SystemTime,
    },
    /// One side has no modification time; treated as stale.
    NoTimestamp,
}

impl Staleness {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Staleness::Fresh)
    }
}

impl fmt::Display for Staleness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Staleness::Fresh => write!(f, "up to date"),
            Staleness::Missing => write!(f, "executable missing"),
            Staleness::Stale { source, artifact } => write!(
                f,
                "source modified {} after executable built {}",
                DateTime::<Utc>::from(*source).to_rfc3339(),
                DateTime::<Utc>::from(*artifact).to_rfc3339()
            ),
            Staleness::NoTimestamp => write!(f, "modification time unavailable"),
        }
    }
}

/// Compare modification times of `source` and `executable`.
///
/// # Errors
///
/// - `SourceMissing` if the source file does not exist
/// - `Io` if either path exists but cannot be inspected
pub async fn check(source: &Path, executable: &Path) -> PixelforgeResult<Staleness> {
    let source_meta = match tokio::fs::metadata(source).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(PixelforgeError::SourceMissing(source.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    let artifact_meta = match tokio::fs::metadata(executable).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Staleness::Missing),
        Err(e) => return Err(e.into()),
    };

    let (Ok(source), Ok(artifact)) = (source_meta.modified(), artifact_meta.modified()) else {
        return Ok(Staleness::NoTimestamp);
    };

    if artifact >= source {
        Ok(Staleness::Fresh)
    } else {
        Ok(Staleness::Stale { source, artifact })
    }
}
