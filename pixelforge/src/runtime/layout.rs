//! Filesystem layout: one work directory, one source file.

use std::path::{Path, PathBuf};

use pixelforge_shared::errors::{PixelforgeError, PixelforgeResult};

use super::options::PixelforgeOptions;

#[derive(Debug, Clone)]
pub struct FilesystemLayout {
    work_dir: PathBuf,
    source: PathBuf,
    executable: PathBuf,
}

impl FilesystemLayout {
    pub fn new(options: &PixelforgeOptions) -> Self {
        Self {
            work_dir: options.work_dir.clone(),
            source: options.source.clone(),
            executable: options.executable_path(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Create the work directory. Existing directories are left alone.
    pub async fn prepare(&self) -> PixelforgeResult<()> {
        tokio::fs::create_dir_all(&self.work_dir).await.map_err(|e| {
            PixelforgeError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to create work dir {}: {}", self.work_dir.display(), e),
            ))
        })
    }
}
