//! Staleness-driven build cache for a single native executable.
//!
//! `ensure` rebuilds only when the executable is missing or older than its
//! source. Concurrent callers for the same executable share one build: the
//! first takes the per-artifact lock and builds, the rest wait on the lock,
//! re-check staleness and find the fresh artifact.

mod command;
mod staleness;

pub use command::{BuildCommand, OUTPUT_PLACEHOLDER, SOURCE_PLACEHOLDER};

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pixelforge_shared::errors::{ExitInfo, PixelforgeError, PixelforgeResult};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;

use crate::util::kill_process_group;

/// What `ensure` had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Existing executable was up to date.
    Fresh,
    /// Executable was (re)built.
    Rebuilt,
}

pub struct BuildCache {
    command: BuildCommand,
    timeout: Option<Duration>,
    /// One async lock per executable path.
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl BuildCache {
    pub fn new(command: BuildCommand) -> Self {
        Self {
            command,
            timeout: None,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Kill the build tool and fail with `Timeout` after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub async fn is_fresh(&self, source: &Path, executable: &Path) -> PixelforgeResult<bool> {
        Ok(staleness::check(source, executable).await?.is_fresh())
    }

    /// Make sure `executable` is a build of the current `source`.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if either path is empty
    /// - `SourceMissing` if the source does not exist
    /// - `ToolMissing` if the build program cannot be executed
    /// - `BuildFailed` if the build program exits non-zero or writes nothing
    /// - `Timeout` if a configured build timeout expires
    pub async fn ensure(&self, source: &Path, executable: &Path) -> PixelforgeResult<BuildOutcome> {
        if source.as_os_str().is_empty() || executable.as_os_str().is_empty() {
            return Err(PixelforgeError::InvalidArgument(
                "source and executable paths must be non-empty".into(),
            ));
        }

        // Fast path: no lock for the common cache hit
        if staleness::check(source, executable).await?.is_fresh() {
            tracing::trace!(executable = %executable.display(), "Executable up to date");
            return Ok(BuildOutcome::Fresh);
        }

        let lock = self.artifact_lock(executable);
        let _guard = lock.lock().await;

        // Double-check: another request may have rebuilt while we waited
        let staleness = staleness::check(source, executable).await?;
        if staleness.is_fresh() {
            tracing::debug!(executable = %executable.display(), "Executable rebuilt by concurrent request");
            return Ok(BuildOutcome::Fresh);
        }

        tracing::info!(
            source = %source.display(),
            executable = %executable.display(),
            reason = %staleness,
            "Compiling executable"
        );
        let start = Instant::now();

        ensure_parent_dir(executable).await?;
        self.build(source, executable).await?;

        tracing::info!(
            executable = %executable.display(),
            elapsed_ms = start.elapsed().as_millis(),
            "Compilation finished"
        );
        Ok(BuildOutcome::Rebuilt)
    }

    fn artifact_lock(&self, executable: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(executable.to_path_buf()).or_default())
    }

    /// Run the build tool into a temporary sibling, then rename it into place.
    async fn build(&self, source: &Path, executable: &Path) -> PixelforgeResult<()> {
        let staging = staging_path(executable);
        let command_line = self.command.command_line(source, &staging);

        // Own process group: a timeout must also stop the tool's subprocesses
        // before the staging file is cleaned up.
        let mut cmd = tokio::process::Command::new(&self.command.program);
        cmd.args(self.command.render_args(source, &staging))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                tracing::error!(program = %self.command.program, error = %e, "Build tool unavailable");
                PixelforgeError::ToolMissing {
                    program: self.command.program.clone(),
                }
            }
            _ => PixelforgeError::Io(e),
        })?;
        let pgid = child.id();

        let start = Instant::now();
        let finished = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, collect_build_output(&mut child))
                .await
                .ok(),
            None => Some(collect_build_output(&mut child).await),
        };

        let Some(result) = finished else {
            if let Some(pgid) = pgid {
                kill_process_group(pgid);
            }
            let _ = child.start_kill();
            if let Err(e) = child.wait().await {
                tracing::warn!(pid = ?pgid, error = %e, "Failed to reap timed out build");
            }
            remove_staging(&staging).await;
            tracing::error!(command = %command_line, "Build timed out");
            return Err(PixelforgeError::Timeout {
                operation: format!("build of {}", executable.display()),
                elapsed_ms: start.elapsed().as_millis(),
            });
        };

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                remove_staging(&staging).await;
                return Err(e.into());
            }
        };

        if !output.status.success() {
            remove_staging(&staging).await;
            let mut diagnostics = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
            if diagnostics.is_empty() {
                diagnostics = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
            }
            tracing::error!(
                command = %command_line,
                exit = %ExitInfo::from(output.status),
                diagnostics = %diagnostics,
                "Build failed"
            );
            return Err(PixelforgeError::BuildFailed {
                command: command_line,
                diagnostics,
            });
        }

        if tokio::fs::metadata(&staging).await.is_err() {
            return Err(PixelforgeError::BuildFailed {
                command: command_line,
                diagnostics: format!(
                    "build tool exited successfully but wrote nothing to {}",
                    staging.display()
                ),
            });
        }

        if let Err(e) = tokio::fs::rename(&staging, executable).await {
            remove_staging(&staging).await;
            return Err(e.into());
        }

        Ok(())
    }
}

/// Wait for the build tool while draining both of its output streams.
///
/// The child stays owned by the caller so it can still be killed if this is
/// cancelled.
async fn collect_build_output(child: &mut Child) -> std::io::Result<Output> {
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    let (status, stdout, stderr) = tokio::try_join!(
        child.wait(),
        read_stream(stdout.as_mut()),
        read_stream(stderr.as_mut()),
    )?;

    Ok(Output {
        status,
        stdout,
        stderr,
    })
}

async fn read_stream<R>(reader: Option<&mut R>) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(reader) = reader {
        reader.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

fn staging_path(executable: &Path) -> PathBuf {
    let mut name = executable
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(format!(".build-{}", uuid::Uuid::new_v4().simple()));
    executable.with_file_name(name)
}

async fn remove_staging(staging: &Path) {
    if let Err(e) = tokio::fs::remove_file(staging).await {
        if e.kind() != ErrorKind::NotFound {
            tracing::warn!(path = %staging.display(), error = %e, "Failed to remove staging file");
        }
    }
}

async fn ensure_parent_dir(executable: &Path) -> PixelforgeResult<()> {
    let Some(parent) = executable.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    tokio::fs::create_dir_all(parent).await.map_err(|e| {
        PixelforgeError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to create {}: {}", parent.display(), e),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_path_is_a_unique_sibling() {
        let exe = Path::new("/work/tmp/mandelbrot");
        let a = staging_path(exe);
        let b = staging_path(exe);

        assert_eq!(a.parent(), exe.parent());
        assert!(
            a.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("mandelbrot.build-")
        );
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_empty_paths_rejected() {
        let cache = BuildCache::new(BuildCommand::default());
        let err = cache
            .ensure(Path::new(""), Path::new("tmp/exe"))
            .await
            .unwrap_err();
        assert!(matches!(err, PixelforgeError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_artifact_lock_shared_per_path() {
        let cache = BuildCache::new(BuildCommand::default());
        let a = cache.artifact_lock(Path::new("tmp/a"));
        let a2 = cache.artifact_lock(Path::new("tmp/a"));
        let b = cache.artifact_lock(Path::new("tmp/b"));
        assert!(Arc::ptr_eq(&a, &a2));
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
