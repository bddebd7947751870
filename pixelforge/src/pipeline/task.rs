//! Concurrent tasks that make up one pipeline run.
//!
//! Every run is a flat set of these futures joined at a single point:
//! - one copy per inter-stage link
//! - one drain per piped diagnostic stream
//! - one collection of the terminal stage's output
//! - one exit wait per stage
//!
//! None of them blocks another, so a stage that floods its diagnostic stream
//! cannot stall the stage writing into it.

use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use pixelforge_shared::errors::{ExitInfo, PixelforgeResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::watch;

const READ_CHUNK: usize = 8 * 1024;

/// What a finished task reports back to the join point.
#[derive(Debug)]
pub(crate) enum TaskOutput {
    Exited {
        stage: usize,
        exit: ExitInfo,
        elapsed: Duration,
    },
    Drained {
        stage: usize,
        retained: Vec<u8>,
        total: u64,
    },
    Copied {
        from: usize,
        bytes: Option<u64>,
    },
    Collected(Vec<u8>),
}

pub(crate) type BoxedTask = BoxFuture<'static, PixelforgeResult<TaskOutput>>;

/// Copy upstream output into downstream input until EOF, then close the input.
///
/// A downstream that stops reading early (broken pipe) ends the copy without
/// error; its exit status decides the verdict. An aborted run abandons the copy.
pub(crate) fn copy_link<R, W>(
    from: usize,
    mut reader: R,
    mut writer: W,
    mut abort: watch::Receiver<bool>,
) -> BoxedTask
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    Box::pin(async move {
        let copied = unless_aborted(tokio::io::copy(&mut reader, &mut writer), &mut abort).await;
        let bytes = match copied {
            Some(Ok(bytes)) => Some(bytes),
            Some(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                tracing::debug!(stage = from + 1, "Downstream closed its input early");
                None
            }
            Some(Err(e)) => return Err(e.into()),
            None => {
                tracing::debug!(stage = from, "Link copy abandoned on abort");
                return Ok(TaskOutput::Copied { from, bytes: None });
            }
        };

        if bytes.is_some() {
            match writer.shutdown().await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(e.into()),
            }
        }
        drop(writer);

        tracing::trace!(stage = from, bytes = ?bytes, "Link copy finished");
        Ok(TaskOutput::Copied { from, bytes })
    })
}

/// Consume a diagnostic stream to EOF, keeping at most `limit` bytes.
///
/// On abort, whatever was read so far is reported.
pub(crate) fn drain_diagnostics<R>(
    stage: usize,
    mut reader: R,
    limit: usize,
    mut abort: watch::Receiver<bool>,
) -> BoxedTask
where
    R: AsyncRead + Unpin + Send + 'static,
{
    Box::pin(async move {
        let mut retained = Vec::new();
        let mut total = 0u64;

        let drained = drain_into(&mut reader, limit, &mut retained, &mut total);
        if let Some(result) = unless_aborted(drained, &mut abort).await {
            result?;
        }

        Ok(TaskOutput::Drained {
            stage,
            retained,
            total,
        })
    })
}

async fn drain_into<R>(
    reader: &mut R,
    limit: usize,
    retained: &mut Vec<u8>,
    total: &mut u64,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        *total += n as u64;
        let room = limit.saturating_sub(retained.len());
        retained.extend_from_slice(&buf[..n.min(room)]);
    }
}

/// Read the terminal stage's output fully into memory.
pub(crate) fn collect_output<R>(mut reader: R, mut abort: watch::Receiver<bool>) -> BoxedTask
where
    R: AsyncRead + Unpin + Send + 'static,
{
    Box::pin(async move {
        let mut output = Vec::new();
        if let Some(result) = unless_aborted(reader.read_to_end(&mut output), &mut abort).await {
            result?;
        }
        Ok(TaskOutput::Collected(output))
    })
}

/// Wait for a stage to exit, killing it first if the run is aborted.
pub(crate) fn wait_for_exit(
    stage: usize,
    mut child: Child,
    started: Instant,
    mut abort: watch::Receiver<bool>,
) -> BoxedTask {
    Box::pin(async move {
        let status = tokio::select! {
            status = child.wait() => status?,
            () = abort_requested(&mut abort) => {
                tracing::debug!(stage, pid = ?child.id(), "Killing stage");
                // Already-exited children report InvalidInput here; wait() still reaps.
                let _ = child.start_kill();
                child.wait().await?
            }
        };

        Ok(TaskOutput::Exited {
            stage,
            exit: ExitInfo::from(status),
            elapsed: started.elapsed(),
        })
    })
}

/// `Some(output)` if `work` finished first, `None` if the run was aborted.
async fn unless_aborted<F: Future>(
    work: F,
    abort: &mut watch::Receiver<bool>,
) -> Option<F::Output> {
    tokio::select! {
        output = work => Some(output),
        () = abort_requested(abort) => None,
    }
}

async fn abort_requested(abort: &mut watch::Receiver<bool>) {
    let requested = abort.wait_for(|abort| *abort).await.is_ok();
    if !requested {
        // Sender gone without aborting: nothing will ever ask us to kill.
        std::future::pending::<()>().await;
    }
}
