//! Process spawning for pipeline stages.

use std::time::Instant;

use pixelforge_shared::errors::{PixelforgeError, PixelforgeResult};
use tokio::process::Child;

use super::stage::StageSpec;
use crate::util::kill_process_group;

/// A stage process that has been started but not yet wired.
pub(crate) struct SpawnedStage {
    pub child: Child,
    pub pid: Option<u32>,
    pub started: Instant,
}

/// Spawns every stage before any stream is wired.
///
/// If stage `k` fails to start, stages `0..k` are killed and reaped before
/// the error is returned.
///
/// # Returns
/// * `Ok(Vec<SpawnedStage>)` - One running process per stage, in order
/// * `Err(SpawnFailed)` - The first stage that could not be started
pub(crate) async fn spawn_stages(stages: &[StageSpec]) -> PixelforgeResult<Vec<SpawnedStage>> {
    let mut spawned = Vec::with_capacity(stages.len());

    for (index, spec) in stages.iter().enumerate() {
        match spawn_stage(index, spec) {
            Ok(stage) => spawned.push(stage),
            Err(e) => {
                reap_all(spawned).await;
                return Err(e);
            }
        }
    }

    Ok(spawned)
}

fn spawn_stage(index: usize, spec: &StageSpec) -> PixelforgeResult<SpawnedStage> {
    let child = spec.command().spawn().map_err(|e| {
        tracing::error!(
            stage = index,
            command = %spec.command_line(),
            error = %e,
            "Failed to spawn pipeline stage"
        );
        PixelforgeError::SpawnFailed {
            stage: index,
            program: spec.program().display().to_string(),
            reason: e.to_string(),
        }
    })?;

    let pid = child.id();
    tracing::debug!(stage = index, pid = ?pid, command = %spec.command_line(), "Spawned pipeline stage");

    Ok(SpawnedStage {
        child,
        pid,
        started: Instant::now(),
    })
}

/// Kill and reap stages that will never be wired.
async fn reap_all(spawned: Vec<SpawnedStage>) {
    for mut stage in spawned {
        if let Some(pgid) = stage.pid {
            kill_process_group(pgid);
        }
        let _ = stage.child.start_kill();
        if let Err(e) = stage.child.wait().await {
            tracing::warn!(pid = ?stage.pid, error = %e, "Failed to reap stage after spawn failure");
        }
    }
}
