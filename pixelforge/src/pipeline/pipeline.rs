//! Process pipeline validation and execution.

use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use pixelforge_shared::errors::{ExitInfo, PixelforgeError, PixelforgeResult};
use tokio::sync::watch;

use super::metrics::{PipelineMetrics, StageMetrics};
use super::result::{PipelineResult, StageVerdict};
use super::spawn::{SpawnedStage, spawn_stages};
use super::stage::StageSpec;
use super::task::{self, BoxedTask, TaskOutput};
use crate::util::kill_process_group;

/// Default cap on retained diagnostic output per stage.
pub const DEFAULT_MAX_DIAGNOSTIC_BYTES: usize = 64 * 1024;

/// A validated, ordered list of stages.
///
/// For every adjacent pair, the upstream stage pipes its output and the
/// downstream stage pipes its input.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<StageSpec>,
}

impl Pipeline {
    pub fn new(stages: Vec<StageSpec>) -> PixelforgeResult<Self> {
        if stages.is_empty() {
            return Err(PixelforgeError::InvalidPipeline(
                "pipeline has no stages".into(),
            ));
        }

        for (index, pair) in stages.windows(2).enumerate() {
            let (upstream, downstream) = (&pair[0], &pair[1]);
            if !upstream.streams().stdout {
                return Err(PixelforgeError::InvalidPipeline(format!(
                    "stage {} ({}) feeds stage {} but does not pipe its output",
                    index,
                    upstream.program().display(),
                    index + 1
                )));
            }
            if !downstream.streams().stdin {
                return Err(PixelforgeError::InvalidPipeline(format!(
                    "stage {} ({}) follows stage {} but does not pipe its input",
                    index + 1,
                    downstream.program().display(),
                    index
                )));
            }
        }

        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct PipelineBuilder {
    stages: Vec<StageSpec>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: StageSpec) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn build(self) -> PixelforgeResult<Pipeline> {
        Pipeline::new(self.stages)
    }
}

/// Per-run execution settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Kill every stage and fail with `Timeout` once this elapses.
    pub deadline: Option<Duration>,
    pub max_diagnostic_bytes: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            deadline: None,
            max_diagnostic_bytes: DEFAULT_MAX_DIAGNOSTIC_BYTES,
        }
    }
}

impl RunOptions {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Pipeline executor.
///
/// Runs every stage as its own process and returns the terminal stage's
/// output once all processes have been reaped.
pub struct PipelineExecutor;

impl PipelineExecutor {
    /// Execute a pipeline.
    ///
    /// All stages are spawned up front, then a single join point waits on
    /// every link copy, diagnostic drain, output collection and process exit
    /// together. Nothing is returned while a child is still running.
    ///
    /// # Errors
    ///
    /// - `SpawnFailed` if a stage cannot be started (earlier stages are reaped)
    /// - `Timeout` if the deadline expires (all stages are killed first)
    /// - `Io` if a stream task fails (all stages are killed first)
    /// - `StageFailed` for the lowest-indexed stage with a non-zero exit
    pub async fn run(pipeline: &Pipeline, options: &RunOptions) -> PixelforgeResult<PipelineResult> {
        let total_start = Instant::now();
        let stages = pipeline.stages();

        let spawned = spawn_stages(stages).await?;
        let pids: Vec<Option<u32>> = spawned.iter().map(|stage| stage.pid).collect();

        let (abort_tx, abort_rx) = watch::channel(false);
        let tasks = wire(spawned, options, &abort_rx)?;

        let mut state = RunState::new(stages.len());
        let abort = Abort {
            signal: abort_tx,
            process_groups: pids.iter().flatten().copied().collect(),
        };
        let joined = join_tasks(tasks, &mut state, options.deadline, &abort).await;

        if joined.timed_out {
            tracing::error!(
                stages = stages.len(),
                elapsed_ms = total_start.elapsed().as_millis(),
                "Pipeline run timed out, all stages killed"
            );
            return Err(PixelforgeError::Timeout {
                operation: "pipeline run".into(),
                elapsed_ms: total_start.elapsed().as_millis(),
            });
        }
        if let Some(e) = joined.first_error {
            tracing::error!(error = %e, "Pipeline stream task failed, all stages killed");
            return Err(e);
        }

        state.finish(stages, &pids, total_start.elapsed())
    }
}

/// Turn spawned processes into the run's task set.
fn wire(
    spawned: Vec<SpawnedStage>,
    options: &RunOptions,
    abort: &watch::Receiver<bool>,
) -> PixelforgeResult<FuturesUnordered<BoxedTask>> {
    let tasks = FuturesUnordered::new();
    let last = spawned.len().saturating_sub(1);
    let mut upstream = None;

    for (index, mut stage) in spawned.into_iter().enumerate() {
        match (stage.child.stdin.take(), upstream.take()) {
            (Some(writer), Some(reader)) => {
                tasks.push(task::copy_link(index - 1, reader, writer, abort.clone()))
            }
            // First stage has nothing to read: give it EOF immediately.
            (Some(writer), None) if index == 0 => drop(writer),
            (None, None) => {}
            _ => {
                return Err(PixelforgeError::Internal(format!(
                    "stage {} streams do not match its upstream",
                    index
                )));
            }
        }

        let stdout = stage.child.stdout.take();
        if index == last {
            if let Some(reader) = stdout {
                tasks.push(task::collect_output(reader, abort.clone()));
            }
        } else {
            upstream = stdout;
        }

        if let Some(stderr) = stage.child.stderr.take() {
            tasks.push(task::drain_diagnostics(
                index,
                stderr,
                options.max_diagnostic_bytes,
                abort.clone(),
            ));
        }

        tasks.push(task::wait_for_exit(
            index,
            stage.child,
            stage.started,
            abort.clone(),
        ));
    }

    Ok(tasks)
}

/// Kills a run: every stage's process group, then every task's wait.
struct Abort {
    signal: watch::Sender<bool>,
    process_groups: Vec<u32>,
}

impl Abort {
    fn fire(&self) {
        if *self.signal.borrow() {
            return;
        }
        // Groups first: descendants holding a pipe would otherwise outlive the run.
        for &pgid in &self.process_groups {
            if !kill_process_group(pgid) {
                tracing::warn!(pgid, "Failed to kill stage process group");
            }
        }
        self.signal.send_replace(true);
    }
}

struct JoinOutcome {
    timed_out: bool,
    first_error: Option<PixelforgeError>,
}

/// The run's single join point.
///
/// Keeps polling until every task has finished, even after a failure: the
/// abort kills every stage's process group, stream tasks stop reading and
/// every child gets reaped.
async fn join_tasks(
    mut tasks: FuturesUnordered<BoxedTask>,
    state: &mut RunState,
    deadline: Option<Duration>,
    abort: &Abort,
) -> JoinOutcome {
    let expiry = async move {
        match deadline {
            Some(deadline) => tokio::time::sleep(deadline).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(expiry);

    let mut outcome = JoinOutcome {
        timed_out: false,
        first_error: None,
    };

    loop {
        let next = tokio::select! {
            next = tasks.next() => next,
            () = &mut expiry, if !outcome.timed_out => {
                tracing::warn!(deadline = ?deadline, "Pipeline deadline expired, killing stages");
                outcome.timed_out = true;
                abort.fire();
                continue;
            }
        };

        match next {
            Some(Ok(output)) => state.record(output),
            Some(Err(e)) => {
                if outcome.first_error.is_none() {
                    abort.fire();
                    outcome.first_error = Some(e);
                } else {
                    tracing::debug!(error = %e, "Additional pipeline task failure");
                }
            }
            None => break,
        }
    }

    outcome
}

/// Everything the tasks reported, assembled into a verdict at the end.
struct RunState {
    exits: Vec<Option<(ExitInfo, Duration)>>,
    diagnostics: Vec<Vec<u8>>,
    diagnostic_totals: Vec<u64>,
    links: Vec<Option<u64>>,
    output: Vec<u8>,
}

impl RunState {
    fn new(stages: usize) -> Self {
        Self {
            exits: vec![None; stages],
            diagnostics: vec![Vec::new(); stages],
            diagnostic_totals: vec![0; stages],
            links: vec![None; stages.saturating_sub(1)],
            output: Vec::new(),
        }
    }

    fn record(&mut self, output: TaskOutput) {
        match output {
            TaskOutput::Exited {
                stage,
                exit,
                elapsed,
            } => {
                tracing::debug!(stage, %exit, elapsed_ms = elapsed.as_millis(), "Stage exited");
                self.exits[stage] = Some((exit, elapsed));
            }
            TaskOutput::Drained {
                stage,
                retained,
                total,
            } => {
                self.diagnostics[stage] = retained;
                self.diagnostic_totals[stage] = total;
            }
            TaskOutput::Copied { from, bytes } => self.links[from] = bytes,
            TaskOutput::Collected(output) => self.output = output,
        }
    }

    fn finish(
        self,
        stages: &[StageSpec],
        pids: &[Option<u32>],
        elapsed: Duration,
    ) -> PixelforgeResult<PipelineResult> {
        let mut verdicts = Vec::with_capacity(stages.len());
        let mut stage_metrics = Vec::with_capacity(stages.len());

        for (index, spec) in stages.iter().enumerate() {
            let (exit, duration) = self.exits[index].ok_or_else(|| {
                PixelforgeError::Internal(format!("stage {} never reported an exit", index))
            })?;
            let program = spec.program().display().to_string();

            verdicts.push(StageVerdict {
                index,
                program: program.clone(),
                exit,
            });
            stage_metrics.push(StageMetrics {
                index,
                program,
                pid: pids[index],
                duration_ms: duration.as_millis(),
                diagnostic_bytes: self.diagnostic_totals[index],
            });
        }

        if let Some(failed) = verdicts.iter().find(|verdict| !verdict.success()) {
            let diagnostics = String::from_utf8_lossy(&self.diagnostics[failed.index])
                .trim_end()
                .to_string();
            tracing::error!(
                stage = failed.index,
                command = %stages[failed.index].command_line(),
                exit = %failed.exit,
                diagnostics = %diagnostics,
                "Pipeline stage failed"
            );
            return Err(PixelforgeError::StageFailed {
                stage: failed.index,
                program: failed.program.clone(),
                exit: failed.exit,
                diagnostics,
            });
        }

        let metrics = PipelineMetrics {
            total_duration_ms: elapsed.as_millis(),
            stages: stage_metrics,
            link_bytes: self.links,
            output_bytes: self.output.len(),
        };

        Ok(PipelineResult::new(self.output, verdicts, metrics))
    }
}
