//! Stage definition for process pipelines.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// Which standard streams of a stage are piped to the executor.
///
/// Streams that are not piped are connected to the null device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipedStreams {
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
}

impl PipedStreams {
    /// Output and diagnostics piped, no input. Typical for a generator.
    pub fn source() -> Self {
        Self {
            stdin: false,
            stdout: true,
            stderr: true,
        }
    }

    /// All three streams piped. Typical for a filter.
    pub fn filter() -> Self {
        Self {
            stdin: true,
            stdout: true,
            stderr: true,
        }
    }
}

/// One external process within a pipeline.
///
/// Stages are immutable once handed to a [`Pipeline`](super::Pipeline).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    program: PathBuf,
    args: Vec<String>,
    piped: PipedStreams,
}

impl StageSpec {
    /// Create a stage with no arguments and no piped streams.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            piped: PipedStreams::default(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn piped(mut self, piped: PipedStreams) -> Self {
        self.piped = piped;
        self
    }

    pub fn pipe_stdin(mut self) -> Self {
        self.piped.stdin = true;
        self
    }

    pub fn pipe_stdout(mut self) -> Self {
        self.piped.stdout = true;
        self
    }

    pub fn pipe_stderr(mut self) -> Self {
        self.piped.stderr = true;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn streams(&self) -> PipedStreams {
        self.piped
    }

    /// Human-readable command line for logs and error messages.
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Build the process command.
    ///
    /// Each stage leads its own process group (pgid = pid) so an aborted run
    /// can kill whatever the stage forked along with it. Children are also
    /// killed when their handle is dropped.
    pub(crate) fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(stdio(self.piped.stdin))
            .stdout(stdio(self.piped.stdout))
            .stderr(stdio(self.piped.stderr))
            .process_group(0)
            .kill_on_drop(true);
        cmd
    }
}

fn stdio(piped: bool) -> Stdio {
    if piped { Stdio::piped() } else { Stdio::null() }
}
