//! Generic process pipeline execution.
//!
//! Composes N external processes into a linear pipeline: stage *i*'s output
//! feeds stage *i+1*'s input, every diagnostic stream is drained, and the last
//! stage's output is collected in memory.
//!
//! ## Architecture
//!
//! ```text
//! Pipeline → StageSpec × N → spawned processes → one task set → PipelineResult
//!
//! - StageSpec: program, arguments, which streams are piped
//! - Pipeline: validated ordered stages (adjacent pairs must be linkable)
//! - PipelineExecutor: spawns, wires and joins everything at once
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use pixelforge::pipeline::{PipedStreams, PipelineBuilder, PipelineExecutor, RunOptions, StageSpec};
//! use std::time::Duration;
//!
//! let pipeline = PipelineBuilder::new()
//!     .stage(StageSpec::new("./tmp/mandelbrot").piped(PipedStreams::source()))
//!     .stage(StageSpec::new("convert").args(["ppm:-", "png:-"]).piped(PipedStreams::filter()))
//!     .build()?;
//!
//! let options = RunOptions::default().with_deadline(Duration::from_secs(60));
//! let result = PipelineExecutor::run(&pipeline, &options).await?;
//! println!("{} bytes in {}ms", result.output().len(), result.metrics().total_duration_ms);
//! ```

mod metrics;
#[allow(clippy::module_inception)]
mod pipeline;
mod result;
mod spawn;
mod stage;
mod task;

pub use metrics::{PipelineMetrics, StageMetrics};
pub use pipeline::{
    DEFAULT_MAX_DIAGNOSTIC_BYTES, Pipeline, PipelineBuilder, PipelineExecutor, RunOptions,
};
pub use result::{PipelineResult, StageVerdict};
pub use stage::{PipedStreams, StageSpec};
