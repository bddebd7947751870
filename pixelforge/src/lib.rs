//! On-demand image rendering.
//!
//! A native generator is rebuilt from source only when the source is newer
//! than the last build, then run as the first stage of a process pipeline
//! whose final output is collected in memory:
//!
//! ```text
//! request → Renderer::render
//!             ├─ BuildCache::ensure(source, executable)   rebuild if stale
//!             └─ PipelineExecutor::run([generator, converter])
//!                  generator.stdout → converter.stdin
//!                  converter.stdout → Vec<u8>
//! ```

pub mod build;
mod logging;
pub mod pipeline;
pub mod runtime;
pub mod server;
pub mod util;

pub use build::{BuildCache, BuildCommand, BuildOutcome};
pub use logging::init_logging;
pub use pipeline::{Pipeline, PipelineBuilder, PipelineExecutor, PipelineResult, RunOptions, StageSpec};
pub use runtime::{PixelforgeOptions, RenderMetrics, Renderer};

pub use pixelforge_shared::errors::{ExitInfo, PixelforgeError, PixelforgeResult};
