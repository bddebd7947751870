//! Renderer: build cache plus generator/converter pipeline.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use pixelforge_shared::errors::PixelforgeResult;

use crate::build::{BuildCache, BuildOutcome};
use crate::pipeline::{PipedStreams, Pipeline, PipelineBuilder, PipelineExecutor, RunOptions, StageSpec};
use crate::runtime::layout::FilesystemLayout;
use crate::runtime::metrics::{RenderMetrics, RenderMetricsStorage, saturating_millis};
use crate::runtime::options::PixelforgeOptions;

/// Renders images on demand.
///
/// Each call to [`render`](Self::render) checks the generator build, rebuilds
/// it if stale, then runs `generator | converter` with all output held in
/// memory.
///
/// **Cloning**: cheap via `Arc`; all clones share the build cache (and
/// therefore its per-artifact build lock) and metrics.
#[derive(Clone)]
pub struct Renderer {
    inner: Arc<RendererInner>,
}

struct RendererInner {
    layout: FilesystemLayout,
    build_cache: BuildCache,
    converter: StageSpec,
    run_options: RunOptions,
    metrics: RenderMetricsStorage,
}

impl Renderer {
    /// Create a renderer from validated options.
    ///
    /// Nothing is built or spawned here; the first render does that.
    pub fn new(options: &PixelforgeOptions) -> PixelforgeResult<Self> {
        options.validate()?;

        let mut build_cache = BuildCache::new(options.build.clone());
        if let Some(timeout) = options.build_timeout() {
            build_cache = build_cache.with_timeout(timeout);
        }

        let converter = StageSpec::new(&options.converter.program)
            .args(options.converter.args.iter().cloned())
            .piped(PipedStreams::filter());

        let inner = Arc::new(RendererInner {
            layout: FilesystemLayout::new(options),
            build_cache,
            converter,
            run_options: options.run_options(),
            metrics: RenderMetricsStorage::default(),
        });

        tracing::debug!(
            source = %inner.layout.source().display(),
            executable = %inner.layout.executable().display(),
            converter = %inner.converter.command_line(),
            "initialized renderer"
        );

        Ok(Self { inner })
    }

    pub fn layout(&self) -> &FilesystemLayout {
        &self.inner.layout
    }

    pub fn metrics(&self) -> RenderMetrics {
        self.inner.metrics.snapshot()
    }

    /// `[generator, converter]`, with the generator being the built executable.
    pub fn pipeline(&self) -> PixelforgeResult<Pipeline> {
        PipelineBuilder::new()
            .stage(StageSpec::new(self.inner.layout.executable()).piped(PipedStreams::source()))
            .stage(self.inner.converter.clone())
            .build()
    }

    /// Ensure the work directory exists and the generator is up to date.
    pub async fn prepare(&self) -> PixelforgeResult<BuildOutcome> {
        let layout = &self.inner.layout;
        layout.prepare().await?;

        let outcome = self
            .inner
            .build_cache
            .ensure(layout.source(), layout.executable())
            .await?;
        self.inner
            .metrics
            .record_build(outcome == BuildOutcome::Rebuilt);
        Ok(outcome)
    }

    /// Produce one image.
    ///
    /// Either the converter's complete output or an error; never partial data.
    pub async fn render(&self) -> PixelforgeResult<Bytes> {
        let start = Instant::now();
        let result = self.render_inner().await;

        let elapsed_ms = saturating_millis(start.elapsed());
        self.inner.metrics.record_render(result.is_err(), elapsed_ms);
        result
    }

    async fn render_inner(&self) -> PixelforgeResult<Bytes> {
        self.prepare().await?;

        tracing::info!("Generating and converting image in memory");
        let pipeline = self.pipeline()?;
        let result = PipelineExecutor::run(&pipeline, &self.inner.run_options).await?;

        tracing::info!(
            bytes = result.output().len(),
            elapsed_ms = result.metrics().total_duration_ms,
            "In-memory generation and conversion finished"
        );
        Ok(Bytes::from(result.into_output()))
    }
}
