//! pixelforge-server: serves the rendered image over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use pixelforge::runtime::PixelforgeOptions;
use pixelforge::{Renderer, init_logging};

#[derive(Parser, Debug)]
#[command(name = "pixelforge-server")]
#[command(about = "Render images on demand from a lazily rebuilt generator")]
struct Args {
    /// JSON config file; flags below override its values
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Directory holding the built generator
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Generator source file
    #[arg(long)]
    source: Option<PathBuf>,

    /// Pipeline deadline in seconds (0 disables it)
    #[arg(long)]
    run_timeout: Option<u64>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Build the generator before accepting requests
    #[arg(long)]
    prebuild: bool,
}

impl Args {
    fn into_options(self) -> anyhow::Result<(PixelforgeOptions, bool)> {
        let mut options = match &self.config {
            Some(path) => PixelforgeOptions::from_json_file(path)?,
            None => PixelforgeOptions::default(),
        };

        if let Some(listen) = self.listen {
            options.server.listen = listen;
        }
        if let Some(work_dir) = self.work_dir {
            options.work_dir = work_dir;
        }
        if let Some(source) = self.source {
            options.source = source;
        }
        if let Some(secs) = self.run_timeout {
            options.run_timeout_secs = (secs > 0).then_some(secs);
        }
        if let Some(log_dir) = self.log_dir {
            options.logging.log_dir = Some(log_dir);
        }

        options.validate()?;
        Ok((options, self.prebuild))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (options, prebuild) = Args::parse().into_options()?;
    let _log_guard = init_logging(&options.logging)?;

    let renderer = Renderer::new(&options)?;
    if prebuild {
        let outcome = renderer
            .prepare()
            .await
            .context("failed to build generator")?;
        tracing::info!(?outcome, "Generator ready");
    }

    let listener = tokio::net::TcpListener::bind(options.server.listen)
        .await
        .with_context(|| format!("failed to bind {}", options.server.listen))?;

    pixelforge::server::serve(
        listener,
        Arc::new(renderer),
        Arc::new(options.server.clone()),
        async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        },
    )
    .await?;

    Ok(())
}
