//! HTTP boundary.
//!
//! Serves the rendered image on one GET route. Every failure becomes the same
//! 500 response; the error detail only goes to the log.

mod handler;

pub use handler::{GENERIC_FAILURE_MESSAGE, respond};

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hyper::Request;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use pixelforge_shared::errors::PixelforgeResult;
use tokio::net::TcpListener;

use crate::runtime::{RenderMetrics, Renderer, ServerOptions};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Anything that can produce the image body for a request.
#[async_trait]
pub trait ImageProducer: Send + Sync {
    async fn produce(&self) -> PixelforgeResult<Bytes>;

    fn metrics(&self) -> RenderMetrics {
        RenderMetrics::default()
    }
}

#[async_trait]
impl ImageProducer for Renderer {
    async fn produce(&self) -> PixelforgeResult<Bytes> {
        self.render().await
    }

    fn metrics(&self) -> RenderMetrics {
        Renderer::metrics(self)
    }
}

/// Accept connections until `shutdown` resolves.
///
/// Each connection is served on its own task; each request triggers an
/// independent render.
pub async fn serve<F>(
    listener: TcpListener,
    producer: Arc<dyn ImageProducer>,
    options: Arc<ServerOptions>,
    shutdown: F,
) -> PixelforgeResult<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    tracing::info!(
        addr = ?listener.local_addr().ok(),
        route = %options.route,
        "Listening"
    );

    loop {
        let (stream, peer) = tokio::select! {
            accepted = accept_with_backoff(|| listener.accept()) => accepted,
            () = &mut shutdown => {
                tracing::info!("Shutting down server");
                return Ok(());
            }
        };

        let producer = Arc::clone(&producer);
        let options = Arc::clone(&options);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let producer = Arc::clone(&producer);
                let options = Arc::clone(&options);
                async move {
                    Ok::<_, Infallible>(
                        respond(producer.as_ref(), &options, req.method(), req.uri().path()).await,
                    )
                }
            });

            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                tracing::debug!(peer = %peer, error = %e, "Connection error");
            }
        });
    }
}

/// Retry `accept` until it yields a connection.
///
/// Failures such as EMFILE persist until something closes, so each one is
/// followed by a pause instead of an immediate retry.
async fn accept_with_backoff<T, F, Fut>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to accept connection");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}
