//! Request routing and response formatting.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderValue};
use hyper::{Method, Response, StatusCode};

use super::ImageProducer;
use crate::runtime::ServerOptions;

/// Body of every failed image response.
pub const GENERIC_FAILURE_MESSAGE: &str =
    "Failed to generate Mandelbrot set. Check server logs for details.";

const HEALTH_PATH: &str = "/healthz";
const METRICS_PATH: &str = "/metrics";

/// Route one request.
///
/// - `GET <route>`: render and return the image
/// - `GET /healthz`: liveness
/// - `GET /metrics`: renderer counters as JSON
pub async fn respond(
    producer: &dyn ImageProducer,
    options: &ServerOptions,
    method: &Method,
    path: &str,
) -> Response<Full<Bytes>> {
    let is_get = method == Method::GET;

    if path == options.route {
        if !is_get {
            let mut response = text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("GET"));
            return response;
        }
        return image(producer, options).await;
    }

    match (is_get, path) {
        (true, HEALTH_PATH) => text(StatusCode::OK, "ok"),
        (true, METRICS_PATH) => match serde_json::to_vec(&producer.metrics()) {
            Ok(body) => with_content_type(
                Response::new(Full::new(Bytes::from(body))),
                HeaderValue::from_static("application/json"),
            ),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize metrics");
                text(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        },
        _ => text(StatusCode::NOT_FOUND, "not found"),
    }
}

async fn image(producer: &dyn ImageProducer, options: &ServerOptions) -> Response<Full<Bytes>> {
    match producer.produce().await {
        Ok(bytes) => {
            let content_type = HeaderValue::from_str(&options.content_type)
                .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
            let mut response = with_content_type(Response::new(Full::new(bytes)), content_type);
            response
                .headers_mut()
                .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
            response
        }
        Err(e) => {
            tracing::error!(error = %e, stage = ?e.stage(), "Failed to generate image");
            text(StatusCode::INTERNAL_SERVER_ERROR, GENERIC_FAILURE_MESSAGE)
        }
    }
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = with_content_type(
        Response::new(Full::new(Bytes::from_static(body.as_bytes()))),
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    *response.status_mut() = status;
    response
}

fn with_content_type(
    mut response: Response<Full<Bytes>>,
    content_type: HeaderValue,
) -> Response<Full<Bytes>> {
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, content_type);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RenderMetrics;
    use async_trait::async_trait;
    use http_body_util::BodyExt;
    use pixelforge_shared::errors::{ExitInfo, PixelforgeError, PixelforgeResult};

    struct Fixed(&'static [u8]);

    #[async_trait]
    impl ImageProducer for Fixed {
        async fn produce(&self) -> PixelforgeResult<Bytes> {
            Ok(Bytes::from_static(self.0))
        }

        fn metrics(&self) -> RenderMetrics {
            RenderMetrics {
                renders_total: 3,
                ..RenderMetrics::default()
            }
        }
    }

    struct Failing;

    #[async_trait]
    impl ImageProducer for Failing {
        async fn produce(&self) -> PixelforgeResult<Bytes> {
            Err(PixelforgeError::StageFailed {
                stage: 1,
                program: "convert".into(),
                exit: ExitInfo::Code(1),
                diagnostics: "convert: no decode delegate for this image format".into(),
            })
        }
    }

    async fn body(response: Response<Full<Bytes>>) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn test_image_route_success() {
        let options = ServerOptions::default();
        let response = respond(&Fixed(b"\x89PNG"), &options, &Method::GET, "/api/mandelbrot.png").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
        assert_eq!(body(response).await, Bytes::from_static(b"\x89PNG"));
    }

    #[tokio::test]
    async fn test_failure_hides_detail() {
        let options = ServerOptions::default();
        let response = respond(&Failing, &options, &Method::GET, "/api/mandelbrot.png").await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body(response).await;
        assert_eq!(body, Bytes::from_static(GENERIC_FAILURE_MESSAGE.as_bytes()));
        assert!(!String::from_utf8_lossy(&body).contains("delegate"));
    }

    #[tokio::test]
    async fn test_other_routes() {
        let options = ServerOptions::default();
        let producer = Fixed(b"img");

        let response = respond(&producer, &options, &Method::POST, "/api/mandelbrot.png").await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "GET");

        let response = respond(&producer, &options, &Method::GET, "/nope").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = respond(&producer, &options, &Method::GET, "/healthz").await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = respond(&producer, &options, &Method::GET, "/metrics").await;
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        let metrics: serde_json::Value = serde_json::from_slice(&body(response).await).unwrap();
        assert_eq!(metrics["renders_total"], 3);
    }
}
