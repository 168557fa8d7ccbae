//! Exposition Server
//!
//! Serves the exporter registry in the Prometheus text format. Scrapes only
//! read the current values; they never trigger a collection.
//!
//! | Path       | Response                          |
//! |------------|-----------------------------------|
//! | `/metrics` | text exposition of the registry   |
//! | `/healthz` | `ok`                              |
//! | other      | 404                               |

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::metrics::ExporterMetrics;

pub const METRICS_PATH: &str = "/metrics";
pub const HEALTH_PATH: &str = "/healthz";

/// Bind the exposition listener.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server on {}: {}", addr, e)))
}

/// Serve scrapes on an already bound listener, one task per connection.
pub async fn serve(listener: TcpListener, metrics: Arc<ExporterMetrics>) -> Result<()> {
    info!("Metrics server listening on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Metrics server accept error: {}", e);
                continue;
            }
        };

        let io = TokioIo::new(stream);
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let metrics = metrics.clone();
                async move { Ok::<_, Infallible>(route(req.method(), req.uri().path(), &metrics)) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!(%peer, "Metrics server connection error: {}", e);
            }
        });
    }
}

/// Build the response for one request.
pub fn route(method: &Method, path: &str, metrics: &ExporterMetrics) -> Response<Full<Bytes>> {
    debug!(%method, path, "Handling request");

    match (method, path) {
        (&Method::GET, METRICS_PATH) => match metrics.encode() {
            Ok(body) => {
                let content_type = HeaderValue::from_str(&metrics.content_type())
                    .unwrap_or_else(|_| HeaderValue::from_static("text/plain"));
                text_response(StatusCode::OK, content_type, body)
            }
            Err(e) => {
                error!("Failed to encode metrics: {}", e);
                plain(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics")
            }
        },
        (&Method::GET, HEALTH_PATH) => plain(StatusCode::OK, "ok"),
        (_, METRICS_PATH) | (_, HEALTH_PATH) => {
            plain(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
        }
        _ => plain(StatusCode::NOT_FOUND, "not found"),
    }
}

fn plain(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    text_response(
        status,
        HeaderValue::from_static("text/plain; charset=utf-8"),
        body.to_string(),
    )
}

fn text_response(
    status: StatusCode,
    content_type: HeaderValue,
    body: String,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, content_type);
    response
}
