//! HTTP surface: the metrics endpoint and a landing page.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::metrics::prom::ExporterRegistry;

#[derive(Debug, Clone)]
struct AppState {
    registry: ExporterRegistry,
    metrics_path: String,
}

/// Upper bound for producing one response.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Routes `metrics_path` to the registry and `/` to the landing page.
pub fn router(registry: ExporterRegistry, metrics_path: &str) -> Router {
    let state = AppState {
        registry,
        metrics_path: metrics_path.to_string(),
    };
    let routes = Router::new()
        .route(metrics_path, get(metrics))
        .route("/", get(landing))
        .with_state(state);
    with_request_timeout(routes, REQUEST_TIMEOUT)
}

/// Answers `503 Service Unavailable` for requests not handled within `limit`.
pub fn with_request_timeout(router: Router, limit: Duration) -> Router {
    router.layer(middleware::from_fn_with_state(limit, enforce_timeout))
}

async fn enforce_timeout(State(limit): State<Duration>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    match tokio::time::timeout(limit, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(path = %path, timeout_ms = limit.as_millis() as u64, "request timed out");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.registry.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, ExporterRegistry::content_type())],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

async fn landing(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        "<html>
<head><title>AWS ELB Trust Store Exporter</title></head>
<body>
<h1>AWS ELB Trust Store Exporter</h1>
<p><a href=\"{}\">Metrics</a></p>
</body>
</html>",
        state.metrics_path
    ))
}

/// Serves `router` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(address = %listener.local_addr()?, "Starting server");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Binds the listen address.
pub async fn bind(address: SocketAddr) -> std::io::Result<TcpListener> {
    TcpListener::bind(address).await
}
