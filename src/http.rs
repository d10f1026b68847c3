use axum::extract::State;
use axum::http::{self, Response, StatusCode};
use axum::{Router, response::IntoResponse, routing::get};
use axum_prometheus::PrometheusMetricLayer;
use axum_prometheus::metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::app::AppState;
use crate::metrics;

/// Operational endpoints. `http_metrics` adds the request metrics of the
/// Prometheus layer to `/metrics`.
pub fn router(state: AppState, http_metrics: Option<PrometheusHandle>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/metrics",
            get(move || async move {
                let mut body = metrics::render();
                if let Some(handle) = &http_metrics {
                    body.push_str(&handle.render());
                }
                body
            }),
        )
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &http::Request<_>| {
                    tracing::info_span!(
                      "http_request",
                      method = %req.method(),
                      path = %req.uri().path(),
                    )
                })
                .on_response(|res: &Response<_>, latency: Duration, _span: &Span| {
                    tracing::debug!(
                      status = %res.status(),
                      latency_ms = %latency.as_millis(),
                      "response"
                    )
                })
                .on_failure(|_error: _, latency: Duration, _span: &Span| {
                    tracing::warn!(latency_ms = %latency.as_millis(), "request_failed");
                }),
        )
}

pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (prom_layer, prom_handle) = PrometheusMetricLayer::pair();
    let app = router(state, Some(prom_handle)).layer(prom_layer);

    println!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn healthz() -> impl IntoResponse {
    "ok"
}

async fn readyz(State(st): State<AppState>) -> impl IntoResponse {
    if st.ready.is_ready(&st.cfg.health) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}
