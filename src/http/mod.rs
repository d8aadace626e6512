//! http/mod.rs
//!
//! axum router assembly: `POST /orders`, `GET /metrics`, with request-id,
//! panic-recovery and permissive CORS middleware.

pub mod handlers;
pub mod metrics;

use crate::config::HttpConfig;
use crate::error::{AppError, AppResult};
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use handlers::HttpState;
use metrics::MetricsState;
use std::net::SocketAddr;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

const REQUEST_ID_HEADER: &str = "x-request-id";

pub fn build_router(http_state: HttpState, metrics_state: MetricsState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers(tower_http::cors::Any);

    let request_id_header: axum::http::HeaderName = REQUEST_ID_HEADER.parse().expect("static header name");

    let orders_routes = Router::new()
        .route("/orders", post(handlers::get_order))
        .with_state(http_state);
    let metrics_routes = Router::new()
        .route("/metrics", get(metrics::metrics_handler))
        .with_state(metrics_state);

    orders_routes
        .merge(metrics_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(CatchPanicLayer::new())
}

pub async fn run_http_server(cfg: &HttpConfig, router: Router) -> AppResult<()> {
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .map_err(|e| AppError::InvalidConfig(format!("invalid http_server host/port: {e}")))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Internal(format!("failed to bind http server: {e}")))?;

    tracing::info!(%addr, "http server starting");

    axum::serve(listener, router)
        .await
        .map_err(|e| AppError::Internal(format!("http server error: {e}")))?;

    Ok(())
}
