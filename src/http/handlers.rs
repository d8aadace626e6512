//! http/handlers.rs
//!
//! `POST /orders` — looks an order up by uid through the cache service
//! (read-through on miss). Decode/validation failures return `200` with an
//! error string body; kept for compatibility with existing clients even
//! though a `4xx` would be the better contract.

use crate::cache::service::CacheService;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct HttpState {
    pub cache: Arc<CacheService>,
}

#[derive(Debug, Deserialize)]
struct OrderLookup {
    order_uid: String,
}

pub async fn get_order(State(state): State<HttpState>, body: Bytes) -> Response {
    let lookup: OrderLookup = match serde_json::from_slice(&body) {
        Ok(l) => l,
        Err(e) => return plain_ok(format!("decode error: {e}")),
    };

    if lookup.order_uid.trim().is_empty() {
        return plain_ok("order_uid must not be empty".to_string());
    }

    match state.cache.get(&lookup.order_uid).await {
        Ok(payload) => {
            debug!(order_uid = %lookup.order_uid, "AppHttp.GetOrder: served from cache");
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                payload,
            )
                .into_response()
        }
        Err(e) => {
            warn!(order_uid = %lookup.order_uid, error = %e, "AppHttp.GetOrder: lookup failed");
            plain_ok(format!("lookup failed: {e}"))
        }
    }
}

/// `200` with a plain-text error body — the retained, odd-but-intentional
/// contract for decode/validation/lookup failures.
fn plain_ok(message: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        message,
    )
        .into_response()
}
