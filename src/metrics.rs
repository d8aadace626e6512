//! metrics.rs
//!
//! Installs the process-wide Prometheus recorder and exposes a handle for
//! the `/metrics` route. Individual counters/gauges are emitted inline at
//! the storage/cache hot paths via the `metrics` facade macros, rather than
//! through a hand-maintained registry struct (the crate carries no
//! feature-gated no-op fallback since `metrics`'s macros are already no-ops
//! without a recorder installed).

use crate::error::{AppError, AppResult};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub fn install() -> AppResult<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| AppError::Internal(format!("failed to install metrics recorder: {e}")))
}
