//! db/adapter.rs
//!
//! Connection-pool-backed adapter over Postgres (C1). Every operation
//! inherits a per-call deadline derived from `Timeout`; `connect` retries up
//! to `conn_retry` times before giving up, fatal on exhaustion.

use crate::config::DbEngineConfig;
use crate::error::{AppError, AppResult};
use crate::model::Order;
use bytes::Bytes;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

pub const INSERT_ORDER: &str = "INSERT INTO orders (oid, raw_ord) VALUES ($1, $2)";
pub const SELECT_ONE_BY_OID: &str = "SELECT oid, raw_ord FROM orders WHERE oid = $1";
pub const SELECT_EVICTED_PAGE: &str =
    "SELECT oid, raw_ord FROM orders WHERE evict = true ORDER BY seq_idx DESC LIMIT $1 OFFSET $2";
pub const UPDATE_EVICT_BY_OID: &str = "UPDATE orders SET evict = $2 WHERE oid = $1";

#[derive(Clone)]
pub struct PgAdapter {
    pool: PgPool,
    call_timeout: Duration,
}

/// Connection-class `sqlx::Error`s (broken socket, exhausted/closed pool,
/// a crashed pool worker) are indistinguishable from a deadline elapsing as
/// far as the supervisor's triage cares -- both mean "the DB is gone" --
/// so they're folded into the same `DbConnectionLost` variant. Everything
/// else (bad query, decode failure, row not found) stays `AppError::Sqlx`
/// and is non-fatal.
fn classify_sqlx_err(e: sqlx::Error) -> AppError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolClosed
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::WorkerCrashed => AppError::DbConnectionLost,
        other => AppError::Sqlx(other),
    }
}

impl PgAdapter {
    /// Connect with up to `conn_retry` attempts, linear backoff. Fatal
    /// (returns `Err`) on exhaustion -- the supervisor aborts the process.
    pub async fn connect(cfg: &DbEngineConfig) -> AppResult<Self> {
        let dsn = cfg.dsn();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match PgPoolOptions::new()
                .max_connections(cfg.max_pool)
                .connect(&dsn)
                .await
            {
                Ok(pool) => {
                    info!(attempt, "connected to postgres");
                    return Ok(Self {
                        pool,
                        call_timeout: cfg.timeout,
                    });
                }
                Err(e) if attempt < cfg.conn_retry => {
                    warn!(attempt, error = %e, "postgres connect failed, retrying");
                    tokio::time::sleep(Duration::from_millis(250 * attempt as u64)).await;
                }
                Err(e) => {
                    error!(attempt, error = %e, "postgres connect exhausted retries");
                    return Err(AppError::Sqlx(e));
                }
            }
        }
    }

    /// Liveness probe.
    pub async fn ping(&self) -> AppResult<()> {
        timeout(self.call_timeout, sqlx::query("SELECT 1").execute(&self.pool))
            .await
            .map_err(|_| AppError::DbConnectionLost)?
            .map(|_| ())
            .map_err(classify_sqlx_err)
    }

    /// Fire-and-forget insert under the per-call deadline.
    pub async fn save(&self, oid: &str, raw_ord: &[u8]) -> AppResult<()> {
        timeout(
            self.call_timeout,
            sqlx::query(INSERT_ORDER)
                .bind(oid)
                .bind(raw_ord)
                .execute(&self.pool),
        )
        .await
        .map_err(|_| AppError::DbConnectionLost)?
        .map(|_| ())
        .map_err(classify_sqlx_err)
    }

    /// Single-row fetch by primary key.
    pub async fn fetch_one_order(&self, oid: &str) -> AppResult<Order> {
        let row = timeout(
            self.call_timeout,
            sqlx::query(SELECT_ONE_BY_OID).bind(oid).fetch_one(&self.pool),
        )
        .await
        .map_err(|_| AppError::DbConnectionLost)?
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => AppError::OrderNotFound(oid.to_string()),
            other => classify_sqlx_err(other),
        })?;
        row_to_order(&row)
    }

    /// Paginated fetch of rows still marked `evict=true`, newest first.
    pub async fn fetch_evicted_page(&self, limit: i64, offset: i64) -> AppResult<Vec<Order>> {
        let rows = timeout(
            self.call_timeout,
            sqlx::query(SELECT_EVICTED_PAGE)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool),
        )
        .await
        .map_err(|_| AppError::DbConnectionLost)?
        .map_err(classify_sqlx_err)?;
        rows.iter().map(row_to_order).collect()
    }

    /// Open a transaction handle for batched `evict`-bit updates (C4's
    /// `MarkDumped`). One transaction in flight at a time per process (I3).
    pub async fn begin_tx(&self) -> AppResult<AdapterTx<'_>> {
        let tx = self.pool.begin().await.map_err(classify_sqlx_err)?;
        Ok(AdapterTx {
            tx: Some(tx),
            queued: Vec::new(),
        })
    }

    pub async fn disconnect(&self) {
        debug!("closing postgres pool");
        self.pool.close().await;
    }
}

fn row_to_order(row: &sqlx::postgres::PgRow) -> AppResult<Order> {
    let oid: String = row.try_get("oid").map_err(AppError::Sqlx)?;
    let raw: serde_json::Value = row.try_get("raw_ord").map_err(AppError::Sqlx)?;
    let bytes = serde_json::to_vec(&raw).map_err(AppError::Json)?;
    Ok(Order::new(oid, Bytes::from(bytes)))
}

/// Buffers `(oid, evict)` updates and submits them as one pipelined batch.
/// Partial failure of any statement aborts the whole transaction.
pub struct AdapterTx<'a> {
    tx: Option<Transaction<'a, Postgres>>,
    queued: Vec<(String, bool)>,
}

impl<'a> AdapterTx<'a> {
    pub fn add_query(&mut self, oid: String, evict: bool) {
        self.queued.push((oid, evict));
    }

    /// Executes every queued statement inside the open transaction.
    pub async fn run_tx(&mut self) -> AppResult<()> {
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| AppError::Internal("transaction already finished".into()))?;
        for (oid, evict) in &self.queued {
            sqlx::query(UPDATE_EVICT_BY_OID)
                .bind(oid)
                .bind(evict)
                .execute(&mut **tx)
                .await
                .map_err(classify_sqlx_err)?;
        }
        Ok(())
    }

    pub async fn commit(mut self) -> AppResult<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await.map_err(classify_sqlx_err)?;
        }
        Ok(())
    }

    /// Idempotent: a second call after `commit`/`rollback` is a no-op.
    pub async fn rollback(mut self) {
        if let Some(tx) = self.tx.take() {
            if let Err(e) = tx.rollback().await {
                warn!(error = %e, "rollback failed");
            }
        }
    }
}
