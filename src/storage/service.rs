//! storage/service.rs
//!
//! Worker-pool-bounded save/fetch/restore/mark-dumped on top of the DB
//! adapter (C4). Every DB path reserves a semaphore permit at entry and
//! releases it on every exit path, including cancellation.

use crate::cache::eventlog::{CacheOp, LogRecord};
use crate::db::adapter::PgAdapter;
use crate::error::{AppError, AppResult};
use crate::model::{CacheItem, NatsMsg, Order, Orders};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

pub struct StorageService {
    db: Arc<PgAdapter>,
    permits: Arc<Semaphore>,
    out_tx: mpsc::Sender<CacheItem>,
    out_rx: Mutex<Option<mpsc::Receiver<CacheItem>>>,
    err_tx: mpsc::Sender<AppError>,
    cancel: CancellationToken,
}

impl StorageService {
    pub fn new(
        db: Arc<PgAdapter>,
        pool_size: usize,
        err_tx: mpsc::Sender<AppError>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let (out_tx, out_rx) = mpsc::channel(256);
        Arc::new(Self {
            db,
            permits: Arc::new(Semaphore::new(pool_size)),
            out_tx,
            out_rx: Mutex::new(Some(out_rx)),
            err_tx,
            cancel,
        })
    }

    /// Taken once at wire-up time by the cache service.
    pub async fn get_channel(&self) -> mpsc::Receiver<CacheItem> {
        self.out_rx
            .lock()
            .await
            .take()
            .expect("StorageService::get_channel called more than once")
    }

    pub fn convert(&self, seq: u64, oid: String, data: bytes::Bytes) -> NatsMsg {
        NatsMsg {
            msg_id: seq,
            order: Order::new(oid, data),
        }
    }

    /// Asynchronous: acquires a permit, inserts, then publishes `AddOne`.
    /// Errors go to the shared error channel; the permit is always released
    /// (it's an RAII guard, dropped at the end of the spawned task).
    pub fn save_order(self: &Arc<Self>, msg: NatsMsg) {
        let this = self.clone();
        tokio::spawn(async move {
            const MARK: &str = "StorageService.save_order";

            let permit = tokio::select! {
                p = this.permits.clone().acquire_owned() => p.expect("semaphore never closed"),
                _ = this.cancel.cancelled() => return,
            };

            let result = this.db.save(&msg.order.oid, &msg.order.raw_ord).await;
            drop(permit);

            match result {
                Ok(()) => {
                    metrics::counter!("orders_saved_total").increment(1);
                    let item = CacheItem::AddOne(msg.order);
                    tokio::select! {
                        _ = this.cancel.cancelled() => {}
                        res = this.out_tx.send(item) => {
                            if res.is_err() {
                                warn!("{MARK}: cache channel closed");
                            }
                        }
                    }
                }
                Err(e) => {
                    metrics::counter!("orders_save_errors_total").increment(1);
                    error!(error = %e, "{MARK}: insert failed");
                    let _ = this.err_tx.send(e).await;
                }
            }
        });
    }

    /// Synchronous one-shot fetch under a permit.
    pub async fn fetch_order(&self, oid: &str) -> AppResult<Order> {
        const MARK: &str = "StorageService.fetch_order";
        let permit = tokio::select! {
            p = self.permits.acquire() => p.expect("semaphore never closed"),
            _ = self.cancel.cancelled() => return Err(AppError::Shutdown),
        };
        let result = self.db.fetch_one_order(oid).await;
        drop(permit);
        if let Err(ref e) = result {
            debug!(error = %e, "{MARK}: {oid}");
        }
        result
    }

    /// Launches a bounded background batch pull restoring cache contents
    /// from rows still marked `evict=true`. Iterates `ceil(limit/10)` times;
    /// publishes one `AddMany` event per iteration. Returns a cancel handle
    /// bounded by `window`, plus a one-shot signal that fires once the first
    /// batch has been enqueued (or immediately, if there is nothing to
    /// restore) -- callers needing I4 (subscribe only after the first batch
    /// is enqueued) should await it before starting the consumer.
    pub fn restore_cache(self: &Arc<Self>, limit: usize, window: Duration) -> (CancellationToken, oneshot::Receiver<()>) {
        const MARK: &str = "StorageService.restore_cache";
        let cancel = self.cancel.child_token();
        let deadline_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            deadline_cancel.cancel();
        });

        let (first_batch_tx, first_batch_rx) = oneshot::channel();
        let this = self.clone();
        let worker_cancel = cancel.clone();
        tokio::spawn(async move {
            const PAGE_SIZE: i64 = 10;
            let iterations = (limit as i64).div_ceil(PAGE_SIZE).max(1);
            let mut offset: i64 = 0;
            let mut first_batch_tx = Some(first_batch_tx);

            for _ in 0..iterations {
                let permit = tokio::select! {
                    p = this.permits.acquire() => p.expect("semaphore never closed"),
                    _ = worker_cancel.cancelled() => return,
                };

                let page = this.db.fetch_evicted_page(PAGE_SIZE, offset).await;
                drop(permit);

                let orders = match page {
                    Ok(rows) => rows,
                    Err(e) => {
                        error!(error = %e, "{MARK}: page fetch failed");
                        tokio::select! {
                            _ = worker_cancel.cancelled() => {}
                            _ = this.err_tx.send(e) => {}
                        }
                        return;
                    }
                };
                offset += PAGE_SIZE;

                let item = CacheItem::AddMany(Orders { items: orders });
                tokio::select! {
                    _ = worker_cancel.cancelled() => return,
                    res = this.out_tx.send(item) => {
                        if res.is_err() {
                            warn!("{MARK}: cache channel closed");
                            return;
                        }
                    }
                }

                if let Some(tx) = first_batch_tx.take() {
                    let _ = tx.send(());
                }
            }

            if let Some(tx) = first_batch_tx.take() {
                let _ = tx.send(());
            }
            debug!("{MARK}: finished");
        });

        (cancel, first_batch_rx)
    }

    /// Opens one transaction, consumes `in_ch` until closed, queues an
    /// `evict`-bit update per record, then commits. An unknown op aborts
    /// with rollback. The Sentinel record is skipped, never queued.
    /// Calls `cancel` on exit -- this both signals "done" to any caller
    /// still waiting and cancels the sibling reconciliation-deadline timer.
    pub fn mark_dumped(self: &Arc<Self>, mut in_ch: mpsc::Receiver<LogRecord>, cancel: CancellationToken) {
        const MARK: &str = "StorageService.mark_dumped";
        let this = self.clone();
        tokio::spawn(async move {
            let permit = tokio::select! {
                p = this.permits.acquire() => p.expect("semaphore never closed"),
                _ = this.cancel.cancelled() => {
                    cancel.cancel();
                    return;
                },
            };

            let mut tx = match this.db.begin_tx().await {
                Ok(tx) => tx,
                Err(e) => {
                    error!(error = %e, "{MARK}: begin_tx failed");
                    let _ = this.err_tx.send(e).await;
                    drop(permit);
                    cancel.cancel();
                    return;
                }
            };

            // `CacheOp` is an exhaustive enum, so there is no "unknown
            // op-code" case to guard against here -- the Rust type system
            // gives us that invariant for free. `Sentinel` is skipped, never
            // queued.
            while let Some(record) = in_ch.recv().await {
                match record.op {
                    CacheOp::Evicted => tx.add_query(record.key, true),
                    CacheOp::Added => tx.add_query(record.key, false),
                    CacheOp::Sentinel => continue,
                }
            }

            match tx.run_tx().await {
                Ok(()) => match tx.commit().await {
                    Ok(()) => debug!("{MARK}: reconciliation committed"),
                    Err(e) => {
                        error!(error = %e, "{MARK}: commit failed");
                        let _ = this.err_tx.send(e).await;
                    }
                },
                Err(e) => {
                    error!(error = %e, "{MARK}: transaction rolled back");
                    tx.rollback().await;
                    let _ = this.err_tx.send(e).await;
                }
            }

            drop(permit);
            cancel.cancel();
        });
    }

    pub async fn test_connection(&self) -> AppResult<()> {
        self.db.ping().await
    }

    pub async fn disconnect(&self) {
        self.db.disconnect().await;
    }
}
