//! cache/service.rs
//!
//! Owns the LRU cache and its event log, consumes fill events published by
//! the storage service, and exposes the periodic-reconciliation trigger
//! consumed by the supervisor's ticker (C5).

use crate::cache::eventlog::{EventLog, LogRecord};
use crate::cache::lru::LruCache;
use crate::error::{AppError, AppResult};
use crate::model::{CacheItem, Order};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Invoked once per reconciliation tick with the drained record stream and a
/// cancel handle; in practice this is `StorageService::mark_dumped`.
pub type MarkDumpedFn =
    Arc<dyn Fn(mpsc::Receiver<LogRecord>, CancellationToken) + Send + Sync>;

pub struct CacheService {
    cache: Arc<LruCache>,
    event_log: Arc<EventLog>,
    income: Mutex<Option<mpsc::Receiver<CacheItem>>>,
    cancel: CancellationToken,
}

impl CacheService {
    pub fn new(cache: Arc<LruCache>, event_log: Arc<EventLog>, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            cache,
            event_log,
            income: Mutex::new(None),
            cancel,
        })
    }

    pub async fn listen(&self, ch: mpsc::Receiver<CacheItem>) {
        *self.income.lock().await = Some(ch);
    }

    /// Starts the single long-running consumer task. Exits on cancellation.
    pub fn run(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut income = match self.income.lock().await.take() {
                Some(ch) => ch,
                None => {
                    error!("CacheService.run: no channel bound via listen()");
                    return;
                }
            };

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        debug!("cache service run loop cancelled");
                        return;
                    }
                    maybe_item = income.recv() => {
                        let Some(item) = maybe_item else { return };
                        if let Err(e) = self.apply(item) {
                            error!(error = %e, "AppCache.Run: error applying fill event");
                        }
                    }
                }
            }
        })
    }

    fn apply(&self, item: CacheItem) -> AppResult<()> {
        match item {
            CacheItem::AddOne(order) => self.set_one(order),
            CacheItem::AddMany(orders) => {
                for order in orders.items {
                    self.set_one(order)?;
                }
                Ok(())
            }
        }
    }

    fn set_one(&self, order: Order) -> AppResult<()> {
        self.cache.set(order.oid, order.raw_ord)
    }

    /// Direct lookup; on miss the LRU's load callback (wired to
    /// `StorageService::fetch_order`) is invoked and the result re-inserted.
    pub async fn get(&self, key: &str) -> AppResult<Bytes> {
        let result = self.cache.get(key).await;
        metrics::counter!("cache_get_total", "outcome" => if result.is_ok() { "hit" } else { "miss" })
            .increment(1);
        result
    }

    pub fn mark_added(&self, key: String) {
        if let Err(e) = self.event_log.log_added(key) {
            error!(error = %e, "AppCache.MarkAdded: event log overflow");
        }
    }

    pub fn mark_evicted(&self, key: String) {
        if let Err(e) = self.event_log.log_evicted(key) {
            error!(error = %e, "AppCache.MarkEvicted: event log overflow");
        }
    }

    /// Returns a zero-arg trigger: each invocation spawns a fresh dump of
    /// the event log into a fresh channel, paired with `handler` consuming
    /// it (in practice `StorageService::mark_dumped`), under a deadline
    /// derived from `interval`.
    pub fn get_cache_sync(
        self: &Arc<Self>,
        interval: Duration,
        handler: MarkDumpedFn,
    ) -> impl Fn() + Send + Sync + 'static {
        let this = self.clone();
        move || {
            let this = this.clone();
            let handler = handler.clone();
            let (tx, rx) = mpsc::channel(256);
            let cancel = this.cancel.child_token();
            let deadline_cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(interval).await;
                deadline_cancel.cancel();
            });
            handler(rx, cancel.clone());
            tokio::spawn(async move {
                if let Err(e) = this.event_log.dump(cancel, tx).await {
                    error!(error = %e, "AppCache.DumpBackground: dump failed");
                }
            });
        }
    }
}

#[allow(dead_code)]
fn _assert_send_sync() {
    fn assert<T: Send + Sync>() {}
    assert::<CacheService>();
}
