//! supervisor.rs
//!
//! Wires C1-C7, owns the root cancellation token, decides restore vs
//! normal startup, and runs the error-triage / reconciliation main loop
//! (C8).

use crate::cache::eventlog::{EventLog, DEFAULT_LOG_LIMIT};
use crate::cache::lru::LruCacheBuilder;
use crate::cache::service::{CacheService, MarkDumpedFn};
use crate::config::AppConfig;
use crate::consumer::broker::DurableBroker;
use crate::consumer::stream::StreamConsumer;
use crate::db::adapter::PgAdapter;
use crate::error::{AppError, AppResult};
use crate::http::handlers::HttpState;
use crate::storage::service::StorageService;
use crate::timestamp::TimestampKeeper;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct Supervisor {
    cfg: AppConfig,
    cancel: CancellationToken,
    storage: Arc<StorageService>,
    cache: Arc<CacheService>,
    consumer: Arc<StreamConsumer>,
    timestamps: TimestampKeeper,
    sync_trigger: Box<dyn Fn() + Send + Sync>,
    err_rx: Mutex<Option<mpsc::Receiver<AppError>>>,
}

impl Supervisor {
    /// Builds every component and wires their callbacks, but does not yet
    /// decide restore-vs-normal startup or open the broker subscription --
    /// see `run`.
    pub async fn bootstrap(cfg: AppConfig, broker: Arc<dyn DurableBroker>) -> AppResult<Arc<Self>> {
        let cancel = CancellationToken::new();
        let (err_tx, err_rx) = mpsc::channel(256);

        let db = Arc::new(PgAdapter::connect(&cfg.dbengine).await?);
        db.ping().await?;
        info!("AppSupervisor.bootstrap: database reachable");

        let storage = StorageService::new(db, cfg.storage_pool_size, err_tx.clone(), cancel.clone());
        let consumer = StreamConsumer::new(broker, err_tx.clone(), cancel.clone());
        consumer.set_storage_on_callback(storage.clone()).await;

        let event_log = Arc::new(EventLog::new(DEFAULT_LOG_LIMIT));
        let event_log_for_add = event_log.clone();
        let event_log_for_evict = event_log.clone();
        let storage_for_load = storage.clone();

        let lru = LruCacheBuilder::new(cfg.memcache.size, cfg.memcache.expiration_time)
            .on_add(move |k| {
                if let Err(e) = event_log_for_add.log_added(k.to_string()) {
                    error!(error = %e, "AppCache.MarkAdded: event log overflow");
                }
            })
            .on_evict(move |k| {
                if let Err(e) = event_log_for_evict.log_evicted(k.to_string()) {
                    error!(error = %e, "AppCache.MarkEvicted: event log overflow");
                }
            })
            .on_load(move |key| {
                let storage = storage_for_load.clone();
                Box::pin(async move { storage.fetch_order(&key).await.map(|o| o.raw_ord) })
            })
            .build();

        let cache = CacheService::new(lru, event_log, cancel.clone());
        cache.listen(storage.get_channel().await).await;
        cache.clone().run();

        let storage_for_dump = storage.clone();
        let mark_dumped: MarkDumpedFn = Arc::new(move |rx, tick_cancel| {
            storage_for_dump.mark_dumped(rx, tick_cancel);
        });
        let sync_trigger = Box::new(cache.get_cache_sync(cfg.timestamp_interval, mark_dumped));

        let timestamps = TimestampKeeper::at_default_path();

        Ok(Arc::new(Self {
            cfg,
            cancel,
            storage,
            cache,
            consumer,
            timestamps,
            sync_trigger,
            err_rx: Mutex::new(Some(err_rx)),
        }))
    }

    /// Start-mode decision, HTTP mount, and main loop. Runs until the root
    /// token is cancelled or a fatal DB-lost error is observed.
    pub async fn run(self: &Arc<Self>, http_router_state: HttpState) -> AppResult<()> {
        if self.timestamps.check_crashed() {
            let prev_ts = self.timestamps.get_previous_ts()?;
            info!(?prev_ts, "AppSupervisor.run: prior-crash timestamp found, restoring cache");
            let restore_window = self.cfg.timestamp_interval * 2u32;
            let (_restore_cancel, first_batch) =
                self.storage.restore_cache(self.cfg.restore_rec_limit, restore_window);
            let _ = first_batch.await;
            self.consumer.run_from_timestamp(prev_ts).await?;
        } else {
            info!("AppSupervisor.run: cold start");
            self.timestamps.make_new_ts_file()?;
            self.consumer.run().await?;
        }

        let router = crate::http::build_router(
            http_router_state,
            crate::http::metrics::MetricsState {
                handle: crate::metrics::install()?,
            },
        );
        let http_cfg = self.cfg.http_server.clone();
        let http_cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                res = crate::http::run_http_server(&http_cfg, router) => {
                    if let Err(e) = res {
                        error!(error = %e, "http server exited with error");
                    }
                }
                _ = http_cancel.cancelled() => {}
            }
        });

        self.main_loop().await
    }

    async fn main_loop(self: &Arc<Self>) -> AppResult<()> {
        let mut err_rx = self
            .err_rx
            .lock()
            .await
            .take()
            .expect("Supervisor::run called more than once");

        let mut ticker = tokio::time::interval(self.cfg.timestamp_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("AppSupervisor.main_loop: shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    (self.sync_trigger)();
                    if let Err(e) = self.timestamps.update_timestamp(std::time::SystemTime::now()) {
                        error!(error = %e, "AppSupervisor.main_loop: failed to update timestamp file");
                    }
                }
                maybe_err = err_rx.recv() => {
                    let Some(err) = maybe_err else { continue };
                    if matches!(err, AppError::DbConnectionLost) {
                        warn!("AppSupervisor.main_loop: DB connection lost, probing");
                        if self.storage.test_connection().await.is_err() {
                            error!("AppSupervisor.main_loop: DB connection lost, terminating");
                            self.shutdown().await;
                            return Err(AppError::DbConnectionLost);
                        }
                    } else {
                        warn!(error = %err, "AppSupervisor.main_loop: non-fatal error");
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Cancels the root token and drains consumer then storage, in order.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let _ = self.consumer.disconnect().await;
        self.storage.disconnect().await;
    }

    pub fn cache(&self) -> Arc<CacheService> {
        self.cache.clone()
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
