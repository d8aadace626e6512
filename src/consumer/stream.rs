//! consumer/stream.rs
//!
//! Durable subscription with three start modes; per-message
//! validate-then-persist callback (C6).

use crate::consumer::broker::{BrokerMessage, DurableBroker};
use crate::error::{AppError, AppResult};
use crate::model::CustomerOrder;
use crate::storage::service::StorageService;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct StreamConsumer {
    broker: Arc<dyn DurableBroker>,
    storage: Mutex<Option<Arc<StorageService>>>,
    err_tx: mpsc::Sender<AppError>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamConsumer {
    pub fn new(broker: Arc<dyn DurableBroker>, err_tx: mpsc::Sender<AppError>, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            broker,
            storage: Mutex::new(None),
            err_tx,
            cancel,
            task: Mutex::new(None),
        })
    }

    pub async fn set_storage_on_callback(&self, storage: Arc<StorageService>) {
        *self.storage.lock().await = Some(storage);
    }

    pub async fn run(self: &Arc<Self>) -> AppResult<()> {
        let rx = self.broker.subscribe_all().await?;
        self.spawn_loop(rx).await;
        Ok(())
    }

    pub async fn run_from_last_received(self: &Arc<Self>) -> AppResult<()> {
        let rx = self.broker.subscribe_from_last_received().await?;
        self.spawn_loop(rx).await;
        Ok(())
    }

    pub async fn run_from_timestamp(self: &Arc<Self>, ts: SystemTime) -> AppResult<()> {
        let rx = self.broker.subscribe_from_timestamp(ts).await?;
        self.spawn_loop(rx).await;
        Ok(())
    }

    pub async fn unsubscribe(&self) -> AppResult<()> {
        self.broker.unsubscribe().await
    }

    pub async fn disconnect(&self) -> AppResult<()> {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
        self.broker.disconnect().await
    }

    async fn spawn_loop(self: &Arc<Self>, mut rx: mpsc::Receiver<BrokerMessage>) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => {
                        debug!("StreamConsumer.Callback: context done, closing subscription");
                        let _ = this.broker.unsubscribe().await;
                        return;
                    }
                    maybe_msg = rx.recv() => {
                        let Some(msg) = maybe_msg else { return };
                        this.handle_message(msg).await;
                    }
                }
            }
        });
        *self.task.lock().await = Some(handle);
    }

    async fn handle_message(&self, msg: BrokerMessage) {
        const MARK: &str = "AppConsumer.Callback";

        let order: CustomerOrder = match serde_json::from_slice(&msg.data) {
            Ok(o) => o,
            Err(e) => {
                self.report_error(AppError::Json(e), msg.sequence, MARK).await;
                return;
            }
        };

        if let Err(reason) = order.validate() {
            self.report_error(AppError::ValidationFailed(reason), msg.sequence, MARK)
                .await;
            return;
        }

        let storage = self.storage.lock().await.clone();
        let Some(storage) = storage else {
            warn!("{MARK}: no storage wired, dropping message {}", msg.sequence);
            return;
        };

        let stored = storage.convert(msg.sequence, order.order_uid.clone(), msg.data.clone());
        storage.save_order(stored);
        debug!(
            subject = %msg.subject,
            sequence = msg.sequence,
            "{MARK}: order sent to storage"
        );
    }

    async fn report_error(&self, err: AppError, sequence: u64, mark: &str) {
        warn!(sequence, error = %err, "{mark}");
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.err_tx.send(err) => {}
        }
    }
}
