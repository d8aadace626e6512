//! consumer/broker.rs
//!
//! The broker's wire format is out of scope here: this defines the
//! durable-subscription boundary as a trait, plus an in-memory test double.
//! A real implementation would adapt a NATS JetStream / streaming client to
//! this same shape.

use crate::error::AppResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub sequence: u64,
    pub subject: String,
    pub data: Bytes,
    pub published_at: SystemTime,
}

/// A durable, broker-side cursor keyed by `(cluster, client, channel,
/// durable_name)` that survives client restarts. Subscribing returns a
/// channel of messages; closing/dropping the sender signals end of stream.
#[async_trait]
pub trait DurableBroker: Send + Sync {
    async fn subscribe_all(&self) -> AppResult<mpsc::Receiver<BrokerMessage>>;
    async fn subscribe_from_last_received(&self) -> AppResult<mpsc::Receiver<BrokerMessage>>;
    async fn subscribe_from_timestamp(&self, ts: SystemTime) -> AppResult<mpsc::Receiver<BrokerMessage>>;
    async fn unsubscribe(&self) -> AppResult<()>;
    async fn disconnect(&self) -> AppResult<()>;
}

/// In-memory double used by tests and local runs: `publish` appends to a
/// backlog and forwards to the live subscriber (if any); `subscribe_*`
/// controls how much of the backlog is replayed first.
#[derive(Default)]
pub struct FakeBroker {
    state: Mutex<FakeBrokerState>,
}

#[derive(Default)]
struct FakeBrokerState {
    backlog: VecDeque<BrokerMessage>,
    last_received_seq: Option<u64>,
    live: Option<mpsc::Sender<BrokerMessage>>,
}

impl FakeBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeBrokerState::default()),
        })
    }

    pub async fn publish(&self, msg: BrokerMessage) {
        let mut state = self.state.lock().await;
        state.last_received_seq = Some(msg.sequence);
        if let Some(live) = &state.live {
            let _ = live.send(msg.clone()).await;
        }
        state.backlog.push_back(msg);
    }
}

#[async_trait]
impl DurableBroker for FakeBroker {
    async fn subscribe_all(&self) -> AppResult<mpsc::Receiver<BrokerMessage>> {
        let (tx, rx) = mpsc::channel(256);
        let mut state = self.state.lock().await;
        for msg in state.backlog.iter().cloned() {
            let _ = tx.send(msg).await;
        }
        state.live = Some(tx);
        Ok(rx)
    }

    async fn subscribe_from_last_received(&self) -> AppResult<mpsc::Receiver<BrokerMessage>> {
        let (tx, rx) = mpsc::channel(256);
        let mut state = self.state.lock().await;
        state.live = Some(tx);
        Ok(rx)
    }

    async fn subscribe_from_timestamp(&self, ts: SystemTime) -> AppResult<mpsc::Receiver<BrokerMessage>> {
        let (tx, rx) = mpsc::channel(256);
        let mut state = self.state.lock().await;
        for msg in state.backlog.iter().filter(|m| m.published_at >= ts).cloned() {
            let _ = tx.send(msg).await;
        }
        state.live = Some(tx);
        Ok(rx)
    }

    async fn unsubscribe(&self) -> AppResult<()> {
        self.state.lock().await.live = None;
        Ok(())
    }

    async fn disconnect(&self) -> AppResult<()> {
        self.state.lock().await.live = None;
        Ok(())
    }
}

/// Synthetic clock helper for timestamp-replay tests, independent of
/// wall-clock `SystemTime::now()` at call time.
pub fn synthetic_time(offset: Duration) -> SystemTime {
    SystemTime::UNIX_EPOCH + offset
}
