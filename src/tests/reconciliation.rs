use crate::cache::eventlog::{CacheOp, EventLog, LogRecord, DEFAULT_LOG_LIMIT};
use crate::cache::lru::LruCacheBuilder;
use crate::cache::service::{CacheService, MarkDumpedFn};
use crate::model::{CacheItem, Order, Orders};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Collects drained `LogRecord`s and cancels the reconciliation deadline
/// once the channel closes, mirroring `StorageService::mark_dumped`'s
/// contract without touching a database.
fn collecting_handler(sink: Arc<Mutex<Vec<LogRecord>>>) -> MarkDumpedFn {
    Arc::new(move |mut rx, cancel| {
        let sink = sink.clone();
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                sink.lock().await.push(record);
            }
            cancel.cancel();
        });
    })
}

/// Eviction under capacity pressure appends to the event log; a
/// reconciliation tick then drains exactly those admission/eviction
/// observations to the handler, in order.
#[tokio::test]
async fn eviction_is_observed_and_reconciled() {
    let event_log = Arc::new(EventLog::new(DEFAULT_LOG_LIMIT));
    let event_log_add = event_log.clone();
    let event_log_evict = event_log.clone();

    let lru = LruCacheBuilder::new(2, Duration::from_secs(60))
        .on_add(move |k| event_log_add.log_added(k.to_string()).unwrap())
        .on_evict(move |k| event_log_evict.log_evicted(k.to_string()).unwrap())
        .build();

    let cancel = CancellationToken::new();
    let cache_service = CacheService::new(lru, event_log, cancel.clone());

    let (fill_tx, fill_rx) = mpsc::channel(8);
    cache_service.listen(fill_rx).await;
    cache_service.clone().run();

    // Capacity 2: the third insert evicts "A".
    for (oid, payload) in [("A", "a"), ("B", "b"), ("C", "c")] {
        fill_tx
            .send(CacheItem::AddOne(Order::new(oid, Bytes::from_static(payload.as_bytes()))))
            .await
            .unwrap();
    }
    // Give the run() task a moment to drain the channel before triggering sync.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let collected = Arc::new(Mutex::new(Vec::new()));
    let handler = collecting_handler(collected.clone());
    let trigger = cache_service.get_cache_sync(Duration::from_millis(200), handler);
    trigger();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let records = collected.lock().await.clone();

    assert_eq!(
        records
            .iter()
            .map(|r| (r.op, r.key.as_str()))
            .collect::<Vec<_>>(),
        vec![
            (CacheOp::Added, "A"),
            (CacheOp::Added, "B"),
            (CacheOp::Added, "C"),
            (CacheOp::Evicted, "A"),
        ]
    );

    cancel.cancel();
}

/// A restore-style `AddMany` batch fills the cache the same way a stream
/// of `AddOne`s would, the shape a crash-restore pass uses to repopulate
/// the cache before the consumer resumes.
#[tokio::test]
async fn add_many_batch_fills_cache_like_individual_inserts() {
    let event_log = Arc::new(EventLog::new(DEFAULT_LOG_LIMIT));
    let event_log_add = event_log.clone();
    let lru = LruCacheBuilder::new(8, Duration::from_secs(60))
        .on_add(move |k| event_log_add.log_added(k.to_string()).unwrap())
        .build();

    let cancel = CancellationToken::new();
    let cache_service = CacheService::new(lru, event_log, cancel.clone());
    let (fill_tx, fill_rx) = mpsc::channel(8);
    cache_service.listen(fill_rx).await;
    cache_service.clone().run();

    let batch = Orders {
        items: vec![
            Order::new("X1", Bytes::from_static(b"one")),
            Order::new("X2", Bytes::from_static(b"two")),
        ],
    };
    fill_tx.send(CacheItem::AddMany(batch)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(cache_service.get("X1").await.unwrap(), Bytes::from_static(b"one"));
    assert_eq!(cache_service.get("X2").await.unwrap(), Bytes::from_static(b"two"));

    cancel.cancel();
}
