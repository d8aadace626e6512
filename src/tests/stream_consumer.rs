use crate::consumer::broker::{BrokerMessage, FakeBroker};
use crate::consumer::stream::StreamConsumer;
use crate::error::AppError;
use bytes::Bytes;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn msg(sequence: u64, data: &'static [u8]) -> BrokerMessage {
    BrokerMessage {
        sequence,
        subject: "orders".into(),
        data: Bytes::from_static(data),
        published_at: SystemTime::now(),
    }
}

/// Malformed JSON on the wire is reported on the error channel rather than
/// crashing the subscription loop.
#[tokio::test]
async fn malformed_payload_reports_error_without_storage() {
    let broker = FakeBroker::new();
    let (err_tx, mut err_rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let consumer = StreamConsumer::new(broker.clone(), err_tx, cancel.clone());

    consumer.run().await.unwrap();
    broker.publish(msg(1, b"not json")).await;

    let err = tokio::time::timeout(Duration::from_secs(1), err_rx.recv())
        .await
        .expect("error reported before timeout")
        .expect("channel open");
    assert!(matches!(err, AppError::Json(_)));

    consumer.disconnect().await.unwrap();
}

/// A well-formed envelope missing a required field fails `CustomerOrder`
/// validation and is reported the same way as a decode failure.
#[tokio::test]
async fn missing_required_field_reports_validation_error() {
    let broker = FakeBroker::new();
    let (err_tx, mut err_rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let consumer = StreamConsumer::new(broker.clone(), err_tx, cancel.clone());

    consumer.run().await.unwrap();
    let incomplete = br#"{"order_uid":"","track_number":"T1","delivery":{"name":"","phone":"","zip":"","city":"","address":"","region":"","email":""},"payment":{"transaction":"","currency":"","provider":"","amount":0,"payment_dt":0,"bank":"","delivery_cost":0,"goods_total":0},"items":[]}"#;
    broker.publish(msg(2, incomplete)).await;

    let err = tokio::time::timeout(Duration::from_secs(1), err_rx.recv())
        .await
        .expect("error reported before timeout")
        .expect("channel open");
    assert!(matches!(err, AppError::ValidationFailed(_)));

    consumer.disconnect().await.unwrap();
}

/// With no storage wired yet, a well-formed message is dropped quietly
/// instead of panicking -- the supervisor always wires storage before the
/// first `run*` call, but the consumer must not assume that ordering.
#[tokio::test]
async fn well_formed_message_without_storage_is_dropped_not_panicked() {
    let broker = FakeBroker::new();
    let (err_tx, mut err_rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let consumer = StreamConsumer::new(broker.clone(), err_tx, cancel.clone());

    consumer.run().await.unwrap();
    let well_formed = br#"{"order_uid":"A1","track_number":"T1","delivery":{"name":"n","phone":"p","zip":"z","city":"c","address":"a","region":"r","email":"e"},"payment":{"transaction":"t","currency":"USD","provider":"p","amount":1,"payment_dt":1,"bank":"b","delivery_cost":1,"goods_total":1},"items":[{"chrt_id":1,"price":1,"rid":"r","name":"n","total_price":1,"nm_id":1,"brand":"b"}]}"#;
    broker.publish(msg(3, well_formed)).await;

    let result = tokio::time::timeout(Duration::from_millis(200), err_rx.recv()).await;
    assert!(result.is_err(), "no error should be reported for a valid, storage-less message");

    consumer.disconnect().await.unwrap();
}
