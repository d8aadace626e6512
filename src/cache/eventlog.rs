//! cache/eventlog.rs
//!
//! Single-writer/multi-appender buffer of admission/eviction observations
//! (C3). Appenders and the drainer each take the exclusive lock only for a
//! short critical section -- never across an `.await` -- since a
//! `parking_lot::MutexGuard` is `!Send` and `dump` runs inside
//! `tokio::spawn`. Overflow is a reportable error, never a silent drop.

use crate::error::{AppError, AppResult};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_LOG_LIMIT: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOp {
    Added,
    Evicted,
    Sentinel,
}

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub op: CacheOp,
    pub key: String,
}

pub struct EventLog {
    records: Mutex<Vec<LogRecord>>,
    limit: usize,
}

impl EventLog {
    pub fn new(limit: usize) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            limit,
        }
    }

    pub fn log_added(&self, key: String) -> AppResult<()> {
        self.push(LogRecord {
            op: CacheOp::Added,
            key,
        })
    }

    pub fn log_evicted(&self, key: String) -> AppResult<()> {
        self.push(LogRecord {
            op: CacheOp::Evicted,
            key,
        })
    }

    fn push(&self, record: LogRecord) -> AppResult<()> {
        let mut records = self.records.lock();
        if records.len() >= self.limit {
            return Err(AppError::EventLogOverflow { limit: self.limit });
        }
        records.push(record);
        Ok(())
    }

    /// Drains the buffer into `out`, one record per send. If the buffer is
    /// empty, sends a single `Sentinel` record. If `cancel` fires mid-drain,
    /// the unsent leftovers are merged back ahead of whatever was appended
    /// in the meantime (I2: the next tick sees every record exactly once,
    /// in order, never duplicated or lost) -- the lock itself is only ever
    /// held across a `mem::take` or a merge-back, never across the `.await`
    /// on `out.send(...)`.
    pub async fn dump(&self, cancel: CancellationToken, out: mpsc::Sender<LogRecord>) -> AppResult<()> {
        let drained = {
            let mut records = self.records.lock();
            debug!(count = records.len(), "cache event log dump starting");
            std::mem::take(&mut *records)
        };

        if drained.is_empty() {
            tokio::select! {
                res = out.send(LogRecord { op: CacheOp::Sentinel, key: String::new() }) => {
                    res.map_err(|_| AppError::Internal("dump channel closed".into()))?;
                }
                _ = cancel.cancelled() => {
                    debug!("dump cancelled before sentinel send");
                }
            }
            return Ok(());
        }

        for (i, record) in drained.iter().enumerate() {
            tokio::select! {
                res = out.send(record.clone()) => {
                    if res.is_err() {
                        return Err(AppError::Internal("dump channel closed".into()));
                    }
                }
                _ = cancel.cancelled() => {
                    debug!("dump cancelled mid-drain, records retained for next tick");
                    let mut records = self.records.lock();
                    let mut retained = drained[i..].to_vec();
                    retained.append(&mut records);
                    *records = retained;
                    return Ok(());
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_reports_error_not_drop() {
        let log = EventLog::new(2);
        log.log_added("a".into()).unwrap();
        log.log_added("b".into()).unwrap();
        assert!(log.log_added("c".into()).is_err());
    }

    #[tokio::test]
    async fn empty_log_emits_sentinel() {
        let log = EventLog::new(DEFAULT_LOG_LIMIT);
        let (tx, mut rx) = mpsc::channel(4);
        log.dump(CancellationToken::new(), tx).await.unwrap();
        let record = rx.recv().await.unwrap();
        assert_eq!(record.op, CacheOp::Sentinel);
    }

    #[tokio::test]
    async fn dump_drains_in_order_and_clears() {
        let log = EventLog::new(DEFAULT_LOG_LIMIT);
        log.log_added("A".into()).unwrap();
        log.log_added("B".into()).unwrap();
        log.log_evicted("A".into()).unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        log.dump(CancellationToken::new(), tx).await.unwrap();

        let mut got = Vec::new();
        while let Some(r) = rx.recv().await {
            got.push((r.op, r.key));
        }
        assert_eq!(
            got,
            vec![
                (CacheOp::Added, "A".to_string()),
                (CacheOp::Added, "B".to_string()),
                (CacheOp::Evicted, "A".to_string()),
            ]
        );

        // buffer should now be empty
        let (tx2, mut rx2) = mpsc::channel(4);
        log.dump(CancellationToken::new(), tx2).await.unwrap();
        assert_eq!(rx2.recv().await.unwrap().op, CacheOp::Sentinel);
    }

    #[tokio::test]
    async fn cancelled_dump_retains_records() {
        let log = EventLog::new(DEFAULT_LOG_LIMIT);
        log.log_added("A".into()).unwrap();
        log.log_added("B".into()).unwrap();

        // Fill the channel so the drain's send is forced to block, making the
        // already-cancelled branch the only one ready.
        let (tx, rx) = mpsc::channel(1);
        tx.try_send(LogRecord {
            op: CacheOp::Sentinel,
            key: String::new(),
        })
        .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        log.dump(cancel, tx).await.unwrap();
        drop(rx);

        let (tx2, mut rx2) = mpsc::channel(8);
        log.dump(CancellationToken::new(), tx2).await.unwrap();
        let first = rx2.recv().await.unwrap();
        assert_eq!(first.key, "A");
    }
}
