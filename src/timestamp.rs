//! timestamp.rs
//!
//! Persists a wall-clock checkpoint file; its presence on startup is the
//! sole crash-recovery signal (C7).

use crate::error::{AppError, AppResult};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const TS_BYTES: usize = 8;

pub struct TimestampKeeper {
    path: PathBuf,
}

impl TimestampKeeper {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default relative path: a well-known filename in the working dir.
    pub fn at_default_path() -> Self {
        Self::new("app.created")
    }

    /// Presence of the file is the sole crash-recovery signal.
    pub fn check_crashed(&self) -> bool {
        self.path.is_file()
    }

    /// Creates the file and stamps it with the current time.
    pub fn make_new_ts_file(&self) -> AppResult<()> {
        self.update_timestamp(SystemTime::now())
    }

    /// Rewrites the file with `t`, fixed-width binary encoding (8-byte
    /// little-endian nanoseconds since the Unix epoch).
    pub fn update_timestamp(&self, t: SystemTime) -> AppResult<()> {
        let nanos = t
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_err(|e| AppError::Timestamp(format!("system time before epoch: {e}")))?
            .as_nanos();
        let nanos: i64 = nanos
            .try_into()
            .map_err(|_| AppError::Timestamp("timestamp overflowed i64 nanos".into()))?;
        std::fs::write(&self.path, nanos.to_le_bytes())?;
        Ok(())
    }

    /// Reads the fixed-width binary timestamp from the file.
    pub fn get_previous_ts(&self) -> AppResult<SystemTime> {
        let bytes = std::fs::read(&self.path)?;
        if bytes.len() != TS_BYTES {
            return Err(AppError::Timestamp(format!(
                "timestamp file {:?} has {} bytes, expected {TS_BYTES}",
                self.path,
                bytes.len()
            )));
        }
        let mut buf = [0u8; TS_BYTES];
        buf.copy_from_slice(&bytes);
        let nanos = i64::from_le_bytes(buf);
        if nanos < 0 {
            return Err(AppError::Timestamp("negative timestamp in file".into()));
        }
        Ok(SystemTime::UNIX_EPOCH + Duration::from_nanos(nanos as u64))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
