use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{EventLog, LogError, LogRecord};

/// Process-local log. Nothing survives a restart.
///
/// Used by `--log-backend memory` and by tests, which can flip it
/// unavailable to exercise the transient-failure paths.
pub struct MemoryLog {
    channel: String,
    inner: Mutex<Inner>,
}

struct Inner {
    records: Vec<Vec<u8>>,
    commits: HashMap<String, u64>,
    available: bool,
}

impl MemoryLog {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            inner: Mutex::new(Inner {
                records: Vec::new(),
                commits: HashMap::new(),
                available: true,
            }),
        }
    }

    /// Simulate the log going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn available(&self) -> Result<MutexGuard<'_, Inner>, LogError> {
        let inner = self.lock();
        if inner.available {
            Ok(inner)
        } else {
            Err(LogError::Unavailable(format!(
                "memory log `{}` is offline",
                self.channel
            )))
        }
    }
}

impl EventLog for MemoryLog {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn append(&self, payload: &[u8]) -> Result<u64, LogError> {
        let mut inner = self.available()?;
        inner.records.push(payload.to_vec());
        Ok(inner.records.len() as u64 - 1)
    }

    fn fetch(&self, from: u64, max: usize) -> Result<Vec<LogRecord>, LogError> {
        let inner = self.available()?;
        let start = usize::try_from(from).unwrap_or(usize::MAX);
        Ok(inner
            .records
            .iter()
            .enumerate()
            .skip(start)
            .take(max)
            .map(|(i, payload)| LogRecord {
                offset: i as u64,
                payload: payload.clone(),
            })
            .collect())
    }

    fn end_offset(&self) -> Result<u64, LogError> {
        Ok(self.available()?.records.len() as u64)
    }

    fn committed_offset(&self, group: &str) -> Result<Option<u64>, LogError> {
        Ok(self.available()?.commits.get(group).copied())
    }

    fn commit(&self, group: &str, next_offset: u64) -> Result<(), LogError> {
        self.available()?
            .commits
            .insert(group.to_string(), next_offset);
        Ok(())
    }

    fn probe(&self) -> Result<(), LogError> {
        self.available().map(|_| ())
    }
}
