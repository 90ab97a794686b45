use std::sync::Arc;

use thiserror::Error;

use crate::log::{LogError, SharedLog};

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("append failed: {0}")]
    Append(#[from] LogError),

    #[error("append task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Appends locally submitted commands to the durable log.
///
/// No retries: the caller learns about the failure and decides. A published
/// command becomes visible, to its author included, only once the log reader
/// echoes it back.
#[derive(Clone)]
pub struct LogWriter {
    log: SharedLog,
}

impl LogWriter {
    pub fn new(log: SharedLog) -> Self {
        Self { log }
    }

    pub async fn publish(&self, raw: impl Into<Vec<u8>>) -> Result<u64, WriteError> {
        let log = Arc::clone(&self.log);
        let payload = raw.into();
        let offset = tokio::task::spawn_blocking(move || log.append(&payload)).await??;
        tracing::debug!(offset, channel = self.log.channel(), "writer: command appended");
        Ok(offset)
    }
}
