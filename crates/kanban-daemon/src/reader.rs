//! Log reader: the single writer of the projection.
//!
//! Polls the log for the next batch, decodes each record, applies it to the
//! projection and broadcasts it through the hub. Apply and broadcast happen
//! under the projection's write guard, one record at a time, in log order.

use std::sync::Arc;

use kanban_core::codec;
use kanban_core::reducer::{self, ApplyOutcome};
use kanban_core::types::{Board, BoardEvent};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ReaderOptions;
use crate::hub::{FanoutHub, Frame};
use crate::log::{EventLog, LogError, LogRecord, SharedLog};
use crate::projection::SharedProjection;

/// Counters for one fetched batch (or a whole replay).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub fetched: usize,
    pub applied: usize,
    pub dropped: usize,
}

impl BatchStats {
    fn absorb(&mut self, other: BatchStats) {
        self.fetched += other.fetched;
        self.applied += other.applied;
        self.dropped += other.dropped;
    }
}

pub struct LogReader {
    log: SharedLog,
    store: SharedProjection,
    hub: Arc<FanoutHub>,
    options: ReaderOptions,
    cancel: CancellationToken,
    /// `None` until the start position has been resolved against the log.
    next_offset: Option<u64>,
    reachable: bool,
}

impl LogReader {
    pub fn new(
        log: SharedLog,
        store: SharedProjection,
        hub: Arc<FanoutHub>,
        options: ReaderOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            log,
            store,
            hub,
            options,
            cancel,
            next_offset: None,
            reachable: true,
        }
    }

    /// Offset of the next record this reader will fetch, once known.
    pub fn next_offset(&self) -> Option<u64> {
        self.next_offset
    }

    /// Poll until cancelled. A full batch is followed immediately by the
    /// next fetch; anything less waits one poll interval.
    pub async fn run(&mut self) {
        info!(
            channel = self.log.channel(),
            group = %self.options.group,
            start_from = %self.options.start_from,
            "reader: started"
        );
        loop {
            let caught_up = match self.poll_once().await {
                Ok(stats) => stats.fetched < self.options.batch_size,
                Err(_) => true,
            };

            if !caught_up {
                if self.cancel.is_cancelled() {
                    break;
                }
                continue;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.options.poll_interval) => {}
            }
        }
        info!("reader: cancellation requested, shutting down");
    }

    /// Fetch, apply and broadcast one batch, then commit the group offset.
    ///
    /// Returns an error only when the log could not be read at all. Bad
    /// records and failed commits are logged and skipped.
    pub async fn poll_once(&mut self) -> Result<BatchStats, LogError> {
        let records = match self.fetch_batch().await {
            Ok(records) => {
                self.mark_reachable();
                records
            }
            Err(e) => {
                self.mark_unreachable(&e);
                return Err(e);
            }
        };

        let mut stats = BatchStats {
            fetched: records.len(),
            ..BatchStats::default()
        };
        for record in records {
            self.next_offset = Some(record.offset + 1);
            match codec::decode_event(&record.payload) {
                Ok(event) => {
                    self.dispatch(record.offset, &event).await;
                    stats.applied += 1;
                }
                Err(e) => {
                    warn!(offset = record.offset, error = %e, "reader: dropping undecodable record");
                    stats.dropped += 1;
                }
            }
        }

        if stats.fetched > 0 {
            self.commit().await;
        }
        Ok(stats)
    }

    async fn fetch_batch(&mut self) -> Result<Vec<LogRecord>, LogError> {
        let from = match self.next_offset {
            Some(offset) => offset,
            None => {
                let log = Arc::clone(&self.log);
                let group = self.options.group.clone();
                let start = self.options.start_from;
                let offset =
                    tokio::task::spawn_blocking(move || start.resolve(log.as_ref(), &group))
                        .await??;
                info!(offset, start_from = %start, "reader: start position resolved");
                self.next_offset = Some(offset);
                offset
            }
        };

        let log = Arc::clone(&self.log);
        let max = self.options.batch_size.max(1);
        tokio::task::spawn_blocking(move || log.fetch(from, max)).await?
    }

    async fn dispatch(&self, offset: u64, event: &BoardEvent) {
        let frame: Option<Frame> = match codec::encode(event) {
            Ok(text) => Some(Arc::from(text)),
            Err(e) => {
                warn!(offset, error = %e, "reader: event could not be encoded, not broadcasting");
                None
            }
        };

        let hub = &self.hub;
        let (outcome, delivered) = self
            .store
            .apply_then(event, |_, _| frame.map_or(0, |f| hub.broadcast(f)))
            .await;
        log_outcome(offset, event, &outcome, delivered);
    }

    async fn commit(&self) {
        let Some(next) = self.next_offset else {
            return;
        };
        let log = Arc::clone(&self.log);
        let group = self.options.group.clone();
        let result = tokio::task::spawn_blocking(move || log.commit(&group, next)).await;
        match result {
            Ok(Ok(())) => debug!(next_offset = next, "reader: offset committed"),
            Ok(Err(e)) => warn!(next_offset = next, error = %e, "reader: commit failed"),
            Err(e) => warn!(next_offset = next, error = %e, "reader: commit task failed"),
        }
    }

    fn mark_unreachable(&mut self, err: &LogError) {
        if self.reachable {
            warn!(error = %err, "reader: log unavailable, will keep polling");
            self.reachable = false;
        } else {
            debug!(error = %err, "reader: log still unavailable");
        }
    }

    fn mark_reachable(&mut self) {
        if !self.reachable {
            info!("reader: log reachable again");
            self.reachable = true;
        }
    }
}

fn log_outcome(offset: u64, event: &BoardEvent, outcome: &ApplyOutcome, delivered: usize) {
    let kind = event.kind();
    let card = event.card_id().unwrap_or("-");
    match outcome {
        ApplyOutcome::NotFound => {
            debug!(offset, kind, card, "reader: card not on board, nothing moved");
        }
        ApplyOutcome::UnknownColumn(column) => {
            debug!(offset, kind, card, column = %column, "reader: unknown column, event ignored");
        }
        ApplyOutcome::Moved {
            from,
            source_mismatch: true,
            ..
        } => {
            debug!(offset, card, found_in = %from, "reader: move source differs from from_col");
        }
        _ => {}
    }
    debug!(offset, kind, card, delivered, "reader: event applied");
}

/// Replay the whole channel onto `board` without touching a projection or
/// hub. Backs `kanband replay`.
pub fn replay_log(
    log: &dyn EventLog,
    board: &mut Board,
    batch_size: usize,
) -> Result<BatchStats, LogError> {
    let batch_size = batch_size.max(1);
    let mut total = BatchStats::default();
    let mut from = 0;
    loop {
        let records = log.fetch(from, batch_size)?;
        let mut stats = BatchStats {
            fetched: records.len(),
            ..BatchStats::default()
        };
        for record in &records {
            from = record.offset + 1;
            match codec::decode_event(&record.payload) {
                Ok(event) => {
                    reducer::apply(board, &event);
                    stats.applied += 1;
                }
                Err(e) => {
                    warn!(offset = record.offset, error = %e, "replay: dropping undecodable record");
                    stats.dropped += 1;
                }
            }
        }
        total.absorb(stats);
        if records.len() < batch_size {
            return Ok(total);
        }
    }
}
