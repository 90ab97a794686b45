//! Periodic log liveness probe, broadcast to every subscriber as a `health`
//! frame.

use std::sync::Arc;

use kanban_core::codec;
use kanban_core::types::{BoardEvent, HealthStatus};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MonitorOptions;
use crate::hub::FanoutHub;
use crate::log::SharedLog;

/// How a single probe ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeSignal {
    Success,
    Timeout,
    Error,
    Panic,
}

impl ProbeSignal {
    pub fn status(self) -> HealthStatus {
        match self {
            Self::Success => HealthStatus::Healthy,
            Self::Timeout | Self::Error | Self::Panic => HealthStatus::Unreachable,
        }
    }
}

pub struct LivenessMonitor {
    log: SharedLog,
    hub: Arc<FanoutHub>,
    options: MonitorOptions,
    cancel: CancellationToken,
    last: Option<HealthStatus>,
}

impl LivenessMonitor {
    pub fn new(
        log: SharedLog,
        hub: Arc<FanoutHub>,
        options: MonitorOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            log,
            hub,
            options,
            cancel,
            last: None,
        }
    }

    /// Probe once immediately, then once per interval, until cancelled.
    pub async fn run(&mut self) {
        info!(
            interval_ms = self.options.interval.as_millis() as u64,
            "monitor: started"
        );
        let mut ticker = tokio::time::interval(self.options.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
        info!("monitor: cancellation requested, shutting down");
    }

    /// Probe and broadcast exactly one health frame.
    pub async fn tick(&mut self) -> HealthStatus {
        let signal = self.probe().await;
        let status = signal.status();

        if self.last != Some(status) {
            match status {
                HealthStatus::Healthy => info!(channel = self.log.channel(), "monitor: log healthy"),
                HealthStatus::Unreachable => {
                    warn!(channel = self.log.channel(), ?signal, "monitor: log unreachable")
                }
            }
            self.last = Some(status);
        }

        match codec::encode(&BoardEvent::health(status)) {
            Ok(text) => {
                let delivered = self.hub.broadcast(Arc::from(text));
                debug!(?status, delivered, "monitor: health broadcast");
            }
            Err(e) => warn!(error = %e, "monitor: health frame could not be encoded"),
        }
        status
    }

    /// Run the log's probe on a blocking thread, bounded by the probe timeout.
    pub async fn probe(&self) -> ProbeSignal {
        let log = Arc::clone(&self.log);
        let task = tokio::task::spawn_blocking(move || log.probe());
        match tokio::time::timeout(self.options.probe_timeout, task).await {
            Ok(Ok(Ok(()))) => ProbeSignal::Success,
            Ok(Ok(Err(e))) => {
                debug!(error = %e, "monitor: probe failed");
                ProbeSignal::Error
            }
            Ok(Err(e)) => {
                warn!(error = %e, "monitor: probe panicked");
                ProbeSignal::Panic
            }
            Err(_) => {
                debug!(
                    timeout_ms = self.options.probe_timeout.as_millis() as u64,
                    "monitor: probe timed out"
                );
                ProbeSignal::Timeout
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::log::{EventLog, LogError, LogRecord, MemoryLog};

    #[derive(Clone, Copy)]
    enum Step {
        Up,
        Down,
        Panic,
        Hang,
    }

    /// Log whose probe plays back a fixed script, then stays up.
    struct ScriptedLog {
        steps: Mutex<VecDeque<Step>>,
    }

    impl ScriptedLog {
        fn new(steps: &[Step]) -> Self {
            Self {
                steps: Mutex::new(steps.iter().copied().collect()),
            }
        }
    }

    impl EventLog for ScriptedLog {
        fn channel(&self) -> &str {
            "scripted"
        }
        fn append(&self, _payload: &[u8]) -> Result<u64, LogError> {
            Ok(0)
        }
        fn fetch(&self, _from: u64, _max: usize) -> Result<Vec<LogRecord>, LogError> {
            Ok(Vec::new())
        }
        fn end_offset(&self) -> Result<u64, LogError> {
            Ok(0)
        }
        fn committed_offset(&self, _group: &str) -> Result<Option<u64>, LogError> {
            Ok(None)
        }
        fn commit(&self, _group: &str, _next_offset: u64) -> Result<(), LogError> {
            Ok(())
        }
        fn probe(&self) -> Result<(), LogError> {
            let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Up);
            match step {
                Step::Up => Ok(()),
                Step::Down => Err(LogError::Unavailable("scripted outage".into())),
                Step::Panic => panic!("scripted probe panic"),
                Step::Hang => {
                    std::thread::sleep(Duration::from_millis(300));
                    Ok(())
                }
            }
        }
    }

    fn options(interval_ms: u64) -> MonitorOptions {
        MonitorOptions {
            interval: Duration::from_millis(interval_ms),
            probe_timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn one_frame_per_probe_in_order() {
        let hub = Arc::new(FanoutHub::new(16));
        let (handle, mut rx) = hub.handle();
        hub.register(handle);

        let log = Arc::new(ScriptedLog::new(&[
            Step::Up,
            Step::Down,
            Step::Panic,
            Step::Up,
        ]));
        let cancel = CancellationToken::new();
        let mut monitor = LivenessMonitor::new(log, Arc::clone(&hub), options(20), cancel.clone());
        let task = tokio::spawn(async move { monitor.run().await });

        let mut statuses = Vec::new();
        for _ in 0..4 {
            let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("health frame within timeout")
                .unwrap();
            statuses.push(frame.to_string());
        }
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("monitor should stop after cancellation")
            .unwrap();

        assert_eq!(
            statuses,
            vec![
                r#"{"type":"health","status":"healthy"}"#,
                r#"{"type":"health","status":"unreachable"}"#,
                r#"{"type":"health","status":"unreachable"}"#,
                r#"{"type":"health","status":"healthy"}"#,
            ]
        );
    }

    #[tokio::test]
    async fn hung_probe_times_out_as_unreachable() {
        let hub = Arc::new(FanoutHub::new(4));
        let log = Arc::new(ScriptedLog::new(&[Step::Hang]));
        let monitor = LivenessMonitor::new(log, hub, options(1_000), CancellationToken::new());
        assert_eq!(monitor.probe().await, ProbeSignal::Timeout);
    }

    #[tokio::test]
    async fn tick_reports_memory_log_availability() {
        let hub = Arc::new(FanoutHub::new(4));
        let (handle, mut rx) = hub.handle();
        hub.register(handle);
        let log = Arc::new(MemoryLog::new("t"));
        let mut monitor =
            LivenessMonitor::new(log.clone(), hub, options(1_000), CancellationToken::new());

        assert_eq!(monitor.tick().await, HealthStatus::Healthy);
        log.set_available(false);
        assert_eq!(monitor.tick().await, HealthStatus::Unreachable);

        assert!(rx.try_recv().unwrap().contains("healthy"));
        assert!(rx.try_recv().unwrap().contains("unreachable"));
    }

    #[test]
    fn only_success_is_healthy() {
        assert_eq!(ProbeSignal::Success.status(), HealthStatus::Healthy);
        for signal in [ProbeSignal::Timeout, ProbeSignal::Error, ProbeSignal::Panic] {
            assert_eq!(signal.status(), HealthStatus::Unreachable);
        }
    }
}
