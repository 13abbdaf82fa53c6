//! # Usage Ledger
//!
//! Fire-and-forget recording of every external call attempt.
//!
//! ```text
//! gateway / caller                       UsageLedger
//!       |                                     |
//!       | log(params)  (try_send)             | spawn run()
//!       v                                     v
//! mpsc::Sender<LedgerCommand>      →   mpsc::Receiver
//!                                             |
//!                                             v
//!                                     UsageSink::write()
//! ```
//!
//! `log()` never blocks and never fails the caller: a full channel drops the
//! entry with a warning, a failed sink write is counted and logged. Shutdown
//! drains whatever is still queued, bounded by a timeout.

use super::entry::{UsageContext, UsageLogEntry, UsageLogParams};
use super::sinks::UsageSink;
use crate::config::UsageLedgerConfig;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct AtomicStats {
    dispatched: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageLedgerStats {
    /// Accepted onto the channel
    pub dispatched: u64,
    pub written: u64,
    /// Sink write errors
    pub failed: u64,
    /// Rejected because the channel was full or closed
    pub dropped: u64,
    pub channel_depth: usize,
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerShutdownResult {
    pub success: bool,
    pub entries_drained: u64,
    pub duration_ms: u64,
}

impl LedgerShutdownResult {
    fn failed() -> Self {
        Self {
            success: false,
            entries_drained: 0,
            duration_ms: 0,
        }
    }
}

#[derive(Debug)]
enum LedgerCommand {
    Record(Box<UsageLogEntry>),
    Shutdown {
        resp: oneshot::Sender<LedgerShutdownResult>,
    },
}

/// Cloneable handle for recording usage.
///
/// A disabled handle accepts and discards everything.
#[derive(Clone)]
pub struct UsageLedgerHandle {
    sender: Option<mpsc::Sender<LedgerCommand>>,
    stats: Arc<AtomicStats>,
    base_context: UsageContext,
    is_running: Arc<AtomicBool>,
}

impl std::fmt::Debug for UsageLedgerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageLedgerHandle")
            .field("enabled", &self.sender.is_some())
            .field(
                "channel_capacity",
                &self.sender.as_ref().map(|s| s.capacity()),
            )
            .field("is_running", &self.is_running.load(Ordering::SeqCst))
            .finish()
    }
}

impl UsageLedgerHandle {
    pub fn disabled() -> Self {
        Self {
            sender: None,
            stats: Arc::new(AtomicStats::default()),
            base_context: UsageContext::default(),
            is_running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// Handle that attributes every entry to `context` (merged over the current one)
    pub fn with_context(&self, context: &UsageContext) -> Self {
        Self {
            base_context: self.base_context.merged_with(context),
            ..self.clone()
        }
    }

    pub fn context(&self) -> &UsageContext {
        &self.base_context
    }

    /// Record one call attempt without waiting.
    ///
    /// Returns `true` if the entry was queued, `false` if it was dropped.
    pub fn log(&self, params: UsageLogParams) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };

        let entry = UsageLogEntry::from_params(params, &self.base_context, Utc::now());
        let request_id = entry.request_id;
        let source_name = entry.source_name.clone();

        match sender.try_send(LedgerCommand::Record(Box::new(entry))) {
            Ok(()) => {
                self.stats.dispatched.fetch_add(1, Ordering::SeqCst);
                debug!(request_id = %request_id, source_name = %source_name, "Usage entry queued");
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::SeqCst);
                warn!(
                    request_id = %request_id,
                    source_name = %source_name,
                    "Usage entry dropped due to channel backpressure"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::SeqCst);
                warn!(
                    request_id = %request_id,
                    source_name = %source_name,
                    "Usage ledger closed, entry dropped"
                );
                false
            }
        }
    }

    pub fn stats(&self) -> UsageLedgerStats {
        let (channel_depth, channel_capacity) = match &self.sender {
            Some(sender) => (
                sender.max_capacity() - sender.capacity(),
                sender.max_capacity(),
            ),
            None => (0, 0),
        };
        UsageLedgerStats {
            dispatched: self.stats.dispatched.load(Ordering::SeqCst),
            written: self.stats.written.load(Ordering::SeqCst),
            failed: self.stats.failed.load(Ordering::SeqCst),
            dropped: self.stats.dropped.load(Ordering::SeqCst),
            channel_depth,
            channel_capacity,
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Stop the worker after draining queued entries
    pub async fn shutdown(&self) -> LedgerShutdownResult {
        let Some(sender) = &self.sender else {
            return LedgerShutdownResult {
                success: true,
                entries_drained: 0,
                duration_ms: 0,
            };
        };

        let (tx, rx) = oneshot::channel();
        if sender
            .send(LedgerCommand::Shutdown { resp: tx })
            .await
            .is_err()
        {
            return LedgerShutdownResult::failed();
        }

        rx.await.unwrap_or_else(|_| LedgerShutdownResult::failed())
    }
}

/// Background worker writing queued entries to a [`UsageSink`]
pub struct UsageLedger {
    receiver: mpsc::Receiver<LedgerCommand>,
    sink: Arc<dyn UsageSink>,
    stats: Arc<AtomicStats>,
    shutdown_timeout: Duration,
    is_running: Arc<AtomicBool>,
}

impl std::fmt::Debug for UsageLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageLedger")
            .field("sink", &self.sink.name())
            .field("is_running", &self.is_running.load(Ordering::SeqCst))
            .finish()
    }
}

impl UsageLedger {
    /// Create the worker and its handle. The worker must be spawned.
    pub fn new(
        sink: Arc<dyn UsageSink>,
        channel_capacity: usize,
        shutdown_timeout: Duration,
    ) -> (Self, UsageLedgerHandle) {
        let (sender, receiver) = mpsc::channel(channel_capacity.max(1));
        let stats = Arc::new(AtomicStats::default());
        let is_running = Arc::new(AtomicBool::new(false));

        let handle = UsageLedgerHandle {
            sender: Some(sender),
            stats: Arc::clone(&stats),
            base_context: UsageContext::default(),
            is_running: Arc::clone(&is_running),
        };

        let ledger = Self {
            receiver,
            sink,
            stats,
            shutdown_timeout,
            is_running,
        };

        (ledger, handle)
    }

    /// Build from configuration and spawn the worker on the current runtime
    pub fn spawn(
        config: &UsageLedgerConfig,
        sink: Arc<dyn UsageSink>,
    ) -> (UsageLedgerHandle, Option<JoinHandle<()>>) {
        if !config.enabled {
            info!("Usage ledger disabled by configuration");
            return (UsageLedgerHandle::disabled(), None);
        }

        let (ledger, handle) = Self::new(
            sink,
            config.channel_capacity,
            Duration::from_millis(config.shutdown_timeout_ms),
        );
        // Marked before the task is polled so callers see a live ledger immediately
        handle.is_running.store(true, Ordering::SeqCst);
        let join = tokio::spawn(ledger.run());
        (handle, Some(join))
    }

    pub async fn run(mut self) {
        info!(sink = self.sink.name(), "Starting usage ledger loop");
        self.is_running.store(true, Ordering::SeqCst);

        while let Some(command) = self.receiver.recv().await {
            match command {
                LedgerCommand::Record(entry) => self.write(&entry).await,
                LedgerCommand::Shutdown { resp } => {
                    let result = self.drain().await;
                    let _ = resp.send(result);
                    break;
                }
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
        info!("Usage ledger loop stopped");
    }

    async fn write(&self, entry: &UsageLogEntry) {
        match self.sink.write(entry).await {
            Ok(()) => {
                self.stats.written.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::SeqCst);
                warn!(
                    request_id = %entry.request_id,
                    source_name = %entry.source_name,
                    sink = self.sink.name(),
                    error = %e,
                    "Usage ledger write failed"
                );
            }
        }
    }

    async fn drain(&mut self) -> LedgerShutdownResult {
        let start = Instant::now();
        info!(
            timeout_ms = self.shutdown_timeout.as_millis() as u64,
            "Draining usage ledger"
        );

        self.receiver.close();
        let mut entries_drained = 0u64;
        let mut timed_out = false;

        while let Ok(command) = self.receiver.try_recv() {
            if start.elapsed() >= self.shutdown_timeout {
                timed_out = true;
                break;
            }
            match command {
                LedgerCommand::Record(entry) => {
                    let remaining = self.shutdown_timeout.saturating_sub(start.elapsed());
                    if tokio::time::timeout(remaining, self.write(&entry))
                        .await
                        .is_err()
                    {
                        timed_out = true;
                        break;
                    }
                    entries_drained += 1;
                }
                LedgerCommand::Shutdown { resp } => {
                    let _ = resp.send(LedgerShutdownResult::failed());
                }
            }
        }

        if timed_out {
            error!(
                entries_drained = entries_drained,
                "Usage ledger shutdown timed out with entries still queued"
            );
        }

        LedgerShutdownResult {
            success: !timed_out,
            entries_drained,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::sinks::MemoryUsageSink;

    async fn wait_for_written(handle: &UsageLedgerHandle, expected: u64) {
        for _ in 0..100 {
            if handle.stats().written + handle.stats().failed >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_entries_reach_the_sink() {
        let sink = MemoryUsageSink::new();
        let (ledger, handle) = UsageLedger::new(Arc::new(sink.clone()), 16, Duration::from_secs(1));
        tokio::spawn(ledger.run());

        assert!(handle.log(UsageLogParams::new("google_places")));
        wait_for_written(&handle, 1).await;

        assert_eq!(sink.len(), 1);
        assert_eq!(handle.stats().written, 1);
    }

    #[tokio::test]
    async fn test_sink_failure_is_swallowed() {
        let sink = MemoryUsageSink::new();
        sink.fail_writes(true);
        let (ledger, handle) = UsageLedger::new(Arc::new(sink.clone()), 16, Duration::from_secs(1));
        tokio::spawn(ledger.run());

        assert!(handle.log(UsageLogParams::new("hunter")));
        wait_for_written(&handle, 1).await;

        let stats = handle.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.written, 0);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_full_channel_drops_without_blocking() {
        let sink = MemoryUsageSink::new();
        // Worker never spawned, so nothing drains the channel
        let (_ledger, handle) = UsageLedger::new(Arc::new(sink), 2, Duration::from_secs(1));

        assert!(handle.log(UsageLogParams::new("a")));
        assert!(handle.log(UsageLogParams::new("b")));
        assert!(!handle.log(UsageLogParams::new("c")));

        let stats = handle.stats();
        assert_eq!(stats.dispatched, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.channel_depth, 2);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let sink = MemoryUsageSink::new();
        let (ledger, handle) = UsageLedger::new(Arc::new(sink.clone()), 64, Duration::from_secs(2));
        for i in 0..10 {
            handle.log(UsageLogParams::new(format!("source-{i}")));
        }
        let join = tokio::spawn(ledger.run());

        let result = handle.shutdown().await;
        assert!(result.success);
        join.await.unwrap();

        assert_eq!(sink.len(), 10);
        assert!(!handle.is_running());
        assert!(!handle.log(UsageLogParams::new("late")));
    }

    #[tokio::test]
    async fn test_context_is_merged_into_entries() {
        let sink = MemoryUsageSink::new();
        let (ledger, handle) = UsageLedger::new(Arc::new(sink.clone()), 16, Duration::from_secs(1));
        tokio::spawn(ledger.run());

        let scoped = handle.with_context(&UsageContext {
            job_id: Some("job-42".to_string()),
            ..UsageContext::default()
        });
        scoped.log(UsageLogParams::new("google_places"));
        wait_for_written(&handle, 1).await;

        assert_eq!(sink.entries()[0].session_id.as_deref(), Some("job-42"));
    }

    #[tokio::test]
    async fn test_disabled_handle_discards() {
        let handle = UsageLedgerHandle::disabled();
        assert!(!handle.is_enabled());
        assert!(!handle.log(UsageLogParams::new("google_places")));
        assert!(handle.shutdown().await.success);
    }
}
