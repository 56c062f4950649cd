//! Analysis progress observation
//!
//! Pull: [`ProcessingMonitor::snapshot`] reads the store once.
//! Push: [`ProcessingMonitor::subscribe`] yields a fresh snapshot whenever
//! the quote changes on the EventBus, and on a fixed poll interval in case a
//! notification was lost.
//!
//! Terminal success is the pipeline-reported quote-level `ready` status.
//! File progress reaching 100% is advisory only.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tqe_common::events::{EventBus, Notification, QuoteEvent};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db;
use crate::error::{QuoteError, QuoteResult};
use crate::models::{FileProcessingStatus, ProcessingStatus, QuoteFile, QuoteStatus};

/// Aggregate progress in percent, rounded half up
///
/// Zero files is 0%.
pub fn progress(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let completed = completed.min(total);
    ((200 * completed + total) / (2 * total)) as u8
}

/// Point-in-time view of a quote's analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingSnapshot {
    pub quote_id: Uuid,
    pub status: QuoteStatus,
    pub processing_status: ProcessingStatus,
    pub progress: u8,
    pub files_total: usize,
    pub files_complete: usize,
    pub files_failed: usize,
    /// Pipeline reached `ready` or `failed`
    pub terminal: bool,
}

impl ProcessingSnapshot {
    fn from_parts(
        quote_id: Uuid,
        status: QuoteStatus,
        processing_status: ProcessingStatus,
        files: &[QuoteFile],
    ) -> Self {
        let files_complete = files
            .iter()
            .filter(|f| f.processing_status == FileProcessingStatus::Complete)
            .count();
        let files_failed = files
            .iter()
            .filter(|f| f.processing_status == FileProcessingStatus::Failed)
            .count();

        Self {
            quote_id,
            status,
            processing_status,
            progress: progress(files_complete, files.len()),
            files_total: files.len(),
            files_complete,
            files_failed,
            terminal: processing_status.is_terminal(),
        }
    }
}

/// Reads progress from the store and fans out change notifications
#[derive(Clone)]
pub struct ProcessingMonitor {
    pool: SqlitePool,
    event_bus: EventBus,
    poll_interval: Duration,
}

impl ProcessingMonitor {
    pub fn new(pool: SqlitePool, event_bus: EventBus, poll_interval: Duration) -> Self {
        Self {
            pool,
            event_bus,
            poll_interval: poll_interval.max(Duration::from_millis(10)),
        }
    }

    pub async fn snapshot(&self, quote_id: Uuid) -> QuoteResult<ProcessingSnapshot> {
        let quote = db::quotes::load_quote(&self.pool, quote_id)
            .await?
            .ok_or(QuoteError::NotFound(quote_id))?;
        let files = db::files::list_files(&self.pool, quote_id).await?;

        Ok(ProcessingSnapshot::from_parts(
            quote_id,
            quote.status,
            quote.processing_status,
            &files,
        ))
    }

    /// Start a push subscription for one quote
    ///
    /// The first item is the current snapshot. The background task stops
    /// when the subscription is closed or dropped.
    pub fn subscribe(&self, quote_id: Uuid) -> ProcessingSubscription {
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let monitor = self.clone();
        let task_cancel = cancel.clone();
        // Subscribe before the first read so no change slips between them
        let events = self.event_bus.subscribe_quote(quote_id);

        let handle = tokio::spawn(async move {
            monitor.run_subscription(quote_id, events, tx, task_cancel).await;
        });

        ProcessingSubscription {
            rx,
            cancel,
            handle: Some(handle),
        }
    }

    async fn run_subscription(
        &self,
        quote_id: Uuid,
        mut events: tqe_common::events::QuoteEventReceiver,
        tx: mpsc::Sender<ProcessingSnapshot>,
        cancel: CancellationToken,
    ) {
        let mut last_sent: Option<ProcessingSnapshot> = None;
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // The first tick completes immediately and produces the initial snapshot
        loop {
            let forced = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => last_sent.is_none(),
                notification = events.recv() => match notification {
                    Some(Notification::Changed(_)) | Some(Notification::Missed(_)) => true,
                    None => break,
                },
            };

            let snapshot = match self.snapshot(quote_id).await {
                Ok(snapshot) => snapshot,
                Err(QuoteError::NotFound(_)) => {
                    debug!(quote_id = %quote_id, "Quote vanished, ending subscription");
                    break;
                }
                Err(e) => {
                    warn!(quote_id = %quote_id, error = %e, "Progress snapshot failed");
                    continue;
                }
            };

            // Poll ticks only report actual changes
            if !forced && last_sent.as_ref() == Some(&snapshot) {
                continue;
            }

            if tx.send(snapshot.clone()).await.is_err() {
                break;
            }
            last_sent = Some(snapshot);
        }

        debug!(quote_id = %quote_id, "Processing subscription closed");
    }
}

/// Live progress feed for one quote
pub struct ProcessingSubscription {
    rx: mpsc::Receiver<ProcessingSnapshot>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ProcessingSubscription {
    /// Next snapshot; `None` once the subscription has ended
    pub async fn next(&mut self) -> Option<ProcessingSnapshot> {
        self.rx.recv().await
    }

    /// Stop the background task and wait for it to finish
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ProcessingSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Receiver of the "pipeline reported ready" signal
#[async_trait]
pub trait PipelineReadyHandler: Send + Sync {
    async fn on_pipeline_ready(&self, quote_id: Uuid);
}

/// Feeds pipeline-ready signals to a handler from two sources
///
/// Push: `PipelineStatusChanged { ready }` events on the bus.
/// Pull: a periodic scan for `awaiting_analysis` quotes whose persisted
/// pipeline status is already `ready`. The handler must be idempotent.
pub struct PipelineWatcher {
    pool: SqlitePool,
    event_bus: EventBus,
    handler: Arc<dyn PipelineReadyHandler>,
    poll_interval: Duration,
}

impl PipelineWatcher {
    pub fn new(
        pool: SqlitePool,
        event_bus: EventBus,
        handler: Arc<dyn PipelineReadyHandler>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            pool,
            event_bus,
            handler,
            poll_interval: poll_interval.max(Duration::from_millis(10)),
        }
    }

    /// Run until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        let mut rx = self.event_bus.subscribe();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Pipeline watcher started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.sweep().await,
                received = rx.recv() => match received {
                    Ok(QuoteEvent::PipelineStatusChanged { quote_id, processing_status, .. })
                        if processing_status == ProcessingStatus::Ready.as_str() =>
                    {
                        self.dispatch(quote_id);
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "Pipeline watcher lagged, sweeping store");
                        self.sweep().await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        info!("Pipeline watcher stopped");
    }

    async fn sweep(&self) {
        match db::quotes::list_ready_for_decision(&self.pool).await {
            Ok(ids) => {
                for quote_id in ids {
                    debug!(quote_id = %quote_id, "Pipeline ready found by poll");
                    self.dispatch(quote_id);
                }
            }
            Err(e) => warn!(error = %e, "Pipeline ready sweep failed"),
        }
    }

    /// Handle off the watcher loop so a slow threshold check never stalls it
    fn dispatch(&self, quote_id: Uuid) {
        let handler = self.handler.clone();
        tokio::spawn(async move {
            handler.on_pipeline_ready(quote_id).await;
        });
    }
}
