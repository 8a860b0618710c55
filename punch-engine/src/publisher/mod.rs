//! Result Publisher.
//!
//! Keeps the latest result per run and forwards new or changed results to
//! the configured sinks. Delivery happens on a separate task, so a slow
//! collaborator never holds up the processing pipeline.

mod error;
mod live;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{RunId, RunResult};

pub use error::SinkError;
pub use live::{LiveResult, LiveResultsConfig, LiveResultsSink};

/// A collaborator that receives published results.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    async fn deliver(&self, result: &RunResult) -> Result<(), SinkError>;
}

/// Sink forwarding results into a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<RunResult>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RunResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ResultSink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    async fn deliver(&self, result: &RunResult) -> Result<(), SinkError> {
        self.tx.send(result.clone()).map_err(|_| SinkError::Closed)
    }
}

/// Sink writing each result to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl ResultSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, result: &RunResult) -> Result<(), SinkError> {
        info!(
            run = %result.run_id,
            card = %result.card_id,
            status = ?result.status,
            total_ms = result.total_time.map(|t| t.num_milliseconds()),
            extra = result.extra_punches.len(),
            "result"
        );
        Ok(())
    }
}

/// What publishing a result did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishOutcome {
    /// First result for the run.
    Stored,
    /// Replaced a result from an older readout.
    Replaced,
    /// Same outcome as the stored result; nothing sent on.
    Unchanged,
    /// Derived from a readout no newer than the stored one; dropped.
    Stale,
}

/// Latest result per run.
pub struct ResultPublisher {
    results: HashMap<RunId, RunResult>,
    outbox: mpsc::UnboundedSender<RunResult>,
    failed: Arc<AtomicU64>,
    stale: u64,
}

impl ResultPublisher {
    /// Create a publisher and spawn its delivery task.
    pub fn spawn(sinks: Vec<Arc<dyn ResultSink>>) -> (Self, JoinHandle<()>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        let failed = Arc::new(AtomicU64::new(0));
        let task = tokio::spawn(deliver(rx, sinks, failed.clone()));
        let publisher = Self {
            results: HashMap::new(),
            outbox,
            failed,
            stale: 0,
        };
        (publisher, task)
    }

    /// Publish a result.
    ///
    /// A stored result is only replaced by one derived from a strictly
    /// newer readout.
    pub fn publish(&mut self, result: RunResult) -> PublishOutcome {
        let outcome = match self.results.get(&result.run_id) {
            None => PublishOutcome::Stored,
            Some(stored) if *stored == result => PublishOutcome::Unchanged,
            Some(stored) if result.readout_at <= stored.readout_at => PublishOutcome::Stale,
            Some(stored) if stored.same_outcome(&result) => PublishOutcome::Unchanged,
            Some(_) => PublishOutcome::Replaced,
        };

        match outcome {
            PublishOutcome::Stale => {
                self.stale += 1;
                warn!(run = %result.run_id, card = %result.card_id, "dropping stale result");
            }
            PublishOutcome::Unchanged => {
                debug!(run = %result.run_id, "result unchanged");
                self.results.insert(result.run_id, result);
            }
            PublishOutcome::Stored | PublishOutcome::Replaced => {
                info!(
                    run = %result.run_id,
                    card = %result.card_id,
                    status = ?result.status,
                    outcome = ?outcome,
                    "published result"
                );
                if self.outbox.send(result.clone()).is_err() {
                    warn!(run = %result.run_id, "result delivery task has stopped");
                }
                self.results.insert(result.run_id, result);
            }
        }
        outcome
    }

    pub fn get(&self, run: RunId) -> Option<&RunResult> {
        self.results.get(&run)
    }

    /// Number of runs with a result.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Publishes dropped as stale.
    pub fn stale_count(&self) -> u64 {
        self.stale
    }

    /// Sink deliveries that failed.
    pub fn failed_deliveries(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

async fn deliver(
    mut rx: mpsc::UnboundedReceiver<RunResult>,
    sinks: Vec<Arc<dyn ResultSink>>,
    failed: Arc<AtomicU64>,
) {
    while let Some(result) = rx.recv().await {
        for sink in &sinks {
            if let Err(e) = sink.deliver(&result).await {
                failed.fetch_add(1, Ordering::Relaxed);
                warn!(sink = sink.name(), run = %result.run_id, error = %e, "result delivery failed");
            }
        }
    }
    debug!("result delivery finished");
}
