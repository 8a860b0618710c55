//! Punch ingestion.
//!
//! Station sessions are the producers; the processing pipeline is the single
//! consumer. Everything crosses over one bounded channel of [`Ingest`]
//! items. Senders wait when it is full, so a slow pipeline stalls readers
//! instead of losing punches.
//!
//! On the consumer side [`IngestionQueue`] restores station-clock order
//! and drops duplicate punches.

mod dedup;
mod queue;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::domain::{CardId, PunchEvent, ReadoutError, StationId};
use crate::protocol::{FrameError, StationInfo};
use crate::transport::ConnectionEvent;

pub use dedup::DedupWindow;
pub use queue::{IngestionQueue, PushOutcome, QueueConfig};

/// How a backup download ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpOutcome {
    /// The end-of-dump marker was reached.
    Complete,
    /// The operator stopped the download.
    Cancelled,
    /// The connection or station stopped answering mid-transfer.
    Truncated,
}

/// Kinds of dropped frame, for counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameFault {
    Checksum,
    Malformed,
    TruncatedDump,
    /// A card read started but never completed.
    AbandonedRead,
}

impl From<&FrameError> for FrameFault {
    fn from(err: &FrameError) -> Self {
        match err {
            FrameError::Checksum { .. } => FrameFault::Checksum,
            FrameError::Malformed { .. } => FrameFault::Malformed,
            FrameError::TruncatedDump { .. } => FrameFault::TruncatedDump,
        }
    }
}

/// One item on the ingestion channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Ingest {
    Punch(PunchEvent),
    /// A card left a readout station. `card_id` is `None` when the
    /// protocol does not say which card.
    CardRemoved {
        station: StationId,
        card_id: Option<CardId>,
        flags: Vec<ReadoutError>,
    },
    DumpFinished {
        station: StationId,
        outcome: DumpOutcome,
        records: usize,
        /// Records in the dump that could not be decoded.
        skipped: usize,
    },
    Link {
        station: StationId,
        event: ConnectionEvent,
    },
    Fault {
        station: StationId,
        fault: FrameFault,
    },
    Identified {
        station: StationId,
        info: StationInfo,
    },
    /// The session has ended and will send nothing more.
    Closed { station: StationId },
}

impl Ingest {
    pub fn station(&self) -> StationId {
        match self {
            Ingest::Punch(p) => p.source_station,
            Ingest::CardRemoved { station, .. }
            | Ingest::DumpFinished { station, .. }
            | Ingest::Link { station, .. }
            | Ingest::Fault { station, .. }
            | Ingest::Identified { station, .. }
            | Ingest::Closed { station } => *station,
        }
    }
}

pub type IngestSender = mpsc::Sender<Ingest>;
pub type IngestReceiver = mpsc::Receiver<Ingest>;

/// Create the ingestion channel.
pub fn channel(capacity: usize) -> (IngestSender, IngestReceiver) {
    mpsc::channel(capacity.max(1))
}
