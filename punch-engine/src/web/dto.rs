//! Data transfer objects for web requests and responses.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{CardId, PunchTime, ReadoutError, RunId, StationId};
use crate::pipeline::{PendingReadout, PendingReason};
use crate::status::{EngineCounters, StationStatus};

/// All stations plus engine-wide counters.
#[derive(Debug, Serialize)]
pub struct StationsResponse {
    pub stations: Vec<StationStatus>,
    pub engine: EngineCounters,
    /// Frames dropped across all stations.
    pub dropped_frames: u64,
}

/// A pending readout as shown to the operator.
#[derive(Debug, Serialize)]
pub struct PendingView {
    pub id: u64,
    pub card: CardId,
    #[serde(flatten)]
    pub reason: PendingReason,
    pub since: DateTime<Utc>,
    pub punches: usize,
    pub start_time: Option<PunchTime>,
    pub finish_time: Option<PunchTime>,
    pub read_errors: BTreeSet<ReadoutError>,
}

impl From<PendingReadout> for PendingView {
    fn from(p: PendingReadout) -> Self {
        Self {
            id: p.id,
            card: p.readout.card_id,
            reason: p.reason,
            since: p.since,
            punches: p.readout.punches.len(),
            start_time: p.readout.start_time,
            finish_time: p.readout.finish_time,
            read_errors: p.readout.read_errors,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PendingResponse {
    pub pending: Vec<PendingView>,
}

/// Body of `POST /pending/:id/assign`.
#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub run_id: RunId,
}

/// Reply to a backup start/cancel request.
#[derive(Debug, Serialize)]
pub struct BackupResponse {
    pub station: StationId,
    pub requested: &'static str,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
