//! Station and engine status for display.
//!
//! The pipeline owns the [`StatusBoard`] and publishes a copy through a
//! `watch` channel after every change; readers never touch pipeline state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::StationId;
use crate::ingest::{DumpOutcome, FrameFault};
use crate::protocol::StationInfo;

/// Dropped frames and lost station data by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameCounters {
    pub checksum: u64,
    pub malformed: u64,
    pub truncated_dump: u64,
    pub abandoned_reads: u64,
    /// Undecodable records in backup dumps.
    pub skipped_records: u64,
}

impl FrameCounters {
    pub fn record(&mut self, fault: FrameFault) {
        match fault {
            FrameFault::Checksum => self.checksum += 1,
            FrameFault::Malformed => self.malformed += 1,
            FrameFault::TruncatedDump => self.truncated_dump += 1,
            FrameFault::AbandonedRead => self.abandoned_reads += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.checksum
            + self.malformed
            + self.truncated_dump
            + self.abandoned_reads
            + self.skipped_records
    }
}

/// Connection state as last reported by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Connecting,
    Connected,
    Lost,
    Closed,
}

/// Last backup download from a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DumpSummary {
    pub outcome: DumpOutcome,
    pub records: usize,
    pub skipped: usize,
    pub at: DateTime<Utc>,
}

/// Status of one station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StationStatus {
    pub station: StationId,
    pub name: String,
    pub link: LinkState,
    pub last_error: Option<String>,
    pub last_frame_at: Option<DateTime<Utc>>,
    pub info: Option<StationInfo>,
    pub punches: u64,
    pub faults: FrameCounters,
    pub link_losses: u64,
    pub last_dump: Option<DumpSummary>,
}

impl StationStatus {
    pub fn new(station: StationId, name: impl Into<String>) -> Self {
        Self {
            station,
            name: name.into(),
            link: LinkState::Connecting,
            last_error: None,
            last_frame_at: None,
            info: None,
            punches: 0,
            faults: FrameCounters::default(),
            link_losses: 0,
            last_dump: None,
        }
    }

    pub fn connected(&self) -> bool {
        self.link == LinkState::Connected
    }
}

/// Counters for everything downstream of the stations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineCounters {
    /// Punches dropped as bounces or as already in their readout.
    pub duplicates: u64,
    pub readouts: u64,
    /// Readouts dropped because they held no punch.
    pub empty_readouts: u64,
    /// Re-reads that added nothing to the card's previous readout.
    pub redundant_readouts: u64,
    pub results_published: u64,
    pub results_unchanged: u64,
    pub stale_publishes: u64,
    pub failed_deliveries: u64,
    pub unknown_cards: u64,
    pub ambiguous_cards: u64,
    pub not_yet_started: u64,
    pub conflicting_rereads: u64,
    pub awaiting_close: u64,
    pub directory_errors: u64,
    /// Readouts currently waiting for an operator.
    pub pending: usize,
}

/// Everything the status endpoints show.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusBoard {
    pub stations: BTreeMap<StationId, StationStatus>,
    pub engine: EngineCounters,
}

impl StatusBoard {
    /// Add a configured station.
    pub fn register(&mut self, station: StationId, name: impl Into<String>) {
        self.stations
            .insert(station, StationStatus::new(station, name));
    }

    pub fn station(&self, station: StationId) -> Option<&StationStatus> {
        self.stations.get(&station)
    }

    /// Status for `station`, created on first sight.
    pub fn station_mut(&mut self, station: StationId) -> &mut StationStatus {
        self.stations
            .entry(station)
            .or_insert_with(|| StationStatus::new(station, String::new()))
    }

    /// Frames dropped across all stations.
    pub fn dropped_frames(&self) -> u64 {
        self.stations.values().map(|s| s.faults.total()).sum()
    }
}
