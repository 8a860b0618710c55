//! Application state for the web layer.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;

use crate::domain::StationId;
use crate::pipeline::PipelineHandle;
use crate::status::StatusBoard;
use crate::transport::StationHandle;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Latest status published by the pipeline
    pub status: watch::Receiver<StatusBoard>,

    /// Operator access to pending readouts
    pub pipeline: PipelineHandle,

    /// Command channels of the running sessions
    pub stations: Arc<HashMap<StationId, StationHandle>>,
}

impl AppState {
    pub fn new(
        status: watch::Receiver<StatusBoard>,
        pipeline: PipelineHandle,
        stations: impl IntoIterator<Item = StationHandle>,
    ) -> Self {
        Self {
            status,
            pipeline,
            stations: Arc::new(stations.into_iter().map(|h| (h.station(), h)).collect()),
        }
    }
}
