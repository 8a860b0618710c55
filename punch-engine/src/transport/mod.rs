//! Transport adapters and per-station sessions.
//!
//! A [`Transport`] moves bytes (or, for the bus adapter, already decoded
//! punches) between the engine and one station channel. A
//! [`StationSession`] owns one transport and runs it on its own task: it
//! decodes frames, talks to the station, and forwards everything it learns
//! to the ingestion queue.

mod bus;
mod config;
mod error;
pub mod memory;
mod relay;
mod retry;
mod serial;
mod session;

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::PunchEvent;

pub use bus::{BusMessage, BusTransport};
pub use config::{
    OperatingMode, Parity, RelayProtocol, SerialSettings, StationConfig, TransportKind,
};
pub use error::TransportError;
pub use memory::{MemoryHandle, MemoryTransport};
pub use relay::RelayTransport;
pub use retry::{RetryPolicy, open_with_retry};
pub use serial::SerialTransport;
pub use session::{SessionCommand, SessionContext, StationHandle, StationSession};

/// Lifecycle signals common to every adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "reason", rename_all = "snake_case")]
pub enum ConnectionEvent {
    Opened,
    Lost(String),
    DataAvailable,
}

/// What one read from a transport produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Raw station bytes, to be run through the frame decoder.
    Bytes(Vec<u8>),
    /// Punches decoded upstream of the engine.
    Punches(Vec<PunchEvent>),
    /// A message the adapter could not interpret.
    Malformed(String),
}

/// Capability set shared by all station channels.
///
/// `read_stream` must be cancel-safe: sessions race it against shutdown
/// and operator commands.
#[async_trait]
pub trait Transport: Send {
    /// Human-readable address for logs.
    fn describe(&self) -> String;

    async fn open(&mut self) -> Result<(), TransportError>;

    async fn read_stream(&mut self) -> Result<Inbound, TransportError>;

    async fn write_command(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

#[async_trait]
impl Transport for Box<dyn Transport> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        (**self).open().await
    }

    async fn read_stream(&mut self) -> Result<Inbound, TransportError> {
        (**self).read_stream().await
    }

    async fn write_command(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).write_command(bytes).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        (**self).close().await
    }
}

/// Build the adapter a station configuration asks for.
pub fn build_transport(config: &StationConfig) -> Box<dyn Transport> {
    match &config.transport {
        TransportKind::Serial(settings) => Box::new(SerialTransport::new(settings.clone())),
        TransportKind::Relay { listen, protocol } => {
            Box::new(RelayTransport::new(*listen, *protocol))
        }
        TransportKind::Bus { address, topic } => {
            Box::new(BusTransport::new(address.clone(), topic.clone(), config.id))
        }
    }
}
