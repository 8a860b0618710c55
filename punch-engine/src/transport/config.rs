//! Per-station connection settings.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::domain::{PunchKind, StationId};
use crate::protocol::ProtocolMode;

/// Serial line parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Settings for a directly attached station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
}

fn default_baud() -> u32 {
    38400
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

impl SerialSettings {
    /// Settings for `port` at the station default of 38400 8N1.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud: default_baud(),
            data_bits: default_data_bits(),
            parity: Parity::None,
            stop_bits: default_stop_bits(),
        }
    }

    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }

    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }
}

/// Socket type a relay listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayProtocol {
    #[default]
    Tcp,
    Udp,
}

/// How the engine reaches a station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportKind {
    Serial(SerialSettings),
    /// Listen for frames forwarded by a radio bridge.
    Relay {
        listen: SocketAddr,
        #[serde(default)]
        protocol: RelayProtocol,
    },
    /// Subscribe to pre-decoded punch messages.
    Bus { address: String, topic: String },
}

/// What the session does with the station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    /// Station auto-sends each punch as it happens.
    #[default]
    DirectPunch,
    /// Cards are inserted into the station and read out.
    Readout,
    /// Download the station's backup memory after opening.
    BackupDownload,
}

/// Everything needed to run one station session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationConfig {
    pub id: StationId,

    #[serde(default)]
    pub name: String,

    pub transport: TransportKind,

    #[serde(default)]
    pub protocol: ProtocolMode,

    /// Verify frame checksums. Only disable when debugging a link.
    #[serde(default = "default_crc")]
    pub crc_enabled: bool,

    #[serde(default)]
    pub mode: OperatingMode,

    /// Role of punches from this station. When unset it is taken from
    /// the station's own configuration, falling back to control punches.
    #[serde(default)]
    pub punch_kind: Option<PunchKind>,
}

fn default_crc() -> bool {
    true
}

impl StationConfig {
    pub fn new(id: StationId, transport: TransportKind) -> Self {
        Self {
            id,
            name: String::new(),
            transport,
            protocol: ProtocolMode::default(),
            crc_enabled: true,
            mode: OperatingMode::default(),
            punch_kind: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_protocol(mut self, protocol: ProtocolMode) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_crc(mut self, enabled: bool) -> Self {
        self.crc_enabled = enabled;
        self
    }

    pub fn with_mode(mut self, mode: OperatingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_punch_kind(mut self, kind: PunchKind) -> Self {
        self.punch_kind = Some(kind);
        self
    }

    /// Label used in logs and status output.
    pub fn label(&self) -> String {
        if self.name.is_empty() {
            format!("station {}", self.id)
        } else {
            self.name.clone()
        }
    }
}
