//! Station wire protocol.
//!
//! This module covers everything between raw bytes and [`PunchEvent`]s:
//!
//! - [`frame`]: start/end markers, DLE stuffing, CRC and resynchronisation
//! - [`command`]: command bytes, outbound requests, inbound messages
//! - [`record`], [`backup`], [`card`]: the fixed-width record layouts
//! - [`system`]: station identity read from system memory
//!
//! [`PunchEvent`]: crate::domain::PunchEvent

pub mod backup;
pub mod card;
pub mod command;
mod crc;
mod error;
pub mod frame;
pub mod record;
pub mod system;

pub use backup::{BackupDump, BackupLayout};
pub use card::{CardContents, CardFamily, CardImage};
pub use command::{Command, InsertedCard, StationMessage, cmd};
pub use crc::crc16;
pub use error::FrameError;
pub use frame::{FrameDecoder, IntegrityCheck, ProtocolMode, RawFrame, decode};
pub use record::{PunchRecord, StationTime};
pub use system::{ProtocolFlags, StationInfo, StationMode};
