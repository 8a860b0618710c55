//! Directly attached stations on a serial line.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{DataBits, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::debug;

use super::config::{Parity, SerialSettings};
use super::{Inbound, Transport, TransportError};

const READ_BUFFER: usize = 512;

pub struct SerialTransport {
    settings: SerialSettings,
    port: Option<SerialStream>,
}

impl SerialTransport {
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            port: None,
        }
    }
}

fn data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

fn stop_bits(bits: u8) -> StopBits {
    if bits == 2 { StopBits::Two } else { StopBits::One }
}

fn parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Odd => tokio_serial::Parity::Odd,
        Parity::Even => tokio_serial::Parity::Even,
    }
}

fn open_error(address: &str, err: tokio_serial::Error) -> TransportError {
    match err.kind {
        tokio_serial::ErrorKind::NoDevice => TransportError::NoPortAvailable {
            address: address.to_string(),
        },
        tokio_serial::ErrorKind::Io(kind) => {
            TransportError::from_open(address, io::Error::new(kind, err.description))
        }
        _ => TransportError::Io(io::Error::other(err.description)),
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn describe(&self) -> String {
        format!("serial {}@{}", self.settings.port, self.settings.baud)
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        let s = &self.settings;
        let port = tokio_serial::new(s.port.as_str(), s.baud)
            .data_bits(data_bits(s.data_bits))
            .parity(parity(s.parity))
            .stop_bits(stop_bits(s.stop_bits))
            .open_native_async()
            .map_err(|e| open_error(&s.port, e))?;
        debug!(port = %s.port, baud = s.baud, "serial port open");
        self.port = Some(port);
        Ok(())
    }

    async fn read_stream(&mut self) -> Result<Inbound, TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;
        let mut buf = [0u8; READ_BUFFER];
        let n = port
            .read(&mut buf)
            .await
            .map_err(|e| TransportError::lost(e.to_string()))?;
        if n == 0 {
            self.port = None;
            return Err(TransportError::lost("port closed"));
        }
        Ok(Inbound::Bytes(buf[..n].to_vec()))
    }

    async fn write_command(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;
        port.write_all(bytes)
            .await
            .map_err(|e| TransportError::lost(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.port = None;
        Ok(())
    }
}
