//! In-process transport.
//!
//! Stands in for a physical station: whatever is sent through the
//! [`MemoryHandle`] is read by the session, and every command the session
//! writes comes out of the handle.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Inbound, Transport, TransportError};

/// Test side of a [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryHandle {
    pub inbound: mpsc::Sender<Inbound>,
    pub outbound: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MemoryHandle {
    /// Deliver raw station bytes.
    pub async fn send_bytes(&self, bytes: impl Into<Vec<u8>>) {
        let _ = self.inbound.send(Inbound::Bytes(bytes.into())).await;
    }

    /// Next command written by the session, if any is already queued.
    pub fn try_written(&mut self) -> Option<Vec<u8>> {
        self.outbound.try_recv().ok()
    }
}

/// A transport backed by channels.
#[derive(Debug)]
pub struct MemoryTransport {
    inbound: mpsc::Receiver<Inbound>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    failures: VecDeque<TransportError>,
    open_calls: u32,
    is_open: bool,
}

impl MemoryTransport {
    /// Create a connected transport/handle pair.
    pub fn pair(capacity: usize) -> (Self, MemoryHandle) {
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let transport = Self {
            inbound: in_rx,
            outbound: out_tx,
            failures: VecDeque::new(),
            open_calls: 0,
            is_open: false,
        };
        let handle = MemoryHandle {
            inbound: in_tx,
            outbound: out_rx,
        };
        (transport, handle)
    }

    /// Make the next `n` calls to `open` fail.
    pub fn fail_next_opens(&mut self, n: usize, error: impl Fn() -> TransportError) {
        self.failures.extend((0..n).map(|_| error()));
    }

    /// How many times `open` was called.
    pub fn open_calls(&self) -> u32 {
        self.open_calls
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        self.open_calls += 1;
        if let Some(err) = self.failures.pop_front() {
            return Err(err);
        }
        if self.inbound.is_closed() && self.inbound.is_empty() {
            return Err(TransportError::NoPortAvailable {
                address: self.describe(),
            });
        }
        self.is_open = true;
        Ok(())
    }

    async fn read_stream(&mut self) -> Result<Inbound, TransportError> {
        if !self.is_open {
            return Err(TransportError::NotOpen);
        }
        match self.inbound.recv().await {
            Some(inbound) => Ok(inbound),
            None => {
                self.is_open = false;
                Err(TransportError::lost("peer closed"))
            }
        }
    }

    async fn write_command(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::NotOpen);
        }
        self.outbound
            .send(bytes.to_vec())
            .map_err(|_| TransportError::lost("peer closed"))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.is_open = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bytes_flow_both_ways() {
        let (mut transport, mut handle) = MemoryTransport::pair(4);
        transport.open().await.unwrap();

        handle.send_bytes(vec![1, 2, 3]).await;
        assert_eq!(
            transport.read_stream().await.unwrap(),
            Inbound::Bytes(vec![1, 2, 3])
        );

        transport.write_command(&[9]).await.unwrap();
        assert_eq!(handle.try_written(), Some(vec![9]));
    }

    #[tokio::test]
    async fn dropped_handle_is_lost_then_unavailable() {
        let (mut transport, handle) = MemoryTransport::pair(4);
        transport.open().await.unwrap();
        drop(handle);

        assert!(matches!(
            transport.read_stream().await,
            Err(TransportError::Lost { .. })
        ));
        assert!(matches!(
            transport.open().await,
            Err(TransportError::NoPortAvailable { .. })
        ));
    }

    #[tokio::test]
    async fn read_before_open_fails() {
        let (mut transport, _handle) = MemoryTransport::pair(1);
        assert!(matches!(
            transport.read_stream().await,
            Err(TransportError::NotOpen)
        ));
    }
}
