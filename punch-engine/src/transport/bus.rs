//! Message bus subscriber.
//!
//! Some installations decode punches elsewhere (e.g. a radio gateway with
//! its own station software) and publish them as newline-delimited JSON.
//! These bypass the frame codec entirely.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::domain::{
    CardId, ControlCode, InvalidCardId, PunchEvent, PunchKind, PunchOrigin, PunchTime, StationId,
};

use super::{Inbound, Transport, TransportError};

/// One punch as published on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusMessage {
    pub topic: String,
    pub card: u32,
    #[serde(default)]
    pub code: u16,
    pub time: PunchTime,
    #[serde(default = "default_kind")]
    pub kind: PunchKind,
    #[serde(default)]
    pub seq: Option<u32>,
}

fn default_kind() -> PunchKind {
    PunchKind::Control
}

impl BusMessage {
    pub fn into_event(self, station: StationId, fallback_seq: u32) -> Result<PunchEvent, InvalidCardId> {
        Ok(PunchEvent {
            card_id: CardId::new(self.card)?,
            control_code: ControlCode(self.code),
            timestamp: self.time,
            source_station: station,
            sequence_no: self.seq.unwrap_or(fallback_seq),
            kind: self.kind,
            origin: PunchOrigin::Live,
        })
    }
}

pub struct BusTransport {
    address: String,
    topic: String,
    station: StationId,
    lines: Option<Lines<BufReader<TcpStream>>>,
    received: u32,
}

impl BusTransport {
    pub fn new(address: String, topic: String, station: StationId) -> Self {
        Self {
            address,
            topic,
            station,
            lines: None,
            received: 0,
        }
    }
}

#[async_trait]
impl Transport for BusTransport {
    fn describe(&self) -> String {
        format!("bus {} [{}]", self.address, self.topic)
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| TransportError::from_open(&self.address, e))?;
        self.lines = Some(BufReader::new(stream).lines());
        debug!(bus = %self.describe(), "subscribed");
        Ok(())
    }

    async fn read_stream(&mut self) -> Result<Inbound, TransportError> {
        loop {
            let lines = self.lines.as_mut().ok_or(TransportError::NotOpen)?;
            let line = lines
                .next_line()
                .await
                .map_err(|e| TransportError::lost(e.to_string()))?;
            let Some(line) = line else {
                self.lines = None;
                return Err(TransportError::lost("bus closed"));
            };
            if line.trim().is_empty() {
                continue;
            }

            let message: BusMessage = match serde_json::from_str(&line) {
                Ok(m) => m,
                Err(e) => return Ok(Inbound::Malformed(e.to_string())),
            };
            if message.topic != self.topic {
                trace!(topic = %message.topic, "ignoring bus message for other topic");
                continue;
            }

            self.received = self.received.wrapping_add(1);
            return match message.into_event(self.station, self.received) {
                Ok(event) => Ok(Inbound::Punches(vec![event])),
                Err(e) => Ok(Inbound::Malformed(e.to_string())),
            };
        }
    }

    async fn write_command(&mut self, _bytes: &[u8]) -> Result<(), TransportError> {
        Err(TransportError::ReadOnly { transport: "bus" })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.lines = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn filters_by_topic_and_decodes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let publisher = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let lines = concat!(
                r#"{"topic": "radio", "card": 7203463, "code": 100, "time": "2026-05-09T10:30:00"}"#,
                "\n",
                r#"{"topic": "finish", "card": 7203463, "time": "2026-05-09T10:45:00", "kind": "finish", "seq": 12}"#,
                "\n",
                "not json\n",
            );
            stream.write_all(lines.as_bytes()).await.unwrap();
        });

        let mut bus = BusTransport::new(addr, "finish".into(), StationId(9));
        bus.open().await.unwrap();

        let Inbound::Punches(punches) = bus.read_stream().await.unwrap() else {
            panic!("expected punches");
        };
        assert_eq!(punches.len(), 1);
        assert_eq!(punches[0].kind, PunchKind::Finish);
        assert_eq!(punches[0].sequence_no, 12);
        assert_eq!(punches[0].source_station, StationId(9));

        assert!(matches!(bus.read_stream().await.unwrap(), Inbound::Malformed(_)));

        publisher.await.unwrap();
        assert!(matches!(
            bus.read_stream().await,
            Err(TransportError::Lost { .. })
        ));
    }

    #[tokio::test]
    async fn refuses_commands() {
        let mut bus = BusTransport::new("127.0.0.1:1".into(), "x".into(), StationId(1));
        assert!(matches!(
            bus.write_command(&[0x06]).await,
            Err(TransportError::ReadOnly { .. })
        ));
    }

    #[test]
    fn zero_card_rejected() {
        let msg: BusMessage =
            serde_json::from_str(r#"{"topic": "t", "card": 0, "time": "2026-05-09T10:00:00"}"#)
                .unwrap();
        assert!(msg.into_event(StationId(1), 0).is_err());
    }
}
