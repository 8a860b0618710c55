//! One task per station.
//!
//! A [`StationSession`] owns its transport and frame decoder. It opens the
//! link (with bounded retry), identifies the station, then loops over
//! inbound data, operator commands, reply timeouts and shutdown until it is
//! told to stop or the link cannot be re-established. Everything it learns
//! goes to the ingestion queue; nothing else is shared.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, trace, warn};

use crate::domain::{CardId, ControlCode, PunchKind, PunchTime, ReadoutError, StationId};
use crate::ingest::{DumpOutcome, FrameFault, Ingest, IngestSender};
use crate::protocol::backup::{BACKUP_CHUNK, BACKUP_END, BACKUP_START};
use crate::protocol::system::{SYS_VAL_ADDRESS, SYS_VAL_LEN};
use crate::protocol::{
    BackupDump, BackupLayout, CardFamily, CardImage, Command, FrameDecoder, FrameError,
    InsertedCard, ProtocolMode, PunchRecord, RawFrame, StationInfo, StationMessage,
};

use super::{
    ConnectionEvent, Inbound, OperatingMode, RetryPolicy, StationConfig, Transport,
    TransportError, TransportKind, open_with_retry,
};

/// Settings shared by every session of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionContext {
    /// Anchors station times that carry no date.
    pub zero_time: PunchTime,
    pub retry: RetryPolicy,
    /// How long to wait for the station to answer a request.
    pub reply_timeout: Duration,
}

impl SessionContext {
    pub fn new(zero_time: PunchTime) -> Self {
        Self {
            zero_time,
            retry: RetryPolicy::default(),
            reply_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }
}

/// Operator requests delivered to a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    DownloadBackup,
    CancelBackup,
    Close,
}

/// Sends [`SessionCommand`]s to one session.
#[derive(Debug, Clone)]
pub struct StationHandle {
    station: StationId,
    commands: mpsc::Sender<SessionCommand>,
}

impl StationHandle {
    pub fn station(&self) -> StationId {
        self.station
    }

    /// Returns `false` if the session has already ended.
    pub async fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }
}

/// Request/response exchange in flight with the station.
#[derive(Debug)]
enum Exchange {
    Idle,
    Identify,
    /// `image` is `None` until block 0 of an SI8-family card tells us
    /// which layout it has.
    ReadingCard {
        card_id: Option<CardId>,
        image: Option<CardImage>,
    },
    Backup {
        dump: BackupDump,
        next_address: u32,
    },
}

/// Why a connection stopped being served.
#[derive(Debug)]
enum Stop {
    Lost(String),
    /// The pipeline dropped its receiver.
    Orphaned,
}

/// Drives one station until shutdown.
pub struct StationSession<T> {
    config: StationConfig,
    transport: T,
    decoder: FrameDecoder,
    queue: IngestSender,
    commands: mpsc::Receiver<SessionCommand>,
    shutdown: watch::Receiver<bool>,
    ctx: SessionContext,
    seq: u32,
    kind: PunchKind,
    info: Option<StationInfo>,
    exchange: Exchange,
    deadline: Option<Instant>,
}

impl<T: Transport> StationSession<T> {
    pub fn new(
        config: StationConfig,
        transport: T,
        queue: IngestSender,
        shutdown: watch::Receiver<bool>,
        ctx: SessionContext,
    ) -> (Self, StationHandle) {
        let (tx, rx) = mpsc::channel(8);
        let handle = StationHandle {
            station: config.id,
            commands: tx,
        };
        let session = Self {
            decoder: FrameDecoder::new(config.protocol, config.crc_enabled),
            kind: config.punch_kind.unwrap_or(PunchKind::Control),
            config,
            transport,
            queue,
            commands: rx,
            shutdown,
            ctx,
            seq: 0,
            info: None,
            exchange: Exchange::Idle,
            deadline: None,
        };
        (session, handle)
    }

    /// Run until shutdown, a `Close` command, or the link is given up on.
    pub async fn run(mut self) {
        let station = self.config.label();
        info!(station = %station, transport = %self.transport.describe(), "session starting");

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            if let Err(err) =
                open_with_retry(&mut self.transport, &self.ctx.retry, &mut self.shutdown).await
            {
                if !*self.shutdown.borrow() {
                    error!(station = %station, error = %err, "giving up on station");
                    let _ = self.link(ConnectionEvent::Lost(err.to_string())).await;
                }
                break;
            }

            match self.serve().await {
                Ok(()) => break,
                Err(Stop::Orphaned) => {
                    debug!(station = %station, "pipeline gone");
                    break;
                }
                Err(Stop::Lost(reason)) => {
                    warn!(station = %station, reason = %reason, "connection lost");
                    self.decoder.clear();
                    if self.abandon_exchange().await.is_err()
                        || self.link(ConnectionEvent::Lost(reason)).await.is_err()
                    {
                        break;
                    }
                }
            }
        }

        if let Exchange::Backup { dump, .. } = std::mem::replace(&mut self.exchange, Exchange::Idle)
        {
            let _ = self.end_backup(dump, true).await;
        }
        let _ = self.emit(Ingest::Closed {
            station: self.config.id,
        })
        .await;
        if let Err(err) = self.transport.close().await {
            debug!(station = %station, error = %err, "close failed");
        }
        info!(station = %station, "session ended");
    }

    /// Serve one open connection. `Ok` means an orderly stop.
    async fn serve(&mut self) -> Result<(), Stop> {
        self.link(ConnectionEvent::Opened).await?;
        self.start().await?;

        loop {
            let deadline = self.deadline;
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        return Ok(());
                    }
                }
                Some(command) = self.commands.recv() => {
                    if command == SessionCommand::Close {
                        return Ok(());
                    }
                    self.on_command(command).await?;
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_timeout().await?;
                }
                read = self.transport.read_stream() => match read {
                    Ok(inbound) => self.on_inbound(inbound).await?,
                    Err(err) => return Err(Stop::Lost(err.to_string())),
                },
            }
        }
    }

    fn talks(&self) -> bool {
        !matches!(self.config.transport, TransportKind::Bus { .. })
    }

    async fn start(&mut self) -> Result<(), Stop> {
        if self.talks() && self.config.protocol == ProtocolMode::Extended {
            self.send(Command::SetMaster).await?;
            self.send(Command::GetSystemValues {
                address: SYS_VAL_ADDRESS,
                len: SYS_VAL_LEN,
            })
            .await?;
            self.begin(Exchange::Identify);
            Ok(())
        } else {
            self.after_identify().await
        }
    }

    async fn after_identify(&mut self) -> Result<(), Stop> {
        if self.config.mode == OperatingMode::BackupDownload {
            self.start_backup().await?;
        }
        Ok(())
    }

    async fn on_command(&mut self, command: SessionCommand) -> Result<(), Stop> {
        match command {
            SessionCommand::DownloadBackup => self.start_backup().await,
            SessionCommand::CancelBackup => {
                match std::mem::replace(&mut self.exchange, Exchange::Idle) {
                    Exchange::Backup { dump, .. } => {
                        self.deadline = None;
                        info!(station = %self.config.label(), "backup download cancelled");
                        self.end_backup(dump, true).await
                    }
                    other => {
                        self.exchange = other;
                        debug!(station = %self.config.label(), "no backup download to cancel");
                        Ok(())
                    }
                }
            }
            SessionCommand::Close => Ok(()),
        }
    }

    async fn on_timeout(&mut self) -> Result<(), Stop> {
        self.deadline = None;
        let station = self.config.label();
        match std::mem::replace(&mut self.exchange, Exchange::Idle) {
            Exchange::Idle => Ok(()),
            Exchange::Identify => {
                warn!(station = %station, "station did not identify itself");
                self.after_identify().await
            }
            Exchange::ReadingCard { card_id, .. } => {
                warn!(station = %station, card = ?card_id, "card read timed out");
                self.abandoned_read().await
            }
            Exchange::Backup { dump, .. } => {
                warn!(station = %station, records = dump.len(), "backup download stalled");
                self.end_backup(dump, false).await
            }
        }
    }

    /// Drop whatever the station was doing when the link went away.
    async fn abandon_exchange(&mut self) -> Result<(), Stop> {
        self.deadline = None;
        match std::mem::replace(&mut self.exchange, Exchange::Idle) {
            Exchange::Backup { dump, .. } => self.end_backup(dump, false).await,
            Exchange::ReadingCard { card_id, .. } => {
                warn!(station = %self.config.label(), card = ?card_id, "card read interrupted");
                self.abandoned_read().await
            }
            Exchange::Idle | Exchange::Identify => Ok(()),
        }
    }

    async fn on_inbound(&mut self, inbound: Inbound) -> Result<(), Stop> {
        self.link(ConnectionEvent::DataAvailable).await?;
        match inbound {
            Inbound::Bytes(bytes) => {
                self.decoder.push(&bytes);
                while let Some(next) = self.decoder.next_frame() {
                    match next {
                        Ok(frame) => self.on_frame(frame).await?,
                        Err(err) => self.fault(&err).await?,
                    }
                }
                Ok(())
            }
            Inbound::Punches(punches) => {
                for punch in punches {
                    trace!(card = %punch.card_id, code = %punch.control_code, "bus punch");
                    self.emit(Ingest::Punch(punch)).await?;
                }
                Ok(())
            }
            Inbound::Malformed(reason) => {
                warn!(station = %self.config.label(), reason = %reason, "dropped message");
                self.emit(Ingest::Fault {
                    station: self.config.id,
                    fault: FrameFault::Malformed,
                })
                .await
            }
        }
    }

    async fn on_frame(&mut self, frame: RawFrame) -> Result<(), Stop> {
        let message = match StationMessage::parse(&frame, self.config.protocol) {
            Ok(message) => message,
            Err(err) => return self.fault(&err).await,
        };
        match message {
            StationMessage::Punch { command, payload } => self.on_punch(command, &payload).await,
            StationMessage::CardInserted { kind, card_id } => {
                self.on_card_inserted(kind, card_id).await
            }
            StationMessage::CardRemoved { card_id } => self.on_card_removed(card_id).await,
            StationMessage::SystemValues { address, data, .. } => {
                self.on_system_values(address, &data).await
            }
            StationMessage::Backup { address, data, .. } => self.on_backup(address, &data).await,
            StationMessage::CardBlock { block, data } => self.on_card_block(block, &data).await,
            StationMessage::Ack | StationMessage::Nak | StationMessage::Reply { .. } => {
                trace!(station = %self.config.label(), command = frame.command, "reply ignored");
                Ok(())
            }
        }
    }

    async fn on_punch(&mut self, command: u8, payload: &[u8]) -> Result<(), Stop> {
        let record = match PunchRecord::parse(command, payload) {
            Ok(record) => record,
            Err(err) => return self.fault(&err).await,
        };
        self.seq = self.seq.wrapping_add(1);
        match record.into_event(self.ctx.zero_time.date(), self.config.id, self.seq, self.kind) {
            Ok(event) => {
                debug!(
                    station = %self.config.label(),
                    card = %event.card_id,
                    code = %event.control_code,
                    time = %event.timestamp,
                    "punch"
                );
                self.emit(Ingest::Punch(event)).await
            }
            Err(err) => self.fault(&err).await,
        }
    }

    async fn on_card_inserted(
        &mut self,
        kind: InsertedCard,
        card_id: Option<CardId>,
    ) -> Result<(), Stop> {
        let station = self.config.label();
        if self.config.mode != OperatingMode::Readout {
            debug!(station = %station, card = ?card_id, "card inserted outside readout mode");
            return Ok(());
        }
        if matches!(self.exchange, Exchange::Backup { .. }) {
            warn!(station = %station, card = ?card_id, "card inserted during backup download");
            return Ok(());
        }

        let (image, command) = match kind {
            InsertedCard::Si5 => (Some(CardImage::new(CardFamily::Si5)), Command::ReadSi5),
            InsertedCard::Si6 => (
                Some(CardImage::new(CardFamily::Si6)),
                Command::ReadSi6 { block: 0 },
            ),
            InsertedCard::Si8Family => (None, Command::ReadSi8 { block: 0 }),
        };
        debug!(station = %station, card = ?card_id, "reading card");
        self.begin(Exchange::ReadingCard { card_id, image });
        self.send(command).await
    }

    async fn on_card_block(&mut self, block: Option<u8>, data: &[u8]) -> Result<(), Stop> {
        let exchange = std::mem::replace(&mut self.exchange, Exchange::Idle);
        let Exchange::ReadingCard { card_id, image } = exchange else {
            self.exchange = exchange;
            trace!(station = %self.config.label(), "unsolicited card block");
            return Ok(());
        };

        let expected = image.as_ref().map_or(Some(0), CardImage::next_block);
        if block.is_some_and(|b| Some(b) != expected) {
            trace!(station = %self.config.label(), block = ?block, "unexpected card block");
            self.exchange = Exchange::ReadingCard { card_id, image };
            return Ok(());
        }

        let mut image = match image {
            Some(image) => image,
            None => match data.get(24).copied().and_then(CardFamily::from_series) {
                Some(family) => CardImage::new(family),
                None => {
                    self.deadline = None;
                    return self.fault(&FrameError::malformed("unknown card series")).await;
                }
            },
        };

        let complete = match image.push_block(data) {
            Ok(complete) => complete,
            Err(err) => {
                self.deadline = None;
                return self.fault(&err).await;
            }
        };
        if !complete {
            let next = match (image.family(), image.next_block()) {
                (CardFamily::Si6, Some(block)) => Command::ReadSi6 { block },
                (_, Some(block)) => Command::ReadSi8 { block },
                (_, None) => return Ok(()),
            };
            self.begin(Exchange::ReadingCard {
                card_id,
                image: Some(image),
            });
            return self.send(next).await;
        }

        self.deadline = None;
        let contents = match image.decode(self.ctx.zero_time, self.config.id) {
            Ok(contents) => contents,
            Err(err) => return self.fault(&err).await,
        };
        info!(
            station = %self.config.label(),
            card = %contents.card_id,
            family = ?image.family(),
            punches = contents.punches.len(),
            "card read"
        );

        let card = contents.card_id;
        let mut flags = Vec::new();
        if contents.untimed {
            flags.push(ReadoutError::UntimedPunches);
        }
        for punch in contents.punches {
            self.emit(Ingest::Punch(punch)).await?;
        }
        self.emit(Ingest::CardRemoved {
            station: self.config.id,
            card_id: Some(card),
            flags,
        })
        .await?;
        self.send(Command::Ack).await
    }

    async fn on_card_removed(&mut self, card_id: Option<CardId>) -> Result<(), Stop> {
        if let Exchange::ReadingCard { card_id: reading, .. } = &self.exchange {
            warn!(station = %self.config.label(), card = ?reading, "card removed before read finished");
            self.idle();
            self.abandoned_read().await?;
        }
        self.emit(Ingest::CardRemoved {
            station: self.config.id,
            card_id,
            flags: Vec::new(),
        })
        .await
    }

    async fn on_system_values(&mut self, address: u8, data: &[u8]) -> Result<(), Stop> {
        if !matches!(self.exchange, Exchange::Identify) {
            trace!(station = %self.config.label(), "unsolicited system values");
            return Ok(());
        }
        self.idle();

        match StationInfo::parse(address, data) {
            Ok(info) => {
                if self.config.punch_kind.is_none() {
                    self.kind = info.mode.punch_kind().unwrap_or(PunchKind::Control);
                }
                info!(
                    station = %self.config.label(),
                    code = %info.code,
                    mode = ?info.mode,
                    "station identified"
                );
                self.info = Some(info);
                self.emit(Ingest::Identified {
                    station: self.config.id,
                    info,
                })
                .await?;
            }
            Err(err) => self.fault(&err).await?,
        }
        self.after_identify().await
    }

    async fn start_backup(&mut self) -> Result<(), Stop> {
        let station = self.config.label();
        if !matches!(self.exchange, Exchange::Idle) {
            warn!(station = %station, "station busy, backup download not started");
            return Ok(());
        }
        if self.config.protocol != ProtocolMode::Extended || !self.talks() {
            warn!(station = %station, "backup download needs an extended-protocol station link");
            return Ok(());
        }

        let code = self
            .info
            .map(|info| info.code)
            .unwrap_or(ControlCode(self.config.id.0));
        let dump = BackupDump::new(
            self.config.id,
            code,
            self.kind,
            BackupLayout::for_mode(self.config.protocol),
            self.ctx.zero_time.date(),
        );
        info!(station = %station, code = %code, "downloading backup memory");
        self.begin(Exchange::Backup {
            dump,
            next_address: BACKUP_START,
        });
        self.send(Command::GetBackup {
            address: BACKUP_START,
            len: BACKUP_CHUNK,
        })
        .await
    }

    async fn on_backup(&mut self, address: u32, data: &[u8]) -> Result<(), Stop> {
        let exchange = std::mem::replace(&mut self.exchange, Exchange::Idle);
        let Exchange::Backup {
            mut dump,
            next_address,
        } = exchange
        else {
            self.exchange = exchange;
            trace!(station = %self.config.label(), "unsolicited backup data");
            return Ok(());
        };
        if address != next_address {
            trace!(station = %self.config.label(), address, expected = next_address, "stale backup chunk");
            self.exchange = Exchange::Backup { dump, next_address };
            return Ok(());
        }

        let next_address = next_address + u32::from(BACKUP_CHUNK);
        if dump.push_chunk(data) || next_address >= BACKUP_END {
            self.deadline = None;
            return self.end_backup(dump, false).await;
        }
        self.begin(Exchange::Backup { dump, next_address });
        self.send(Command::GetBackup {
            address: next_address,
            len: BACKUP_CHUNK,
        })
        .await
    }

    /// Replay a finished (or abandoned) dump into the queue.
    async fn end_backup(&mut self, dump: BackupDump, cancelled: bool) -> Result<(), Stop> {
        let skipped = dump.skipped();
        let (records, outcome) = if cancelled {
            (dump.cancel(), DumpOutcome::Cancelled)
        } else {
            match dump.finish() {
                Ok(records) => (records, DumpOutcome::Complete),
                Err(err) => {
                    self.fault(&err).await?;
                    let records = match err {
                        FrameError::TruncatedDump { records } => records,
                        _ => Vec::new(),
                    };
                    (records, DumpOutcome::Truncated)
                }
            }
        };

        let count = records.len();
        info!(
            station = %self.config.label(),
            records = count,
            skipped,
            outcome = ?outcome,
            "backup download finished"
        );
        for record in records {
            self.emit(Ingest::Punch(record)).await?;
        }
        self.emit(Ingest::DumpFinished {
            station: self.config.id,
            outcome,
            records: count,
            skipped,
        })
        .await
    }

    fn begin(&mut self, exchange: Exchange) {
        self.exchange = exchange;
        self.deadline = Some(Instant::now() + self.ctx.reply_timeout);
    }

    fn idle(&mut self) {
        self.exchange = Exchange::Idle;
        self.deadline = None;
    }

    /// Write a command. Links that cannot carry it are logged, not fatal.
    async fn send(&mut self, command: Command) -> Result<(), Stop> {
        let bytes = match command.encode(self.config.protocol) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(station = %self.config.label(), command = ?command, error = %err, "command not encodable");
                return Ok(());
            }
        };
        match self.transport.write_command(&bytes).await {
            Ok(()) => Ok(()),
            Err(err @ (TransportError::Lost { .. } | TransportError::Io(_))) => {
                Err(Stop::Lost(err.to_string()))
            }
            Err(err) => {
                debug!(station = %self.config.label(), command = ?command, error = %err, "command not sent");
                Ok(())
            }
        }
    }

    async fn fault(&mut self, err: &FrameError) -> Result<(), Stop> {
        warn!(station = %self.config.label(), error = %err, "dropped frame");
        self.emit(Ingest::Fault {
            station: self.config.id,
            fault: FrameFault::from(err),
        })
        .await
    }

    /// The card left or the station went quiet before its memory was read.
    async fn abandoned_read(&mut self) -> Result<(), Stop> {
        self.emit(Ingest::Fault {
            station: self.config.id,
            fault: FrameFault::AbandonedRead,
        })
        .await
    }

    async fn link(&mut self, event: ConnectionEvent) -> Result<(), Stop> {
        self.emit(Ingest::Link {
            station: self.config.id,
            event,
        })
        .await
    }

    /// Blocks while the queue is full.
    async fn emit(&mut self, item: Ingest) -> Result<(), Stop> {
        self.queue.send(item).await.map_err(|_| Stop::Orphaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PunchOrigin;
    use crate::ingest::{self, IngestReceiver};
    use crate::protocol::cmd;
    use crate::protocol::frame::{encode_basic, encode_extended};
    use crate::transport::{MemoryHandle, MemoryTransport, SerialSettings};
    use chrono::NaiveDate;

    fn zero() -> PunchTime {
        PunchTime::parse_hms("09:00:00", NaiveDate::from_ymd_opt(2026, 5, 9).unwrap()).unwrap()
    }

    fn config(protocol: ProtocolMode, mode: OperatingMode) -> StationConfig {
        StationConfig::new(
            StationId(4),
            TransportKind::Serial(SerialSettings::new("mem")),
        )
        .with_protocol(protocol)
        .with_mode(mode)
    }

    struct Rig {
        handle: MemoryHandle,
        station: StationHandle,
        rx: IngestReceiver,
        stop: watch::Sender<bool>,
        task: tokio::task::JoinHandle<()>,
    }

    fn spawn(config: StationConfig, ctx: SessionContext) -> Rig {
        let (transport, handle) = MemoryTransport::pair(16);
        let (tx, rx) = ingest::channel(256);
        let (stop, shutdown) = watch::channel(false);
        let (session, station) = StationSession::new(config, transport, tx, shutdown, ctx);
        let task = tokio::spawn(session.run());
        Rig {
            handle,
            station,
            rx,
            stop,
            task,
        }
    }

    /// Next item that is not a link event.
    async fn next(rx: &mut IngestReceiver) -> Ingest {
        loop {
            match rx.recv().await.expect("session ended") {
                Ingest::Link { .. } => continue,
                other => return other,
            }
        }
    }

    async fn written(handle: &mut MemoryHandle) -> Vec<u8> {
        handle.outbound.recv().await.expect("no command written")
    }

    async fn identify(rig: &mut Rig, mode: u8) {
        assert_eq!(
            written(&mut rig.handle).await,
            Command::SetMaster.encode(ProtocolMode::Extended).unwrap()
        );
        assert_eq!(written(&mut rig.handle).await[1], cmd::GET_SYS_VAL);
        let reply = encode_extended(
            cmd::GET_SYS_VAL,
            &[0, 31, SYS_VAL_ADDRESS, 0x00, mode, 31, 0x00, 0x87, 0x00],
        );
        rig.handle.send_bytes(reply).await;
        assert!(matches!(next(&mut rig.rx).await, Ingest::Identified { .. }));
    }

    fn backup_chunk(address: u32, records: u16) -> Vec<u8> {
        let mut payload = vec![0, 31];
        payload.extend_from_slice(&address.to_be_bytes()[1..]);
        for i in 0..records {
            let d1 = (26 << 2) | (5 >> 2);
            let d0 = ((5 & 0x03) << 6) | (9 << 1);
            let [th, tl] = (36000 + i).to_be_bytes();
            payload.extend_from_slice(&[0x6D, 0xEB, 0x87, d1, d0, th, tl, 0]);
        }
        encode_extended(cmd::GET_BACKUP, &payload)
    }

    #[tokio::test]
    async fn basic_punch_reaches_queue() {
        let mut rig = spawn(
            config(ProtocolMode::Basic, OperatingMode::DirectPunch),
            SessionContext::new(zero()),
        );
        let Some(Ingest::Link {
            event: ConnectionEvent::Opened,
            ..
        }) = rig.rx.recv().await
        else {
            panic!("expected link opened");
        };

        rig.handle
            .send_bytes(encode_basic(cmd::BASIC_PUNCH, &[32, 0, 2, 0x00, 0x2A, 0x01, 0x00, 0x3C]))
            .await;
        let Ingest::Punch(punch) = next(&mut rig.rx).await else {
            panic!("expected punch");
        };
        assert_eq!(punch.card_id.get(), 200042);
        assert_eq!(punch.control_code, ControlCode(32));
        assert_eq!(punch.timestamp.to_string(), "12:01:00");
        assert_eq!(punch.source_station, StationId(4));
        assert_eq!(punch.kind, PunchKind::Control);

        rig.stop.send(true).unwrap();
        assert!(matches!(next(&mut rig.rx).await, Ingest::Closed { .. }));
        rig.task.await.unwrap();
    }

    #[tokio::test]
    async fn identified_role_sets_punch_kind() {
        let mut rig = spawn(
            config(ProtocolMode::Extended, OperatingMode::DirectPunch),
            SessionContext::new(zero()),
        );
        identify(&mut rig, 0x04).await;

        let record = [0, 31, 0, 0x6D, 0xEB, 0x87, 0x00, 0x8C, 0xA0, 0x00, 0x00, 0x12, 0x34];
        rig.handle
            .send_bytes(encode_extended(cmd::TRANSMIT_RECORD, &record))
            .await;
        let Ingest::Punch(punch) = next(&mut rig.rx).await else {
            panic!("expected punch");
        };
        assert_eq!(punch.kind, PunchKind::Finish);
        assert_eq!(punch.timestamp.to_string(), "10:00:00");
    }

    #[tokio::test]
    async fn corrupt_frame_is_counted_and_skipped() {
        let mut rig = spawn(
            config(ProtocolMode::Extended, OperatingMode::DirectPunch),
            SessionContext::new(zero()),
        );
        identify(&mut rig, 0x02).await;

        let record = [0, 31, 0, 0x6D, 0xEB, 0x87, 0x00, 0x8C, 0xA0, 0x00, 0x00, 0x12, 0x34];
        let mut bad = encode_extended(cmd::TRANSMIT_RECORD, &record);
        bad[5] ^= 0x40;
        let mut bytes = bad;
        bytes.extend(encode_extended(cmd::TRANSMIT_RECORD, &record));
        rig.handle.send_bytes(bytes).await;

        assert!(matches!(
            next(&mut rig.rx).await,
            Ingest::Fault {
                fault: FrameFault::Checksum,
                ..
            }
        ));
        assert!(matches!(next(&mut rig.rx).await, Ingest::Punch(_)));
    }

    #[tokio::test]
    async fn readout_mode_reads_si5_card() {
        let mut rig = spawn(
            config(ProtocolMode::Basic, OperatingMode::Readout),
            SessionContext::new(zero()),
        );
        rig.handle
            .send_bytes(encode_basic(cmd::BASIC_CARD_EVENT, b"I"))
            .await;
        assert_eq!(written(&mut rig.handle).await, vec![0x02, 0x31, 0x03]);

        let mut memory = vec![0u8; 128];
        memory[4..6].copy_from_slice(&1000u16.to_be_bytes());
        memory[6] = 4;
        memory[19..21].copy_from_slice(&36000u16.to_be_bytes());
        memory[21..23].copy_from_slice(&39600u16.to_be_bytes());
        memory[25..27].copy_from_slice(&0xEEEEu16.to_be_bytes());
        memory[23] = 2;
        memory[33] = 31;
        memory[34..36].copy_from_slice(&36300u16.to_be_bytes());
        rig.handle
            .send_bytes(encode_basic(cmd::BASIC_GET_SI5, &memory))
            .await;

        let mut kinds = Vec::new();
        loop {
            match next(&mut rig.rx).await {
                Ingest::Punch(p) => {
                    assert_eq!(p.card_id.get(), 401000);
                    assert_eq!(p.origin, PunchOrigin::CardMemory);
                    kinds.push(p.kind);
                }
                Ingest::CardRemoved { card_id, flags, .. } => {
                    assert_eq!(card_id.map(|c| c.get()), Some(401000));
                    assert!(flags.is_empty());
                    break;
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(
            kinds,
            vec![PunchKind::Start, PunchKind::Control, PunchKind::Finish]
        );
        assert_eq!(written(&mut rig.handle).await, vec![0x06]);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_backup_yields_truncated_prefix() {
        let mut rig = spawn(
            config(ProtocolMode::Extended, OperatingMode::DirectPunch),
            SessionContext::new(zero()),
        );
        identify(&mut rig, 0x02).await;

        assert!(rig.station.send(SessionCommand::DownloadBackup).await);
        assert_eq!(written(&mut rig.handle).await[1], cmd::GET_BACKUP);
        rig.handle.send_bytes(backup_chunk(BACKUP_START, 16)).await;
        assert_eq!(written(&mut rig.handle).await[1], cmd::GET_BACKUP);

        // no second chunk: the reply timeout ends the download
        assert!(matches!(
            next(&mut rig.rx).await,
            Ingest::Fault {
                fault: FrameFault::TruncatedDump,
                ..
            }
        ));
        for _ in 0..16 {
            let Ingest::Punch(p) = next(&mut rig.rx).await else {
                panic!("expected backup punch");
            };
            assert_eq!(p.origin, PunchOrigin::Backup);
            assert_eq!(p.control_code, ControlCode(31));
        }
        assert_eq!(
            next(&mut rig.rx).await,
            Ingest::DumpFinished {
                station: StationId(4),
                outcome: DumpOutcome::Truncated,
                records: 16,
                skipped: 0,
            }
        );
    }

    #[tokio::test]
    async fn cancelled_backup_keeps_prefix() {
        let mut rig = spawn(
            config(ProtocolMode::Extended, OperatingMode::DirectPunch),
            SessionContext::new(zero()),
        );
        identify(&mut rig, 0x02).await;

        rig.station.send(SessionCommand::DownloadBackup).await;
        written(&mut rig.handle).await;
        rig.handle.send_bytes(backup_chunk(BACKUP_START, 16)).await;
        written(&mut rig.handle).await;
        rig.station.send(SessionCommand::CancelBackup).await;

        let mut punches = 0;
        loop {
            match next(&mut rig.rx).await {
                Ingest::Punch(_) => punches += 1,
                Ingest::DumpFinished { outcome, records, .. } => {
                    assert_eq!(outcome, DumpOutcome::Cancelled);
                    assert_eq!(records, 16);
                    break;
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(punches, 16);
    }

    #[tokio::test]
    async fn backup_mode_downloads_to_end_marker() {
        let mut rig = spawn(
            config(ProtocolMode::Extended, OperatingMode::BackupDownload),
            SessionContext::new(zero()),
        );
        identify(&mut rig, 0x02).await;

        assert_eq!(written(&mut rig.handle).await[1], cmd::GET_BACKUP);
        let mut chunk = backup_chunk(BACKUP_START, 3);
        // splice an end marker into the data before re-encoding
        let frame = crate::protocol::decode(&chunk, ProtocolMode::Extended, true).unwrap();
        let mut payload = frame.payload;
        // an erased slot, then the end marker
        payload.extend_from_slice(&[0x00; 8]);
        payload.extend_from_slice(&[0xFF; 8]);
        chunk = encode_extended(cmd::GET_BACKUP, &payload);
        rig.handle.send_bytes(chunk).await;

        for _ in 0..3 {
            assert!(matches!(next(&mut rig.rx).await, Ingest::Punch(_)));
        }
        assert!(matches!(
            next(&mut rig.rx).await,
            Ingest::DumpFinished {
                outcome: DumpOutcome::Complete,
                records: 3,
                skipped: 1,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_card_read_is_reported() {
        let mut rig = spawn(
            config(ProtocolMode::Basic, OperatingMode::Readout),
            SessionContext::new(zero()),
        );
        rig.handle
            .send_bytes(encode_basic(cmd::BASIC_CARD_EVENT, b"I"))
            .await;
        assert_eq!(written(&mut rig.handle).await, vec![0x02, 0x31, 0x03]);

        // the station never sends the card memory
        assert!(matches!(
            next(&mut rig.rx).await,
            Ingest::Fault {
                station: StationId(4),
                fault: FrameFault::AbandonedRead,
            }
        ));
    }

    #[tokio::test]
    async fn card_pulled_mid_read_is_reported() {
        let mut rig = spawn(
            config(ProtocolMode::Basic, OperatingMode::Readout),
            SessionContext::new(zero()),
        );
        rig.handle
            .send_bytes(encode_basic(cmd::BASIC_CARD_EVENT, b"I"))
            .await;
        written(&mut rig.handle).await;
        rig.handle
            .send_bytes(encode_basic(cmd::BASIC_CARD_EVENT, b"O"))
            .await;

        assert!(matches!(
            next(&mut rig.rx).await,
            Ingest::Fault {
                fault: FrameFault::AbandonedRead,
                ..
            }
        ));
        assert!(matches!(
            next(&mut rig.rx).await,
            Ingest::CardRemoved { card_id: None, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn lost_link_retries_then_closes() {
        let ctx = SessionContext::new(zero()).with_retry(RetryPolicy::default().with_attempts(2));
        let mut rig = spawn(config(ProtocolMode::Basic, OperatingMode::DirectPunch), ctx);
        assert!(matches!(
            rig.rx.recv().await,
            Some(Ingest::Link {
                event: ConnectionEvent::Opened,
                ..
            })
        ));

        drop(rig.handle);
        let mut lost = 0;
        loop {
            match rig.rx.recv().await {
                Some(Ingest::Link {
                    event: ConnectionEvent::Lost(_),
                    ..
                }) => lost += 1,
                Some(Ingest::Closed { station }) => {
                    assert_eq!(station, StationId(4));
                    break;
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        // once for the drop, once for giving up on reopening
        assert_eq!(lost, 2);
        rig.task.await.unwrap();
    }

    #[tokio::test]
    async fn boxed_transport_session_runs_on_any_worker() {
        let (transport, _memory) = MemoryTransport::pair(4);
        let transport: Box<dyn Transport> = Box::new(transport);
        let (tx, mut rx) = ingest::channel(16);
        let (stop, shutdown) = watch::channel(false);
        let (session, _station) = StationSession::new(
            config(ProtocolMode::Basic, OperatingMode::DirectPunch),
            transport,
            tx,
            shutdown,
            SessionContext::new(zero()),
        );
        let task = tokio::spawn(session.run());

        assert!(matches!(
            rx.recv().await,
            Some(Ingest::Link {
                event: ConnectionEvent::Opened,
                ..
            })
        ));
        stop.send(true).unwrap();
        assert!(matches!(next(&mut rx).await, Ingest::Closed { .. }));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn close_command_ends_session() {
        let mut rig = spawn(
            config(ProtocolMode::Basic, OperatingMode::DirectPunch),
            SessionContext::new(zero()),
        );
        assert!(rig.station.send(SessionCommand::Close).await);
        assert!(matches!(next(&mut rig.rx).await, Ingest::Closed { .. }));
        rig.task.await.unwrap();
        assert!(!rig.station.send(SessionCommand::Close).await);
    }
}
