//! Processing pipeline.
//!
//! One task owns everything downstream of the ingestion channel: the
//! reorder queue, the assembler, resolution, checking and publishing.
//! Readouts that cannot be published on their own are parked in a pending
//! list until an operator assigns or retries them.

mod pending;
mod rereads;

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{Local, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::assembler::ReadoutAssembler;
use crate::checker::{CheckOutcome, CourseChecker};
use crate::domain::{CompetitorRef, PunchEvent, PunchTime, Readout, RunId, StageId, StationId};
use crate::ingest::{DumpOutcome, Ingest, IngestReceiver, IngestionQueue, PushOutcome, QueueConfig};
use crate::publisher::{PublishOutcome, ResultPublisher};
use crate::resolver::{CompetitorResolver, DirectoryError, ResolveOutcome};
use crate::status::{DumpSummary, LinkState, StatusBoard};
use crate::transport::ConnectionEvent;

pub use pending::{Disposition, OperatorNotice, PendingReadout, PendingReason};
pub use rereads::RereadRegistry;

/// Pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Stage readouts are resolved against.
    pub stage: StageId,
    pub queue: QueueConfig,
    /// Held punches are released after this long without input.
    pub idle_flush: Duration,
    /// A card-memory or backup readout with no new punch for this long is
    /// completed.
    pub inactivity: Duration,
    /// How long a card's last readout is kept to compare re-reads against.
    pub reread_window: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage: StageId(1),
            queue: QueueConfig::default(),
            idle_flush: Duration::from_millis(250),
            inactivity: Duration::from_secs(30),
            reread_window: Duration::from_secs(6 * 3600),
        }
    }
}

impl PipelineConfig {
    pub fn with_stage(mut self, stage: StageId) -> Self {
        self.stage = stage;
        self
    }

    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_idle_flush(mut self, idle_flush: Duration) -> Self {
        self.idle_flush = idle_flush;
        self
    }

    pub fn with_inactivity(mut self, inactivity: Duration) -> Self {
        self.inactivity = inactivity;
        self
    }

    pub fn with_reread_window(mut self, window: Duration) -> Self {
        self.reread_window = window;
        self
    }
}

/// Errors answering an operator request.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no pending readout {0}")]
    UnknownPending(u64),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("pipeline has stopped")]
    Stopped,
}

#[derive(Debug)]
enum Control {
    ListPending(oneshot::Sender<Vec<PendingReadout>>),
    Assign {
        id: u64,
        run: RunId,
        reply: oneshot::Sender<Result<Disposition, PipelineError>>,
    },
    Retry {
        id: u64,
        reply: oneshot::Sender<Result<Disposition, PipelineError>>,
    },
}

/// Operator access to a running pipeline.
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    control: mpsc::Sender<Control>,
}

impl PipelineHandle {
    /// Readouts waiting for an operator, oldest first.
    pub async fn pending(&self) -> Result<Vec<PendingReadout>, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.request(Control::ListPending(reply)).await?;
        rx.await.map_err(|_| PipelineError::Stopped)
    }

    /// Publish pending readout `id` for `run`, whatever its card says.
    pub async fn assign(&self, id: u64, run: RunId) -> Result<Disposition, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.request(Control::Assign { id, run, reply }).await?;
        rx.await.map_err(|_| PipelineError::Stopped)?
    }

    /// Resolve pending readout `id` again.
    pub async fn retry(&self, id: u64) -> Result<Disposition, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.request(Control::Retry { id, reply }).await?;
        rx.await.map_err(|_| PipelineError::Stopped)?
    }

    async fn request(&self, control: Control) -> Result<(), PipelineError> {
        self.control
            .send(control)
            .await
            .map_err(|_| PipelineError::Stopped)
    }
}

/// Everything a caller keeps after building a [`Pipeline`].
#[derive(Debug)]
pub struct PipelineOutputs {
    pub handle: PipelineHandle,
    pub status: watch::Receiver<StatusBoard>,
    pub notices: mpsc::UnboundedReceiver<OperatorNotice>,
}

/// The single processing context.
pub struct Pipeline {
    config: PipelineConfig,
    ingest: IngestReceiver,
    control: mpsc::Receiver<Control>,
    queue: IngestionQueue,
    assembler: ReadoutAssembler,
    resolver: CompetitorResolver,
    checker: CourseChecker,
    publisher: ResultPublisher,
    rereads: RereadRegistry,
    pending: BTreeMap<u64, PendingReadout>,
    next_pending: u64,
    board: StatusBoard,
    status: watch::Sender<StatusBoard>,
    notices: mpsc::UnboundedSender<OperatorNotice>,
    last_input: Instant,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        ingest: IngestReceiver,
        resolver: CompetitorResolver,
        checker: CourseChecker,
        publisher: ResultPublisher,
    ) -> (Self, PipelineOutputs) {
        let (control_tx, control_rx) = mpsc::channel(16);
        let (status_tx, status_rx) = watch::channel(StatusBoard::default());
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        let pipeline = Self {
            queue: IngestionQueue::new(config.queue),
            assembler: ReadoutAssembler::new(config.inactivity)
                .with_tolerance(config.queue.dedup_tolerance)
                .with_retention(config.reread_window),
            rereads: RereadRegistry::new(config.queue.dedup_tolerance),
            config,
            ingest,
            control: control_rx,
            resolver,
            checker,
            publisher,
            pending: BTreeMap::new(),
            next_pending: 0,
            board: StatusBoard::default(),
            status: status_tx,
            notices: notice_tx,
            last_input: Instant::now(),
        };
        let outputs = PipelineOutputs {
            handle: PipelineHandle {
                control: control_tx,
            },
            status: status_rx,
            notices: notice_rx,
        };
        (pipeline, outputs)
    }

    /// Show a configured station on the status board before it reports.
    pub fn register_station(&mut self, station: StationId, name: impl Into<String>) {
        self.board.register(station, name);
        self.publish_status();
    }

    /// Run until every ingestion sender is gone, then flush what is left.
    pub async fn run(mut self) {
        info!(stage = %self.config.stage, "pipeline starting");
        self.publish_status();

        let mut tick = tokio::time::interval(self.config.idle_flush);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                item = self.ingest.recv() => match item {
                    Some(item) => {
                        self.last_input = Instant::now();
                        self.handle(item).await;
                    }
                    None => break,
                },
                Some(control) = self.control.recv() => self.handle_control(control).await,
                _ = tick.tick() => self.on_tick().await,
            }
            self.publish_status();
        }

        self.flush_queue().await;
        for readout in self.assembler.drain() {
            self.process(readout).await;
        }
        self.publish_status();
        info!(
            results = self.publisher.len(),
            pending = self.pending.len(),
            "pipeline finished"
        );
    }

    async fn handle(&mut self, item: Ingest) {
        match item {
            Ingest::Punch(punch) => {
                self.board.station_mut(punch.source_station).punches += 1;
                let card = punch.card_id;
                if self.queue.push(punch) == PushOutcome::Duplicate {
                    debug!(card = %card, "duplicate punch dropped");
                }
                let ready = self.queue.drain_ready();
                self.feed(ready).await;
            }
            Ingest::CardRemoved {
                station,
                card_id,
                flags,
            } => {
                self.flush_queue().await;
                if let Some(readout) = self.assembler.card_removed(station, card_id, &flags) {
                    self.process(readout).await;
                }
            }
            Ingest::DumpFinished {
                station,
                outcome,
                records,
                skipped,
            } => {
                self.flush_queue().await;
                if outcome == DumpOutcome::Complete {
                    info!(station = %station, records, skipped, "backup download complete");
                } else {
                    warn!(station = %station, records, skipped, outcome = ?outcome, "backup download incomplete");
                }
                let status = self.board.station_mut(station);
                status.faults.skipped_records += skipped as u64;
                status.last_dump = Some(DumpSummary {
                    outcome,
                    records,
                    skipped,
                    at: Utc::now(),
                });
                for readout in self.assembler.dump_finished(station, outcome) {
                    self.process(readout).await;
                }
            }
            Ingest::Link { station, event } => self.on_link(station, event),
            Ingest::Fault { station, fault } => {
                warn!(station = %station, fault = ?fault, "station data lost");
                self.board.station_mut(station).faults.record(fault);
            }
            Ingest::Identified { station, info } => {
                info!(station = %station, code = %info.code, mode = ?info.mode, "station identified");
                self.board.station_mut(station).info = Some(info);
            }
            Ingest::Closed { station } => {
                self.flush_queue().await;
                let status = self.board.station_mut(station);
                let lost = status.link == LinkState::Lost;
                status.link = LinkState::Closed;
                debug!(station = %station, lost, "station closed");
                for readout in self.assembler.station_closed(station, lost) {
                    self.process(readout).await;
                }
            }
        }
    }

    fn on_link(&mut self, station: StationId, event: ConnectionEvent) {
        let status = self.board.station_mut(station);
        match event {
            ConnectionEvent::Opened => {
                status.link = LinkState::Connected;
                status.last_error = None;
                info!(station = %station, "station connected");
            }
            ConnectionEvent::DataAvailable => status.last_frame_at = Some(Utc::now()),
            ConnectionEvent::Lost(reason) => {
                status.link = LinkState::Lost;
                status.link_losses += 1;
                status.last_error = Some(reason.clone());
                warn!(station = %station, reason = %reason, "station link lost");
                self.notify(OperatorNotice::LinkLost { station, reason });
            }
        }
    }

    async fn handle_control(&mut self, control: Control) {
        match control {
            Control::ListPending(reply) => {
                let _ = reply.send(self.pending.values().cloned().collect());
            }
            Control::Assign { id, run, reply } => {
                let result = self.assign(id, run).await;
                let _ = reply.send(result);
            }
            Control::Retry { id, reply } => {
                let result = self.retry(id).await;
                let _ = reply.send(result);
            }
        }
    }

    async fn on_tick(&mut self) {
        if !self.queue.is_empty() && self.last_input.elapsed() >= self.config.idle_flush {
            self.flush_queue().await;
        }
        for readout in self.assembler.expire(Instant::now()) {
            self.process(readout).await;
        }
        if self
            .checker
            .config()
            .close_of_course
            .is_some_and(|close| now() >= close)
        {
            let waiting: Vec<u64> = self
                .pending
                .values()
                .filter(|p| matches!(p.reason, PendingReason::AwaitingCloseOfCourse { .. }))
                .map(|p| p.id)
                .collect();
            for id in waiting {
                let _ = self.retry(id).await;
            }
        }
    }

    async fn feed(&mut self, punches: Vec<PunchEvent>) {
        let now = Instant::now();
        for punch in punches {
            if let Some(readout) = self.assembler.push(punch, now) {
                self.process(readout).await;
            }
        }
    }

    async fn flush_queue(&mut self) {
        let held = self.queue.flush();
        self.feed(held).await;
    }

    async fn process(&mut self, readout: Readout) -> Disposition {
        self.board.engine.readouts += 1;
        if !readout.read_errors.is_empty() {
            warn!(card = %readout.card_id, errors = ?readout.read_errors, "readout flagged");
            self.notify(OperatorNotice::ReadoutFlagged {
                card: readout.card_id,
                errors: readout.read_errors.iter().copied().collect(),
            });
        }
        self.resolve_and_publish(readout, None).await
    }

    async fn resolve_and_publish(&mut self, readout: Readout, id: Option<u64>) -> Disposition {
        let resolved = self
            .resolver
            .resolve(readout.card_id, self.config.stage, readout.last_time())
            .await;
        let run = match resolved {
            Ok(ResolveOutcome::Unique(run)) => run,
            Ok(ResolveOutcome::Unknown) => return self.park(readout, PendingReason::UnknownCard, id),
            Ok(ResolveOutcome::Ambiguous(candidates)) => {
                return self.park(readout, PendingReason::Ambiguous { candidates }, id);
            }
            Ok(ResolveOutcome::NotYetStarted(run)) => {
                return self.park(readout, PendingReason::NotYetStarted { run }, id);
            }
            Err(e) => {
                let message = e.to_string();
                return self.park(readout, PendingReason::DirectoryUnavailable { message }, id);
            }
        };

        if let Some(previous_finish) = self.rereads.conflict(run.run_id, readout.finish_time) {
            let finish = readout.finish_time;
            let reason = PendingReason::ConflictingRereads {
                run,
                previous_finish,
                finish,
            };
            return self.park(readout, reason, id);
        }
        self.check_and_publish(readout, run, id).await
    }

    async fn check_and_publish(
        &mut self,
        readout: Readout,
        run: CompetitorRef,
        id: Option<u64>,
    ) -> Disposition {
        let directory = self.resolver.directory().clone();
        let looked_up: Result<_, DirectoryError> = async {
            let course = directory.course(run.course_id).await?;
            let start = directory.start_info(run.run_id).await?;
            Ok((course, start))
        }
        .await;
        let (course, start) = match looked_up {
            Ok(found) => found,
            Err(e) => {
                let message = e.to_string();
                return self.park(readout, PendingReason::DirectoryUnavailable { message }, id);
            }
        };

        let result = match self.checker.check(&readout, &run, &course, &start, now()) {
            CheckOutcome::Checked(result) => result,
            CheckOutcome::AwaitingCloseOfCourse => {
                return self.park(readout, PendingReason::AwaitingCloseOfCourse { run }, id);
            }
        };

        let (run_id, status, card) = (result.run_id, result.status, result.card_id);
        let outcome = self.publisher.publish(result);
        let counters = &mut self.board.engine;
        match outcome {
            PublishOutcome::Stored | PublishOutcome::Replaced => {
                counters.results_published += 1;
                self.rereads.record(run_id, readout.finish_time);
            }
            PublishOutcome::Unchanged => {
                counters.results_unchanged += 1;
                self.rereads.record(run_id, readout.finish_time);
            }
            PublishOutcome::Stale => {
                self.notify(OperatorNotice::StaleResult { run_id, card });
            }
        }
        Disposition::Published {
            run_id,
            status,
            outcome,
        }
    }

    fn park(&mut self, readout: Readout, reason: PendingReason, id: Option<u64>) -> Disposition {
        let id = match id {
            Some(id) => id,
            None => {
                let counters = &mut self.board.engine;
                match reason {
                    PendingReason::UnknownCard => counters.unknown_cards += 1,
                    PendingReason::Ambiguous { .. } => counters.ambiguous_cards += 1,
                    PendingReason::NotYetStarted { .. } => counters.not_yet_started += 1,
                    PendingReason::ConflictingRereads { .. } => counters.conflicting_rereads += 1,
                    PendingReason::AwaitingCloseOfCourse { .. } => counters.awaiting_close += 1,
                    PendingReason::DirectoryUnavailable { .. } => counters.directory_errors += 1,
                }
                self.next_pending += 1;
                self.next_pending
            }
        };

        warn!(id, card = %readout.card_id, reason = ?reason, "readout needs an operator");
        self.notify(OperatorNotice::Pending {
            id,
            card: readout.card_id,
            reason: reason.clone(),
        });
        self.pending.insert(
            id,
            PendingReadout {
                id,
                reason: reason.clone(),
                readout,
                since: Utc::now(),
            },
        );
        self.board.engine.pending = self.pending.len();
        Disposition::Pending { id, reason }
    }

    async fn assign(&mut self, id: u64, run: RunId) -> Result<Disposition, PipelineError> {
        if !self.pending.contains_key(&id) {
            return Err(PipelineError::UnknownPending(id));
        }
        let competitor = self.resolver.directory().run(run).await?;
        let entry = self
            .pending
            .remove(&id)
            .ok_or(PipelineError::UnknownPending(id))?;
        self.board.engine.pending = self.pending.len();
        info!(id, run = %run, card = %entry.readout.card_id, "operator assigned readout");
        Ok(self.check_and_publish(entry.readout, competitor, Some(id)).await)
    }

    async fn retry(&mut self, id: u64) -> Result<Disposition, PipelineError> {
        let entry = self
            .pending
            .remove(&id)
            .ok_or(PipelineError::UnknownPending(id))?;
        self.board.engine.pending = self.pending.len();
        debug!(id, card = %entry.readout.card_id, "retrying pending readout");
        Ok(self.resolve_and_publish(entry.readout, Some(id)).await)
    }

    fn notify(&self, notice: OperatorNotice) {
        let _ = self.notices.send(notice);
    }

    fn publish_status(&mut self) {
        let engine = &mut self.board.engine;
        engine.duplicates = self.queue.duplicates() + self.assembler.duplicates();
        engine.empty_readouts = self.assembler.empty_dropped();
        engine.redundant_readouts = self.assembler.redundant_dropped();
        engine.stale_publishes = self.publisher.stale_count();
        engine.failed_deliveries = self.publisher.failed_deliveries();

        let board = &self.board;
        self.status.send_if_modified(|current| {
            if current == board {
                false
            } else {
                *current = board.clone();
                true
            }
        });
    }
}

/// Wall-clock time in station terms.
fn now() -> PunchTime {
    PunchTime::from_datetime(Local::now().naive_local())
}
