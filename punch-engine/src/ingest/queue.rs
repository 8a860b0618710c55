//! Reorder buffer in front of the assembler.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use chrono::Duration;

use crate::domain::{PunchEvent, PunchTime};

use super::dedup::DedupWindow;

/// Tuning for [`IngestionQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Punches of one card/control closer than this are one punch.
    pub dedup_tolerance: Duration,
    /// How far behind the newest station time a punch is held back, so
    /// that a late arrival from a slower link can still be placed first.
    pub reorder_window: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            dedup_tolerance: Duration::seconds(2),
            reorder_window: Duration::milliseconds(500),
        }
    }
}

impl QueueConfig {
    pub fn with_dedup_tolerance(mut self, tolerance: Duration) -> Self {
        self.dedup_tolerance = tolerance;
        self
    }

    pub fn with_reorder_window(mut self, window: Duration) -> Self {
        self.reorder_window = window;
        self
    }
}

/// Result of offering a punch to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    Duplicate,
}

#[derive(Debug)]
struct Held {
    arrival: u64,
    event: PunchEvent,
}

impl Held {
    fn key(&self) -> (PunchTime, u64) {
        (self.event.timestamp, self.arrival)
    }
}

impl PartialEq for Held {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Held {}

impl PartialOrd for Held {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Held {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Orders punches by station time (ties by arrival) and drops bounces
/// before they reach the assembler.
#[derive(Debug)]
pub struct IngestionQueue {
    config: QueueConfig,
    heap: BinaryHeap<Reverse<Held>>,
    dedup: DedupWindow,
    arrivals: u64,
    newest: Option<PunchTime>,
    duplicates: u64,
}

impl IngestionQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            heap: BinaryHeap::new(),
            dedup: DedupWindow::new(config.dedup_tolerance),
            arrivals: 0,
            newest: None,
            duplicates: 0,
        }
    }

    /// Offer a punch. Duplicates are counted and discarded.
    pub fn push(&mut self, event: PunchEvent) -> PushOutcome {
        if !self.dedup.admit(&event) {
            self.duplicates += 1;
            return PushOutcome::Duplicate;
        }
        self.newest = Some(match self.newest {
            Some(t) => t.max(event.timestamp),
            None => event.timestamp,
        });
        self.arrivals += 1;
        self.heap.push(Reverse(Held {
            arrival: self.arrivals,
            event,
        }));
        PushOutcome::Queued
    }

    /// Release punches that are older than the reorder window relative to
    /// the newest station time seen.
    pub fn drain_ready(&mut self) -> Vec<PunchEvent> {
        let Some(cutoff) = self
            .newest
            .and_then(|t| t.checked_sub(self.config.reorder_window))
        else {
            return Vec::new();
        };
        let mut ready = Vec::new();
        while self
            .heap
            .peek()
            .is_some_and(|Reverse(h)| h.event.timestamp <= cutoff)
        {
            if let Some(Reverse(held)) = self.heap.pop() {
                ready.push(held.event);
            }
        }
        ready
    }

    /// Release everything held, in order.
    pub fn flush(&mut self) -> Vec<PunchEvent> {
        let mut all = Vec::with_capacity(self.heap.len());
        while let Some(Reverse(held)) = self.heap.pop() {
            all.push(held.event);
        }
        all
    }

    /// Punches currently held back.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Duplicates discarded so far.
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::domain::{CardId, ControlCode, StationId};
    use chrono::NaiveDate;
    use proptest::prelude::*;

    proptest! {
        /// Arrivals late by less than the window come out in station-time order
        #[test]
        fn output_is_time_ordered(
            mut base in proptest::collection::vec(0i64..600_000, 1..60),
            jitter in proptest::collection::vec(0i64..400, 60),
        ) {
            base.sort_unstable();
            let date = NaiveDate::from_ymd_opt(2026, 5, 9).unwrap();
            let start = PunchTime::parse_hms("10:00:00", date).unwrap();
            let mut q = IngestionQueue::new(QueueConfig::default());
            let mut out = Vec::new();
            for (i, ms) in base.iter().enumerate() {
                let ts = start.checked_add(Duration::milliseconds(ms + jitter[i])).unwrap();
                let card = CardId::new(1000 + i as u32).unwrap();
                q.push(PunchEvent::control(card, ControlCode(31), ts, StationId(1), 0));
                out.extend(q.drain_ready());
            }
            out.extend(q.flush());
            prop_assert_eq!(out.len(), base.len());
            for pair in out.windows(2) {
                prop_assert!(pair[0].timestamp <= pair[1].timestamp);
            }
        }
    }
}
