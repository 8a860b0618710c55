//! Competitor Resolver.
//!
//! Maps a completed readout to the run it belongs to. Anything other than
//! exactly one started run is reported as-is; the resolver never guesses.

mod cache;
mod error;
mod json;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::domain::{
    CardId, CompetitorRef, CourseDefinition, CourseId, PunchTime, RunId, StageId, StartInfo,
};

pub use cache::{CacheConfig, CachedDirectory};
pub use error::DirectoryError;
pub use json::{DirectoryRun, JsonDirectory};

/// Read-only view of the storage layer's runs, courses and start list.
#[async_trait]
pub trait RunDirectory: Send + Sync {
    /// Live runs on `stage` registered with `card`.
    async fn runs_for_card(
        &self,
        card: CardId,
        stage: StageId,
    ) -> Result<Vec<CompetitorRef>, DirectoryError>;

    async fn run(&self, id: RunId) -> Result<CompetitorRef, DirectoryError>;

    async fn course(&self, id: CourseId) -> Result<Arc<CourseDefinition>, DirectoryError>;

    async fn start_info(&self, run: RunId) -> Result<StartInfo, DirectoryError>;
}

#[async_trait]
impl<D: RunDirectory + ?Sized> RunDirectory for Arc<D> {
    async fn runs_for_card(
        &self,
        card: CardId,
        stage: StageId,
    ) -> Result<Vec<CompetitorRef>, DirectoryError> {
        (**self).runs_for_card(card, stage).await
    }

    async fn run(&self, id: RunId) -> Result<CompetitorRef, DirectoryError> {
        (**self).run(id).await
    }

    async fn course(&self, id: CourseId) -> Result<Arc<CourseDefinition>, DirectoryError> {
        (**self).course(id).await
    }

    async fn start_info(&self, run: RunId) -> Result<StartInfo, DirectoryError> {
        (**self).start_info(run).await
    }
}

/// Result of resolving a card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "runs", rename_all = "snake_case")]
pub enum ResolveOutcome {
    Unique(CompetitorRef),
    /// Several live runs use this card.
    Ambiguous(Vec<CompetitorRef>),
    /// No run uses this card on the stage.
    Unknown,
    /// The only candidate's start is after every punch on the card.
    NotYetStarted(CompetitorRef),
}

/// Looks up which run a card belongs to.
pub struct CompetitorResolver {
    directory: Arc<dyn RunDirectory>,
}

impl CompetitorResolver {
    pub fn new(directory: Arc<dyn RunDirectory>) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &Arc<dyn RunDirectory> {
        &self.directory
    }

    /// Resolve `card` on `stage`. `last_punch` is the latest station time
    /// on the readout; a run scheduled to start after it cannot own it.
    pub async fn resolve(
        &self,
        card: CardId,
        stage: StageId,
        last_punch: Option<PunchTime>,
    ) -> Result<ResolveOutcome, DirectoryError> {
        let mut runs = self.directory.runs_for_card(card, stage).await?;
        let outcome = match runs.len() {
            0 => ResolveOutcome::Unknown,
            1 => {
                let run = runs.remove(0);
                let start = self.directory.start_info(run.run_id).await?;
                let not_started = match (start.scheduled_start, last_punch) {
                    (Some(scheduled), Some(last)) => scheduled > last,
                    _ => false,
                };
                if not_started {
                    ResolveOutcome::NotYetStarted(run)
                } else {
                    ResolveOutcome::Unique(run)
                }
            }
            _ => ResolveOutcome::Ambiguous(runs),
        };
        debug!(card = %card, stage = %stage, outcome = ?outcome, "resolved card");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CheckingMode;
    use chrono::{Duration, NaiveDate};

    fn time(s: &str) -> PunchTime {
        PunchTime::parse_hms(s, NaiveDate::from_ymd_opt(2026, 5, 9).unwrap()).unwrap()
    }

    fn run(id: u64, card: u32, start: Option<&str>) -> DirectoryRun {
        DirectoryRun {
            competitor: CompetitorRef {
                run_id: RunId(id),
                name: format!("runner {id}"),
                stage: StageId(1),
                leg: None,
                card_id: CardId::new(card).unwrap(),
                course_id: CourseId(1),
                not_competing: false,
                disqualified: false,
            },
            start: StartInfo {
                scheduled_start: start.map(time),
                handicap: Duration::zero(),
            },
        }
    }

    fn resolver(runs: Vec<DirectoryRun>) -> CompetitorResolver {
        let course = CourseDefinition::from_codes(CourseId(1), &[31], CheckingMode::Classic).unwrap();
        CompetitorResolver::new(Arc::new(JsonDirectory::new(runs, vec![course])))
    }

    fn card(n: u32) -> CardId {
        CardId::new(n).unwrap()
    }

    #[tokio::test]
    async fn shared_card_is_ambiguous() {
        let r = resolver(vec![run(1, 123, None), run(2, 123, None)]);
        let outcome = r.resolve(card(123), StageId(1), None).await.unwrap();
        let ResolveOutcome::Ambiguous(runs) = outcome else {
            panic!("expected ambiguous, got {outcome:?}");
        };
        assert_eq!(runs.len(), 2);
    }

    #[tokio::test]
    async fn unregistered_card_is_unknown() {
        let r = resolver(vec![run(1, 123, None)]);
        assert_eq!(
            r.resolve(card(999), StageId(1), None).await.unwrap(),
            ResolveOutcome::Unknown
        );
        assert_eq!(
            r.resolve(card(123), StageId(2), None).await.unwrap(),
            ResolveOutcome::Unknown
        );
    }

    #[tokio::test]
    async fn unique_when_started() {
        let r = resolver(vec![run(1, 123, Some("10:00:00"))]);
        let outcome = r
            .resolve(card(123), StageId(1), Some(time("10:30:00")))
            .await
            .unwrap();
        assert!(matches!(outcome, ResolveOutcome::Unique(ref c) if c.run_id == RunId(1)));
    }

    #[tokio::test]
    async fn punches_before_scheduled_start_not_yet_started() {
        let r = resolver(vec![run(1, 123, Some("11:00:00"))]);
        let outcome = r
            .resolve(card(123), StageId(1), Some(time("10:30:00")))
            .await
            .unwrap();
        assert!(matches!(outcome, ResolveOutcome::NotYetStarted(_)));
    }

    #[test]
    fn outcome_serializes_tagged() {
        let json = serde_json::to_value(ResolveOutcome::Unknown).unwrap();
        assert_eq!(json["outcome"], "unknown");
    }
}
