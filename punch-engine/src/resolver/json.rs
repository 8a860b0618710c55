//! File-backed run directory.
//!
//! Loads runs and courses from a single JSON document so the engine can
//! run without the storage service:
//!
//! ```json
//! {
//!   "runs": [
//!     {"run_id": 1, "stage": 1, "card_id": 7203463, "course_id": 2,
//!      "start": {"scheduled_start": "2026-05-09T10:00:00"}}
//!   ],
//!   "courses": [{"id": 2, "controls": [{"code": 31}, {"code": 32}]}]
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::domain::{
    CardId, CompetitorRef, CourseDefinition, CourseId, RunId, StageId, StartInfo,
};

use super::{DirectoryError, RunDirectory};

/// One run as stored in the file.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryRun {
    #[serde(flatten)]
    pub competitor: CompetitorRef,
    #[serde(default)]
    pub start: StartInfo,
}

#[derive(Debug, Deserialize)]
struct DirectoryFile {
    #[serde(default)]
    runs: Vec<DirectoryRun>,
    #[serde(default)]
    courses: Vec<CourseDefinition>,
}

/// Read-only directory held in memory.
#[derive(Debug, Clone)]
pub struct JsonDirectory {
    runs: HashMap<RunId, DirectoryRun>,
    courses: HashMap<CourseId, Arc<CourseDefinition>>,
}

impl JsonDirectory {
    pub fn new(runs: Vec<DirectoryRun>, courses: Vec<CourseDefinition>) -> Self {
        Self {
            runs: runs
                .into_iter()
                .map(|r| (r.competitor.run_id, r))
                .collect(),
            courses: courses
                .into_iter()
                .map(|c| (c.id(), Arc::new(c)))
                .collect(),
        }
    }

    /// Load a directory file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        let path = path.as_ref();
        let load_error = |reason: String| DirectoryError::Load {
            path: path.to_path_buf(),
            reason,
        };

        let json = std::fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
        let file: DirectoryFile =
            serde_json::from_str(&json).map_err(|e| load_error(e.to_string()))?;

        let directory = Self::new(file.runs, file.courses);
        if let Some(run) = directory
            .runs
            .values()
            .find(|r| !directory.courses.contains_key(&r.competitor.course_id))
        {
            return Err(load_error(format!(
                "run {} references unknown course {}",
                run.competitor.run_id, run.competitor.course_id
            )));
        }

        info!(
            path = %path.display(),
            runs = directory.runs.len(),
            courses = directory.courses.len(),
            "loaded run directory"
        );
        Ok(directory)
    }
}

#[async_trait]
impl RunDirectory for JsonDirectory {
    async fn runs_for_card(
        &self,
        card: CardId,
        stage: StageId,
    ) -> Result<Vec<CompetitorRef>, DirectoryError> {
        let mut runs: Vec<CompetitorRef> = self
            .runs
            .values()
            .filter(|r| r.competitor.card_id == card && r.competitor.stage == stage)
            .map(|r| r.competitor.clone())
            .collect();
        runs.sort_by_key(|r| r.run_id);
        Ok(runs)
    }

    async fn run(&self, id: RunId) -> Result<CompetitorRef, DirectoryError> {
        self.runs
            .get(&id)
            .map(|r| r.competitor.clone())
            .ok_or(DirectoryError::UnknownRun(id))
    }

    async fn course(&self, id: CourseId) -> Result<Arc<CourseDefinition>, DirectoryError> {
        self.courses
            .get(&id)
            .cloned()
            .ok_or(DirectoryError::UnknownCourse(id))
    }

    async fn start_info(&self, run: RunId) -> Result<StartInfo, DirectoryError> {
        self.runs
            .get(&run)
            .map(|r| r.start)
            .ok_or(DirectoryError::UnknownRun(run))
    }
}
