//! Directory error types.

use std::path::PathBuf;

use crate::domain::{CourseId, RunId};

/// Errors from the run directory collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// A run references a course the directory does not hold
    #[error("course {0} not found")]
    UnknownCourse(CourseId),

    /// No run record with this id
    #[error("run {0} not found")]
    UnknownRun(RunId),

    /// The backing store could not be reached
    #[error("directory unavailable: {0}")]
    Unavailable(String),

    /// A directory file could not be read or parsed
    #[error("failed to load {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },
}
