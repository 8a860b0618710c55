//! Domain error types.
//!
//! These errors represent validation failures in the domain layer. They are
//! distinct from protocol and transport errors.

use super::CourseId;

/// Domain-level validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Course has no controls
    #[error("course {0} must have at least one control")]
    EmptyCourse(CourseId),

    /// Card number failed validation
    #[error(transparent)]
    Card(#[from] super::InvalidCardId),

    /// Time failed validation
    #[error(transparent)]
    Time(#[from] super::TimeError),
}
