//! Shared error types for the services crate.

use thiserror::Error;

use coursetime_core::model::{FormationId, UnitId};
use storage::repository::StorageError;

/// Errors emitted while opening or driving a study session.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StudyError {
    #[error("no learner is signed in")]
    NoLearner,
    #[error("course {0} is not in the catalog")]
    UnknownUnit(UnitId),
    #[error("the learner session has already ended")]
    SessionEnded,
    #[error("study session is closed")]
    SessionClosed,
    #[error("study session task failed: {0}")]
    Runner(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `ProgressService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReportError {
    #[error("formation {0} is not in the catalog")]
    UnknownFormation(FormationId),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
