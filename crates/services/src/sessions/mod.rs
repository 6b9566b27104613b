mod runner;
mod service;

// Public API of the study session subsystem.
pub use crate::error::StudyError;
pub use runner::{CloseReason, ClosedSession};
pub use service::{StudySession, StudySessionService};
