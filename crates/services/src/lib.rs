#![forbid(unsafe_code)]

pub mod activity;
pub mod clock;
pub mod error;
pub mod identity;
pub mod progress_service;
pub mod sessions;

pub use coursetime_core::Clock;

pub use activity::{ActivityService, Disposer};
pub use clock::SessionClock;
pub use error::{ReportError, StudyError};
pub use identity::{IdentityProvider, StaticIdentity};
pub use progress_service::{ProgressService, ResumeTarget};
pub use sessions::{CloseReason, ClosedSession, StudySession, StudySessionService};
