use std::sync::Arc;
use std::time::Duration;

use coursetime_core::activity::ActivityPhase;
use coursetime_core::counter::ElapsedTimeCounter;
use coursetime_core::model::{Catalog, ProgressRecord, UnitId};
use coursetime_core::settings::TimerSettings;
use storage::repository::{LastOpened, LastOpenedRepository, ProgressRepository};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::activity::ActivityService;
use crate::clock::SessionClock;
use crate::error::StudyError;
use crate::identity::IdentityProvider;

use super::runner::{ClosedSession, Command, SessionRunner};

const COMMAND_BUFFER: usize = 16;

//
// ─── SERVICE ───────────────────────────────────────────────────────────────────
//

/// Opens study sessions on catalog units.
#[derive(Clone)]
pub struct StudySessionService {
    clock: SessionClock,
    settings: TimerSettings,
    catalog: Arc<Catalog>,
    progress: Arc<dyn ProgressRepository>,
    last_opened: Arc<dyn LastOpenedRepository>,
    identity: Arc<dyn IdentityProvider>,
}

impl StudySessionService {
    #[must_use]
    pub fn new(
        clock: SessionClock,
        settings: TimerSettings,
        catalog: Arc<Catalog>,
        progress: Arc<dyn ProgressRepository>,
        last_opened: Arc<dyn LastOpenedRepository>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            clock,
            settings,
            catalog,
            progress,
            last_opened,
            identity,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &TimerSettings {
        &self.settings
    }

    /// Opens a unit and starts counting time on it.
    ///
    /// The persisted record is read before the counter starts, so the session
    /// resumes from the stored time. The unit also becomes the learner's
    /// last-opened unit in its formation.
    ///
    /// # Errors
    ///
    /// Returns `StudyError::NoLearner` without a signed-in learner,
    /// `StudyError::UnknownUnit` for a unit missing from the catalog,
    /// `StudyError::SessionEnded` after a forced logout, and
    /// `StudyError::Storage` when the stored progress cannot be read.
    pub async fn open(
        &self,
        unit_id: UnitId,
        activity: &ActivityService,
    ) -> Result<StudySession, StudyError> {
        let learner = self
            .identity
            .current_learner_id()
            .ok_or(StudyError::NoLearner)?;
        let unit = self
            .catalog
            .get_content_unit(unit_id)
            .ok_or(StudyError::UnknownUnit(unit_id))?;
        let activity_rx = activity.subscribe();
        let flush_guard = activity
            .register_session()
            .ok_or(StudyError::SessionEnded)?;
        let phase = activity_rx.borrow().phase;
        if phase == ActivityPhase::ForcedLogout {
            return Err(StudyError::SessionEnded);
        }

        // A failed read must not start from zero: the first flush would erase the stored time.
        let persisted = self.progress.read_progress(learner, unit_id).await?;

        let now = self.clock.now();
        let formation = unit.formation_id();
        let last = LastOpened {
            unit_id,
            opened_at: now,
        };
        if let Err(err) = self
            .last_opened
            .write_last_opened(learner, formation, last)
            .await
        {
            warn!(unit = %unit_id, %formation, error = %err, "failed to record last opened unit");
        }

        let mut counter = ElapsedTimeCounter::open(unit, persisted, &self.settings, now);
        if phase == ActivityPhase::WarningWindow {
            counter.pause(now);
        }
        info!(
            %learner,
            unit = %unit_id,
            resumed_from = counter.opened_with_secs(),
            expected = counter.expected_duration_secs(),
            "study session opened"
        );

        let (snapshot_tx, snapshot_rx) = watch::channel(counter.record().clone());
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let expected_duration_secs = counter.expected_duration_secs();
        let runner = SessionRunner {
            learner,
            counter,
            clock: self.clock,
            tick_interval: Duration::from_secs(u64::from(self.settings.tick_interval_secs())),
            progress: Arc::clone(&self.progress),
            snapshot: snapshot_tx,
            flush_guard,
        };
        let task = tokio::spawn(runner.run(activity_rx, commands_rx));

        Ok(StudySession {
            unit_id,
            expected_duration_secs,
            commands: commands_tx,
            snapshot: snapshot_rx,
            task,
        })
    }
}

//
// ─── HANDLE ────────────────────────────────────────────────────────────────────
//

/// Handle on an open unit.
///
/// Dropping the handle closes the session in the background with a final flush.
#[derive(Debug)]
pub struct StudySession {
    unit_id: UnitId,
    expected_duration_secs: u64,
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<ProgressRecord>,
    task: JoinHandle<ClosedSession>,
}

impl StudySession {
    #[must_use]
    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    /// Duration used for the completion percentage, after the default fallback.
    #[must_use]
    pub fn expected_duration_secs(&self) -> u64 {
        self.expected_duration_secs
    }

    /// Latest in-memory progress of the unit.
    #[must_use]
    pub fn progress(&self) -> ProgressRecord {
        self.snapshot.borrow().clone()
    }

    /// Live progress updates, one per tick while counting.
    #[must_use]
    pub fn watch_progress(&self) -> watch::Receiver<ProgressRecord> {
        self.snapshot.clone()
    }

    /// True once the session stopped on its own (forced logout).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Reports the media position, which becomes the time spent on the unit.
    ///
    /// # Errors
    ///
    /// Returns `StudyError::SessionClosed` if the session already stopped.
    pub async fn report_position(&self, position_secs: u64) -> Result<(), StudyError> {
        self.commands
            .send(Command::ReportPosition(position_secs))
            .await
            .map_err(|_| StudyError::SessionClosed)
    }

    /// Stops counting and writes the final record.
    ///
    /// A session that already ended on a forced logout returns its final state.
    ///
    /// # Errors
    ///
    /// Returns `StudyError::Runner` if the session task panicked or was cancelled.
    pub async fn close(self) -> Result<ClosedSession, StudyError> {
        // A send error means the runner already stopped; its result is in the task.
        let _ = self.commands.send(Command::Close).await;
        self.task
            .await
            .map_err(|err| StudyError::Runner(err.to_string()))
    }

    /// Waits until the session stops without asking it to.
    ///
    /// # Errors
    ///
    /// Returns `StudyError::Runner` if the session task panicked or was cancelled.
    pub async fn finished(self) -> Result<ClosedSession, StudyError> {
        let Self { commands, task, .. } = self;
        let closed = task.await;
        drop(commands);
        closed.map_err(|err| StudyError::Runner(err.to_string()))
    }
}
