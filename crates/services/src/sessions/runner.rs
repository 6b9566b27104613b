use std::sync::Arc;
use std::time::Duration;

use coursetime_core::activity::{ActivityPhase, ActivityState};
use coursetime_core::counter::ElapsedTimeCounter;
use coursetime_core::model::{LearnerId, ProgressRecord, UnitId};
use storage::repository::{ProgressRepository, WriteOutcome};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::activity::FlushGuard;
use crate::clock::SessionClock;

/// Requests sent from a `StudySession` handle to its runner task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Command {
    ReportPosition(u64),
    Close,
}

/// Why a study session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The learner navigated away.
    Closed,
    /// The inactivity timeout ended the learner session.
    ForcedLogout,
    /// The handle was dropped without an explicit close.
    HandleDropped,
}

/// Final state of a study session.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedSession {
    pub unit_id: UnitId,
    pub record: ProgressRecord,
    pub reason: CloseReason,
    /// False when the final write failed; the record is then only in memory.
    pub persisted: bool,
}

/// Owns the counter of one open unit and drives it from the tick interval,
/// activity changes and handle commands.
pub(super) struct SessionRunner {
    pub(super) learner: LearnerId,
    pub(super) counter: ElapsedTimeCounter,
    pub(super) clock: SessionClock,
    pub(super) tick_interval: Duration,
    pub(super) progress: Arc<dyn ProgressRepository>,
    pub(super) snapshot: watch::Sender<ProgressRecord>,
    /// Released after the final write; a forced logout waits for it.
    pub(super) flush_guard: FlushGuard,
}

impl SessionRunner {
    pub(super) async fn run(
        mut self,
        mut activity: watch::Receiver<ActivityState>,
        mut commands: mpsc::Receiver<Command>,
    ) -> ClosedSession {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.tick_interval, self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut activity_open = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(),
                changed = activity.changed(), if activity_open => {
                    if changed.is_err() {
                        debug!(unit = %self.counter.unit_id(), "activity feed closed");
                        activity_open = false;
                        continue;
                    }
                    let phase = activity.borrow_and_update().phase;
                    let now = self.clock.now();
                    match phase {
                        ActivityPhase::Active => self.counter.resume(now),
                        ActivityPhase::WarningWindow => self.counter.pause(now),
                        ActivityPhase::ForcedLogout => {
                            return self.finish(CloseReason::ForcedLogout).await;
                        }
                    }
                    self.publish();
                }
                command = commands.recv() => match command {
                    Some(Command::ReportPosition(position_secs)) => {
                        self.counter.report_position(position_secs, self.clock.now());
                        self.publish();
                    }
                    Some(Command::Close) => return self.finish(CloseReason::Closed).await,
                    None => return self.finish(CloseReason::HandleDropped).await,
                },
            }
        }
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.counter.record().clone());
    }

    fn tick(&mut self) {
        let now = self.clock.now();
        self.counter.tick(now);
        self.publish();

        if self.counter.flush_due(now) {
            let record = self.counter.take_flush(now);
            let progress = Arc::clone(&self.progress);
            let learner = self.learner;
            let unit = self.counter.unit_id();
            // Periodic flushes do not block the tick loop; stale ones are dropped by the store.
            tokio::spawn(async move {
                match progress.write_progress(learner, unit, &record).await {
                    Ok(WriteOutcome::Applied) => {
                        debug!(%unit, spent = record.time_spent_secs(), "progress flushed");
                    }
                    Ok(WriteOutcome::Stale) => debug!(%unit, "periodic flush superseded"),
                    Err(err) => warn!(%unit, error = %err, "periodic progress flush failed"),
                }
            });
        }
    }

    async fn finish(self, reason: CloseReason) -> ClosedSession {
        let now = self.clock.now();
        let unit_id = self.counter.unit_id();
        let record = self.counter.close(now);
        self.snapshot.send_replace(record.clone());

        let persisted = match self
            .progress
            .write_progress(self.learner, unit_id, &record)
            .await
        {
            Ok(_) => true,
            Err(err) => {
                warn!(unit = %unit_id, error = %err, "final progress flush failed");
                false
            }
        };
        info!(
            unit = %unit_id,
            spent = record.time_spent_secs(),
            percent = record.percent_complete(),
            ?reason,
            "study session closed"
        );

        drop(self.flush_guard);

        ClosedSession {
            unit_id,
            record,
            reason,
            persisted,
        }
    }
}
