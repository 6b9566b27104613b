//! Resumable elapsed-time counter for one open content unit.

use chrono::{DateTime, Utc};

use crate::model::{ContentUnit, ProgressRecord, UnitId};
use crate::settings::TimerSettings;
use crate::time::{secs, whole_secs_between};

/// Timing anchors of an open unit.
///
/// Elapsed time is `now - reference_start`, frozen at `paused_at` while paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimerState {
    reference_start: DateTime<Utc>,
    paused_at: Option<DateTime<Utc>>,
}

impl SessionTimerState {
    /// Anchors the timer so that `elapsed(now) == already_spent_secs`.
    #[must_use]
    pub fn resume_from(already_spent_secs: u64, now: DateTime<Utc>) -> Self {
        Self {
            reference_start: now - secs(already_spent_secs),
            paused_at: None,
        }
    }

    #[must_use]
    pub fn reference_start(&self) -> DateTime<Utc> {
        self.reference_start
    }

    #[must_use]
    pub fn paused_at(&self) -> Option<DateTime<Utc>> {
        self.paused_at
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    #[must_use]
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> u64 {
        whole_secs_between(self.reference_start, self.paused_at.unwrap_or(now))
    }

    /// Returns false if already paused.
    pub fn pause(&mut self, now: DateTime<Utc>) -> bool {
        if self.paused_at.is_some() {
            return false;
        }
        self.paused_at = Some(now);
        true
    }

    /// Shifts the anchor forward by the pause length. Returns false if not paused.
    pub fn resume(&mut self, now: DateTime<Utc>) -> bool {
        let Some(paused_at) = self.paused_at.take() else {
            return false;
        };
        if now > paused_at {
            self.reference_start += now - paused_at;
        }
        true
    }

    /// Re-anchors on an externally reported position, keeping the pause state.
    pub fn reanchor(&mut self, position_secs: u64, now: DateTime<Utc>) {
        self.reference_start = now - secs(position_secs);
        if self.paused_at.is_some() {
            self.paused_at = Some(now);
        }
    }
}

/// Accumulates active time on a single unit and produces progress snapshots.
///
/// The counter never writes anywhere: callers pull snapshots with `tick`,
/// `take_flush` and `close` and persist them.
#[derive(Debug, Clone)]
pub struct ElapsedTimeCounter {
    unit_id: UnitId,
    expected_duration_secs: u64,
    flush_interval: chrono::Duration,
    timer: SessionTimerState,
    record: ProgressRecord,
    opened_with_secs: u64,
    last_flush_at: DateTime<Utc>,
}

impl ElapsedTimeCounter {
    /// Opens a unit, resuming from the persisted record if there is one.
    ///
    /// A unit without duration metadata falls back to the configured default.
    #[must_use]
    pub fn open(
        unit: &ContentUnit,
        persisted: Option<ProgressRecord>,
        settings: &TimerSettings,
        now: DateTime<Utc>,
    ) -> Self {
        let expected_duration_secs = match unit.expected_duration_secs() {
            0 => settings.default_unit_duration_secs(),
            known => known,
        };
        let record = persisted.unwrap_or_else(|| ProgressRecord::empty(now));
        let opened_with_secs = record.time_spent_secs();

        Self {
            unit_id: unit.id(),
            expected_duration_secs,
            flush_interval: settings.flush_interval(),
            timer: SessionTimerState::resume_from(opened_with_secs, now),
            record,
            opened_with_secs,
            last_flush_at: now,
        }
    }

    #[must_use]
    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    #[must_use]
    pub fn expected_duration_secs(&self) -> u64 {
        self.expected_duration_secs
    }

    #[must_use]
    pub fn timer(&self) -> &SessionTimerState {
        &self.timer
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.timer.is_paused()
    }

    /// Time spent as last read from storage when the unit was opened.
    #[must_use]
    pub fn opened_with_secs(&self) -> u64 {
        self.opened_with_secs
    }

    #[must_use]
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> u64 {
        self.timer.elapsed_secs(now)
    }

    /// Latest in-memory record.
    #[must_use]
    pub fn record(&self) -> &ProgressRecord {
        &self.record
    }

    /// Recomputes the in-memory record. Paused counters keep their record untouched.
    pub fn tick(&mut self, now: DateTime<Utc>) -> &ProgressRecord {
        if !self.timer.is_paused() {
            self.refresh(now);
        }
        &self.record
    }

    pub fn pause(&mut self, now: DateTime<Utc>) {
        if self.timer.pause(now) {
            self.refresh(now);
        }
    }

    /// Resumes counting. The flush interval is measured in active time, so it
    /// moves forward by the pause length too.
    pub fn resume(&mut self, now: DateTime<Utc>) {
        let Some(paused_at) = self.timer.paused_at() else {
            return;
        };
        if self.timer.resume(now) && now > paused_at {
            self.last_flush_at += now - paused_at;
        }
    }

    /// External position report (e.g. a scrub): re-anchors the timer on it.
    pub fn report_position(&mut self, position_secs: u64, now: DateTime<Utc>) {
        self.timer.reanchor(position_secs, now);
        self.record = ProgressRecord::from_elapsed(
            position_secs,
            self.expected_duration_secs,
            position_secs,
            now,
        );
    }

    /// True when an active counter has gone a full flush interval without a write.
    #[must_use]
    pub fn flush_due(&self, now: DateTime<Utc>) -> bool {
        !self.timer.is_paused() && now - self.last_flush_at >= self.flush_interval
    }

    /// Snapshot to hand to the store; restarts the flush interval.
    pub fn take_flush(&mut self, now: DateTime<Utc>) -> ProgressRecord {
        self.tick(now);
        self.last_flush_at = now;
        self.record.clone()
    }

    /// Final snapshot. Consuming the counter rules out ticks after close.
    #[must_use]
    pub fn close(mut self, now: DateTime<Utc>) -> ProgressRecord {
        if !self.timer.is_paused() {
            self.refresh(now);
        }
        self.record
    }

    fn refresh(&mut self, now: DateTime<Utc>) {
        let elapsed = self.timer.elapsed_secs(now);
        self.record = ProgressRecord::from_elapsed(
            elapsed,
            self.expected_duration_secs,
            self.record.last_position_secs(),
            now,
        );
    }
}
