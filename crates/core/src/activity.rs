//! Learner presence tracking.
//!
//! `ActivityMonitor` is a pure state machine: every call takes the current
//! instant, so the runtime that drives it decides how time flows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::settings::ActivitySettings;

/// Interaction categories that count as proof of presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    PointerDown,
    PointerMove,
    KeyDown,
    Scroll,
    TouchStart,
    Click,
    Wheel,
}

impl InteractionKind {
    pub const ALL: [InteractionKind; 7] = [
        InteractionKind::PointerDown,
        InteractionKind::PointerMove,
        InteractionKind::KeyDown,
        InteractionKind::Scroll,
        InteractionKind::TouchStart,
        InteractionKind::Click,
        InteractionKind::Wheel,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityPhase {
    Active,
    WarningWindow,
    /// Terminal for the session.
    ForcedLogout,
}

/// Observable snapshot of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityState {
    pub phase: ActivityPhase,
    pub last_activity_at: DateTime<Utc>,
    pub is_active: bool,
    /// Only set while the warning countdown runs.
    pub time_until_forced_logout_ms: Option<u64>,
}

/// Phase change reported by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityTransition {
    /// Inactive: the warning countdown started.
    WarningStarted,
    /// Back to active after a warning.
    Resumed,
    ForcedLogout,
}

#[derive(Debug, Clone)]
pub struct ActivityMonitor {
    settings: ActivitySettings,
    phase: ActivityPhase,
    last_activity_at: DateTime<Utc>,
}

impl ActivityMonitor {
    /// Starts in the active phase, as if the learner just interacted.
    #[must_use]
    pub fn new(settings: ActivitySettings, now: DateTime<Utc>) -> Self {
        Self {
            settings,
            phase: ActivityPhase::Active,
            last_activity_at: now,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &ActivitySettings {
        &self.settings
    }

    #[must_use]
    pub fn phase(&self) -> ActivityPhase {
        self.phase
    }

    #[must_use]
    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    /// When the warning window opens if nothing else happens.
    #[must_use]
    pub fn warning_at(&self) -> DateTime<Utc> {
        self.last_activity_at + self.settings.warning_delay()
    }

    #[must_use]
    pub fn forced_logout_at(&self) -> DateTime<Utc> {
        self.last_activity_at + self.settings.inactivity_timeout()
    }

    /// Registers a qualifying interaction.
    ///
    /// The inactivity delay restarts from `now`. Ignored once logged out.
    pub fn record(
        &mut self,
        _kind: InteractionKind,
        now: DateTime<Utc>,
    ) -> Option<ActivityTransition> {
        self.reset(now)
    }

    /// Explicit "stay active" from the warning prompt; same effect as an interaction.
    pub fn stay_active(&mut self, now: DateTime<Utc>) -> Option<ActivityTransition> {
        self.reset(now)
    }

    fn reset(&mut self, now: DateTime<Utc>) -> Option<ActivityTransition> {
        match self.phase {
            ActivityPhase::ForcedLogout => None,
            ActivityPhase::Active => {
                self.last_activity_at = self.last_activity_at.max(now);
                None
            }
            ActivityPhase::WarningWindow => {
                self.last_activity_at = self.last_activity_at.max(now);
                self.phase = ActivityPhase::Active;
                Some(ActivityTransition::Resumed)
            }
        }
    }

    /// Advances the state machine to `now`.
    ///
    /// A late poll past the full timeout goes straight to `ForcedLogout`.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Option<ActivityTransition> {
        match self.phase {
            ActivityPhase::ForcedLogout => None,
            ActivityPhase::Active | ActivityPhase::WarningWindow
                if now >= self.forced_logout_at() =>
            {
                self.phase = ActivityPhase::ForcedLogout;
                Some(ActivityTransition::ForcedLogout)
            }
            ActivityPhase::Active if now >= self.warning_at() => {
                self.phase = ActivityPhase::WarningWindow;
                Some(ActivityTransition::WarningStarted)
            }
            ActivityPhase::Active | ActivityPhase::WarningWindow => None,
        }
    }

    #[must_use]
    pub fn state(&self, now: DateTime<Utc>) -> ActivityState {
        let time_until_forced_logout_ms = match self.phase {
            ActivityPhase::WarningWindow => Some(
                u64::try_from((self.forced_logout_at() - now).num_milliseconds()).unwrap_or(0),
            ),
            ActivityPhase::ForcedLogout => Some(0),
            ActivityPhase::Active => None,
        };
        ActivityState {
            phase: self.phase,
            last_activity_at: self.last_activity_at,
            is_active: self.phase == ActivityPhase::Active,
            time_until_forced_logout_ms,
        }
    }
}
