use chrono::Duration;
use thiserror::Error;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("inactivity timeout must be > 0")]
    InvalidInactivityTimeout,

    #[error("warning window must be > 0 and shorter than the inactivity timeout")]
    InvalidWarningWindow,

    #[error("tick interval must be > 0")]
    InvalidTickInterval,

    #[error("flush interval must be >= the tick interval")]
    InvalidFlushInterval,

    #[error("default course duration must be > 0")]
    InvalidDefaultDuration,
}

//
// ─── ACTIVITY ──────────────────────────────────────────────────────────────────
//

/// Inactivity detection knobs.
///
/// The warning window opens at `inactivity_timeout - warning_window` after the
/// last qualifying interaction and the session ends at `inactivity_timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivitySettings {
    inactivity_timeout_secs: u32,
    warning_window_secs: u32,
}

impl ActivitySettings {
    /// # Errors
    ///
    /// Returns `SettingsError` if the timeout is zero or the warning window does not fit inside it.
    pub fn new(
        inactivity_timeout_secs: u32,
        warning_window_secs: u32,
    ) -> Result<Self, SettingsError> {
        if inactivity_timeout_secs == 0 {
            return Err(SettingsError::InvalidInactivityTimeout);
        }
        if warning_window_secs == 0 || warning_window_secs >= inactivity_timeout_secs {
            return Err(SettingsError::InvalidWarningWindow);
        }
        Ok(Self {
            inactivity_timeout_secs,
            warning_window_secs,
        })
    }

    #[must_use]
    pub fn inactivity_timeout_secs(&self) -> u32 {
        self.inactivity_timeout_secs
    }

    #[must_use]
    pub fn warning_window_secs(&self) -> u32 {
        self.warning_window_secs
    }

    #[must_use]
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::seconds(i64::from(self.inactivity_timeout_secs))
    }

    #[must_use]
    pub fn warning_window(&self) -> Duration {
        Duration::seconds(i64::from(self.warning_window_secs))
    }

    /// Idle time after which the warning window opens.
    #[must_use]
    pub fn warning_delay(&self) -> Duration {
        self.inactivity_timeout() - self.warning_window()
    }
}

impl Default for ActivitySettings {
    /// 15 minute timeout with a 30 second warning.
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: 15 * 60,
            warning_window_secs: 30,
        }
    }
}

//
// ─── TIMER ─────────────────────────────────────────────────────────────────────
//

/// Elapsed-time counter knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSettings {
    tick_interval_secs: u32,
    flush_interval_secs: u32,
    default_unit_duration_secs: u64,
}

impl TimerSettings {
    /// # Errors
    ///
    /// Returns `SettingsError` if any interval is zero or the flush interval is shorter than a tick.
    pub fn new(
        tick_interval_secs: u32,
        flush_interval_secs: u32,
        default_unit_duration_secs: u64,
    ) -> Result<Self, SettingsError> {
        if tick_interval_secs == 0 {
            return Err(SettingsError::InvalidTickInterval);
        }
        if flush_interval_secs < tick_interval_secs {
            return Err(SettingsError::InvalidFlushInterval);
        }
        if default_unit_duration_secs == 0 {
            return Err(SettingsError::InvalidDefaultDuration);
        }
        Ok(Self {
            tick_interval_secs,
            flush_interval_secs,
            default_unit_duration_secs,
        })
    }

    #[must_use]
    pub fn tick_interval_secs(&self) -> u32 {
        self.tick_interval_secs
    }

    #[must_use]
    pub fn flush_interval_secs(&self) -> u32 {
        self.flush_interval_secs
    }

    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::seconds(i64::from(self.flush_interval_secs))
    }

    /// Duration substituted when the catalog has none for a course.
    #[must_use]
    pub fn default_unit_duration_secs(&self) -> u64 {
        self.default_unit_duration_secs
    }
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: 1,
            flush_interval_secs: 30,
            default_unit_duration_secs: 3_600,
        }
    }
}
