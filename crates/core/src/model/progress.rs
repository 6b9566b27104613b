use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("percent complete must be within [0, 100], got {0}")]
    InvalidPercent(f64),
}

//
// ─── PERCENT HELPERS ───────────────────────────────────────────────────────────
//

/// Share of `expected_secs` covered by `spent_secs`, capped at 100.
///
/// Returns 0 when `expected_secs` is zero; callers substitute a fallback
/// duration before reaching this point.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn percent_of(spent_secs: u64, expected_secs: u64) -> f64 {
    if expected_secs == 0 {
        return 0.0;
    }
    (spent_secs as f64 / expected_secs as f64 * 100.0).min(100.0)
}

/// Rounds a percentage to one decimal place for storage and display.
#[must_use]
pub fn round_percent(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

//
// ─── PROGRESS RECORD ───────────────────────────────────────────────────────────
//

/// Canonical per-learner progress on a single content unit.
///
/// Records are written as full replacements; two records with the same
/// `updated_at` describe the same snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    time_spent_secs: u64,
    percent_complete: f64,
    last_position_secs: u64,
    updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    /// A record for a unit the learner has never opened.
    #[must_use]
    pub fn empty(at: DateTime<Utc>) -> Self {
        Self {
            time_spent_secs: 0,
            percent_complete: 0.0,
            last_position_secs: 0,
            updated_at: at,
        }
    }

    /// Rehydrate a record from persisted storage.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::InvalidPercent` if the percentage is not finite or out of range.
    pub fn from_persisted(
        time_spent_secs: u64,
        percent_complete: f64,
        last_position_secs: u64,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, ProgressError> {
        if !percent_complete.is_finite() || !(0.0..=100.0).contains(&percent_complete) {
            return Err(ProgressError::InvalidPercent(percent_complete));
        }
        Ok(Self {
            time_spent_secs,
            percent_complete,
            last_position_secs,
            updated_at,
        })
    }

    /// Build a record from elapsed time against the unit's expected duration.
    ///
    /// The stored percentage is rounded to one decimal place.
    #[must_use]
    pub fn from_elapsed(
        time_spent_secs: u64,
        expected_secs: u64,
        last_position_secs: u64,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            time_spent_secs,
            percent_complete: round_percent(percent_of(time_spent_secs, expected_secs)),
            last_position_secs,
            updated_at,
        }
    }

    #[must_use]
    pub fn time_spent_secs(&self) -> u64 {
        self.time_spent_secs
    }

    #[must_use]
    pub fn percent_complete(&self) -> f64 {
        self.percent_complete
    }

    #[must_use]
    pub fn last_position_secs(&self) -> u64 {
        self.last_position_secs
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn percent_is_capped_and_rounded() {
        let record = ProgressRecord::from_elapsed(5_000, 3_600, 0, fixed_now());
        assert!((record.percent_complete() - 100.0).abs() < f64::EPSILON);

        // 3599 of 3600 s is stored as 100.0.
        let record = ProgressRecord::from_elapsed(3_599, 3_600, 0, fixed_now());
        assert!((record.percent_complete() - 100.0).abs() < f64::EPSILON);

        let record = ProgressRecord::from_elapsed(1_000, 3_000, 0, fixed_now());
        assert!((record.percent_complete() - 33.3).abs() < 1e-9);
    }

    #[test]
    fn zero_duration_yields_zero_percent() {
        assert!(percent_of(120, 0).abs() < f64::EPSILON);
    }

    #[test]
    fn from_persisted_rejects_out_of_range_percent() {
        let err = ProgressRecord::from_persisted(10, 120.0, 0, fixed_now()).unwrap_err();
        assert_eq!(err, ProgressError::InvalidPercent(120.0));
        assert!(ProgressRecord::from_persisted(10, f64::NAN, 0, fixed_now()).is_err());
    }
}
