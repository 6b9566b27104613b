use chrono::{DateTime, Utc};
use coursetime_core::model::{ProgressRecord, UnitId};
use sqlx::Row;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn unit_id_from_i64(v: i64) -> Result<UnitId, StorageError> {
    Ok(UnitId::new(i64_to_u64("unit_id", v)?))
}

pub(crate) fn millis_to_datetime(
    field: &'static str,
    ms: i64,
) -> Result<DateTime<Utc>, StorageError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| StorageError::Serialization(format!("invalid {field}: {ms}")))
}

pub(crate) fn map_progress_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<ProgressRecord, StorageError> {
    let time_spent = i64_to_u64(
        "time_spent_secs",
        row.try_get::<i64, _>("time_spent_secs").map_err(ser)?,
    )?;
    let percent: f64 = row.try_get("percent_complete").map_err(ser)?;
    let last_position = i64_to_u64(
        "last_position_secs",
        row.try_get::<i64, _>("last_position_secs").map_err(ser)?,
    )?;
    let updated_at = millis_to_datetime(
        "updated_at_ms",
        row.try_get::<i64, _>("updated_at_ms").map_err(ser)?,
    )?;

    ProgressRecord::from_persisted(time_spent, percent, last_position, updated_at).map_err(ser)
}
