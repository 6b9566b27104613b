use coursetime_core::aggregate::ProgressMap;
use coursetime_core::model::{LearnerId, ProgressRecord, UnitId};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{id_i64, map_progress_row, ser, unit_id_from_i64};
use crate::repository::{ProgressRepository, StorageError, WriteOutcome};

#[async_trait::async_trait]
impl ProgressRepository for SqliteRepository {
    async fn read_progress(
        &self,
        learner: LearnerId,
        unit: UnitId,
    ) -> Result<Option<ProgressRecord>, StorageError> {
        let row = sqlx::query(
            r"
                SELECT time_spent_secs, percent_complete, last_position_secs, updated_at_ms
                FROM progress
                WHERE learner_id = ?1 AND unit_id = ?2
            ",
        )
        .bind(id_i64("learner_id", learner.value())?)
        .bind(id_i64("unit_id", unit.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        row.as_ref().map(map_progress_row).transpose()
    }

    async fn write_progress(
        &self,
        learner: LearnerId,
        unit: UnitId,
        record: &ProgressRecord,
    ) -> Result<WriteOutcome, StorageError> {
        // The WHERE clause drops snapshots older than the stored one; an equal
        // timestamp still counts as applied so repeated writes are idempotent.
        let res = sqlx::query(
            r"
                INSERT INTO progress (
                    learner_id, unit_id, time_spent_secs, percent_complete,
                    last_position_secs, updated_at_ms
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(learner_id, unit_id) DO UPDATE SET
                    time_spent_secs = excluded.time_spent_secs,
                    percent_complete = excluded.percent_complete,
                    last_position_secs = excluded.last_position_secs,
                    updated_at_ms = excluded.updated_at_ms
                WHERE excluded.updated_at_ms >= progress.updated_at_ms
            ",
        )
        .bind(id_i64("learner_id", learner.value())?)
        .bind(id_i64("unit_id", unit.value())?)
        .bind(id_i64("time_spent_secs", record.time_spent_secs())?)
        .bind(record.percent_complete())
        .bind(id_i64("last_position_secs", record.last_position_secs())?)
        .bind(record.updated_at().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        if res.rows_affected() == 0 {
            tracing::debug!(
                learner = %learner,
                unit = %unit,
                "dropped progress snapshot older than the stored record"
            );
            return Ok(WriteOutcome::Stale);
        }
        Ok(WriteOutcome::Applied)
    }

    async fn list_progress(
        &self,
        learner: LearnerId,
        units: &[UnitId],
    ) -> Result<ProgressMap, StorageError> {
        if units.is_empty() {
            return Ok(ProgressMap::new());
        }

        let mut sql = String::from(
            r"
                SELECT unit_id, time_spent_secs, percent_complete, last_position_secs, updated_at_ms
                FROM progress
                WHERE learner_id = ?1 AND unit_id IN (
            ",
        );
        for i in 0..units.len() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push('?');
            sql.push_str(&(i + 2).to_string());
        }
        sql.push(')');

        let mut query = sqlx::query(&sql).bind(id_i64("learner_id", learner.value())?);
        for unit in units {
            query = query.bind(id_i64("unit_id", unit.value())?);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let mut out = ProgressMap::with_capacity(rows.len());
        for row in rows {
            let unit = unit_id_from_i64(row.try_get::<i64, _>("unit_id").map_err(ser)?)?;
            out.insert(unit, map_progress_row(&row)?);
        }
        Ok(out)
    }
}
