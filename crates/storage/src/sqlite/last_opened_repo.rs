use coursetime_core::model::{FormationId, LearnerId};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{id_i64, millis_to_datetime, ser, unit_id_from_i64};
use crate::repository::{LastOpened, LastOpenedRepository, StorageError};

#[async_trait::async_trait]
impl LastOpenedRepository for SqliteRepository {
    async fn read_last_opened(
        &self,
        learner: LearnerId,
        formation: FormationId,
    ) -> Result<Option<LastOpened>, StorageError> {
        let row = sqlx::query(
            r"
                SELECT unit_id, opened_at_ms
                FROM last_opened
                WHERE learner_id = ?1 AND formation_id = ?2
            ",
        )
        .bind(id_i64("learner_id", learner.value())?)
        .bind(id_i64("formation_id", formation.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(LastOpened {
            unit_id: unit_id_from_i64(row.try_get::<i64, _>("unit_id").map_err(ser)?)?,
            opened_at: millis_to_datetime(
                "opened_at_ms",
                row.try_get::<i64, _>("opened_at_ms").map_err(ser)?,
            )?,
        }))
    }

    async fn write_last_opened(
        &self,
        learner: LearnerId,
        formation: FormationId,
        last: LastOpened,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r"
                INSERT INTO last_opened (learner_id, formation_id, unit_id, opened_at_ms)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(learner_id, formation_id) DO UPDATE SET
                    unit_id = excluded.unit_id,
                    opened_at_ms = excluded.opened_at_ms
            ",
        )
        .bind(id_i64("learner_id", learner.value())?)
        .bind(id_i64("formation_id", formation.value())?)
        .bind(id_i64("unit_id", last.unit_id.value())?)
        .bind(last.opened_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(())
    }
}
