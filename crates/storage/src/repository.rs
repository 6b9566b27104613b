use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coursetime_core::aggregate::ProgressMap;
use coursetime_core::model::{FormationId, LearnerId, ProgressRecord, UnitId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// What a progress write did to the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The record replaced (or matched) the stored one.
    Applied,
    /// The stored record is newer; the write was dropped.
    Stale,
}

/// Last unit a learner opened in a formation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastOpened {
    pub unit_id: UnitId,
    pub opened_at: DateTime<Utc>,
}

/// Durable per-learner progress, one full record per unit.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Fetch the record for a unit, `None` if the learner never opened it.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn read_progress(
        &self,
        learner: LearnerId,
        unit: UnitId,
    ) -> Result<Option<ProgressRecord>, StorageError>;

    /// Replace the stored record.
    ///
    /// A record older than the stored one (by `updated_at`) is dropped, so
    /// late in-flight flushes cannot overwrite a newer snapshot. Writing the
    /// same record twice leaves the store unchanged.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn write_progress(
        &self,
        learner: LearnerId,
        unit: UnitId,
        record: &ProgressRecord,
    ) -> Result<WriteOutcome, StorageError>;

    /// Fetch every existing record among `units`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_progress(
        &self,
        learner: LearnerId,
        units: &[UnitId],
    ) -> Result<ProgressMap, StorageError>;
}

/// Pointer to the last unit opened per (learner, formation).
#[async_trait]
pub trait LastOpenedRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn read_last_opened(
        &self,
        learner: LearnerId,
        formation: FormationId,
    ) -> Result<Option<LastOpened>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn write_last_opened(
        &self,
        learner: LearnerId,
        formation: FormationId,
        last: LastOpened,
    ) -> Result<(), StorageError>;
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    progress: Arc<Mutex<HashMap<(LearnerId, UnitId), ProgressRecord>>>,
    last_opened: Arc<Mutex<HashMap<(LearnerId, FormationId), LastOpened>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn read_progress(
        &self,
        learner: LearnerId,
        unit: UnitId,
    ) -> Result<Option<ProgressRecord>, StorageError> {
        let guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&(learner, unit)).cloned())
    }

    async fn write_progress(
        &self,
        learner: LearnerId,
        unit: UnitId,
        record: &ProgressRecord,
    ) -> Result<WriteOutcome, StorageError> {
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        if let Some(existing) = guard.get(&(learner, unit)) {
            if existing.updated_at() > record.updated_at() {
                return Ok(WriteOutcome::Stale);
            }
        }
        guard.insert((learner, unit), record.clone());
        Ok(WriteOutcome::Applied)
    }

    async fn list_progress(
        &self,
        learner: LearnerId,
        units: &[UnitId],
    ) -> Result<ProgressMap, StorageError> {
        let guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(units
            .iter()
            .filter_map(|unit| guard.get(&(learner, *unit)).map(|r| (*unit, r.clone())))
            .collect())
    }
}

#[async_trait]
impl LastOpenedRepository for InMemoryRepository {
    async fn read_last_opened(
        &self,
        learner: LearnerId,
        formation: FormationId,
    ) -> Result<Option<LastOpened>, StorageError> {
        let guard = self
            .last_opened
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&(learner, formation)).copied())
    }

    async fn write_last_opened(
        &self,
        learner: LearnerId,
        formation: FormationId,
        last: LastOpened,
    ) -> Result<(), StorageError> {
        let mut guard = self
            .last_opened
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert((learner, formation), last);
        Ok(())
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub progress: Arc<dyn ProgressRepository>,
    pub last_opened: Arc<dyn LastOpenedRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let progress: Arc<dyn ProgressRepository> = Arc::new(repo.clone());
        let last_opened: Arc<dyn LastOpenedRepository> = Arc::new(repo);
        Self {
            progress,
            last_opened,
        }
    }
}
