use std::sync::Arc;

use coursetime_core::aggregate::{FormationProgress, formation_progress};
use coursetime_core::model::{Catalog, ContentUnit, FormationId, LearnerId, ProgressRecord, UnitId};
use coursetime_core::resume::{ResumeReason, select_resume_unit};
use storage::repository::{LastOpenedRepository, ProgressRepository};
use tracing::{debug, warn};

use crate::error::ReportError;

/// Unit a learner should land on when re-entering a formation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeTarget {
    pub unit: ContentUnit,
    pub reason: ResumeReason,
    /// Stored progress of the unit, if it was ever opened.
    pub record: Option<ProgressRecord>,
}

/// Read-side facade over the catalog and the stored progress.
#[derive(Clone)]
pub struct ProgressService {
    catalog: Arc<Catalog>,
    progress: Arc<dyn ProgressRepository>,
    last_opened: Arc<dyn LastOpenedRepository>,
}

impl ProgressService {
    #[must_use]
    pub fn new(
        catalog: Arc<Catalog>,
        progress: Arc<dyn ProgressRepository>,
        last_opened: Arc<dyn LastOpenedRepository>,
    ) -> Self {
        Self {
            catalog,
            progress,
            last_opened,
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Progress of a formation at every level, plus the common-core figure.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::UnknownFormation` for a formation missing from the
    /// catalog and `ReportError::Storage` on repository failures.
    pub async fn formation_report(
        &self,
        learner: LearnerId,
        formation: FormationId,
    ) -> Result<FormationProgress, ReportError> {
        let unit_ids = self.formation_unit_ids(formation)?;
        let progress = self.progress.list_progress(learner, &unit_ids).await?;
        debug!(%learner, %formation, records = progress.len(), "aggregating formation progress");
        formation_progress(&self.catalog, formation, &progress)
            .ok_or(ReportError::UnknownFormation(formation))
    }

    /// Picks the unit to resume in a formation.
    ///
    /// An unreadable last-opened pointer is treated as absent.
    /// `Ok(None)` means the formation has no units.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::UnknownFormation` for a formation missing from the
    /// catalog and `ReportError::Storage` when progress cannot be read.
    pub async fn resume_unit(
        &self,
        learner: LearnerId,
        formation: FormationId,
    ) -> Result<Option<ResumeTarget>, ReportError> {
        let unit_ids = self.formation_unit_ids(formation)?;
        let last_opened = match self.last_opened.read_last_opened(learner, formation).await {
            Ok(last) => last.map(|last| last.unit_id),
            Err(err) => {
                warn!(%learner, %formation, error = %err, "last opened unit unavailable");
                None
            }
        };
        let mut progress = self.progress.list_progress(learner, &unit_ids).await?;

        Ok(
            select_resume_unit(&self.catalog, formation, last_opened, &progress).map(|choice| {
                ResumeTarget {
                    unit: choice.unit.clone(),
                    reason: choice.reason,
                    record: progress.remove(&choice.unit.id()),
                }
            }),
        )
    }

    fn formation_unit_ids(&self, formation: FormationId) -> Result<Vec<UnitId>, ReportError> {
        if self.catalog.formation(formation).is_none() {
            return Err(ReportError::UnknownFormation(formation));
        }
        Ok(self
            .catalog
            .flatten_formation(formation)
            .into_iter()
            .map(ContentUnit::id)
            .collect())
    }
}
