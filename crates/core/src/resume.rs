//! Where a learner lands when re-entering a formation.

use crate::aggregate::{ProgressMap, unit_percent};
use crate::model::{Catalog, ContentUnit, FormationId, UnitId};

/// Why a unit was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeReason {
    LastOpened,
    FirstIncomplete,
    /// Everything is complete: start over.
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeChoice<'a> {
    pub unit: &'a ContentUnit,
    pub reason: ResumeReason,
}

/// Picks the resume unit, first match wins:
/// the last-opened unit if it still belongs to the formation, then the first
/// incomplete unit in flattened order, then the first unit.
///
/// Completion is judged on the unrounded percentage, so a unit stored as
/// 100.0 after rounding can still be incomplete.
///
/// Returns `None` for a formation without units.
#[must_use]
pub fn select_resume_unit<'a>(
    catalog: &'a Catalog,
    formation_id: FormationId,
    last_opened: Option<UnitId>,
    progress: &ProgressMap,
) -> Option<ResumeChoice<'a>> {
    if let Some(unit) = last_opened
        .and_then(|id| catalog.get_content_unit(id))
        .filter(|unit| unit.formation_id() == formation_id)
    {
        return Some(ResumeChoice {
            unit,
            reason: ResumeReason::LastOpened,
        });
    }

    let units = catalog.flatten_formation(formation_id);
    let first_incomplete = units
        .iter()
        .copied()
        .find(|unit| unit_percent(unit, progress.get(&unit.id())) < 100.0);

    match first_incomplete {
        Some(unit) => Some(ResumeChoice {
            unit,
            reason: ResumeReason::FirstIncomplete,
        }),
        None => units.first().copied().map(|unit| ResumeChoice {
            unit,
            reason: ResumeReason::Restart,
        }),
    }
}
