//! Bottom-up progress aggregation over the catalog hierarchy.
//!
//! Everything here is pure: callers pass the catalog and the learner's
//! progress records and get percentages and time totals back.

use std::collections::HashMap;

use crate::model::{
    Catalog, ChapterContent, ChapterId, ContentUnit, FormationId, ModuleId, ProgressRecord,
    SubChapterId, UnitId, percent_of, round_percent,
};

/// Progress records of one learner, keyed by unit.
pub type ProgressMap = HashMap<UnitId, ProgressRecord>;

/// Which formula produced a percentage. The two are not comparable with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateBasis {
    DurationWeighted,
    UnitAverage,
    Empty,
}

/// Totals for a set of units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressAggregate {
    /// Unrounded; use `rounded_percent` for display and storage.
    pub percent_complete: f64,
    pub time_spent_secs: u64,
    pub total_duration_secs: u64,
    pub basis: AggregateBasis,
}

impl ProgressAggregate {
    #[must_use]
    pub fn rounded_percent(&self) -> f64 {
        round_percent(self.percent_complete)
    }
}

/// Unrounded completion of one unit, from its time spent and duration.
///
/// A unit without duration metadata falls back to the stored percentage,
/// which was rounded to one decimal place when it was written.
#[must_use]
pub fn unit_percent(unit: &ContentUnit, record: Option<&ProgressRecord>) -> f64 {
    match (record, unit.expected_duration_secs()) {
        (None, _) => 0.0,
        (Some(record), 0) => record.percent_complete(),
        (Some(record), expected) => percent_of(record.time_spent_secs(), expected),
    }
}

/// Aggregates a flattened set of units.
///
/// Duration-weighted when the set has any duration metadata; otherwise the
/// average of per-unit percentages (see `unit_percent`); zero for an empty set.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn aggregate<'a, I>(units: I, progress: &ProgressMap) -> ProgressAggregate
where
    I: IntoIterator<Item = &'a ContentUnit>,
{
    let mut total_duration_secs = 0_u64;
    let mut time_spent_secs = 0_u64;
    let mut percent_sum = 0.0_f64;
    let mut count = 0_usize;

    for unit in units {
        let record = progress.get(&unit.id());
        total_duration_secs = total_duration_secs.saturating_add(unit.expected_duration_secs());
        time_spent_secs =
            time_spent_secs.saturating_add(record.map_or(0, ProgressRecord::time_spent_secs));
        percent_sum += unit_percent(unit, record);
        count += 1;
    }

    let (percent_complete, basis) = if total_duration_secs > 0 {
        (
            (time_spent_secs as f64 / total_duration_secs as f64 * 100.0).min(100.0),
            AggregateBasis::DurationWeighted,
        )
    } else if count > 0 {
        (
            (percent_sum / count as f64).min(100.0),
            AggregateBasis::UnitAverage,
        )
    } else {
        (0.0, AggregateBasis::Empty)
    };

    ProgressAggregate {
        percent_complete,
        time_spent_secs,
        total_duration_secs,
        basis,
    }
}

//
// ─── HIERARCHY REPORT ──────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq)]
pub struct SubChapterProgress {
    pub sub_chapter_id: SubChapterId,
    pub aggregate: ProgressAggregate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChapterProgress {
    pub chapter_id: ChapterId,
    pub aggregate: ProgressAggregate,
    pub sub_chapters: Vec<SubChapterProgress>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleProgress {
    pub module_id: ModuleId,
    pub common_core: bool,
    pub aggregate: ProgressAggregate,
    pub chapters: Vec<ChapterProgress>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormationProgress {
    pub formation_id: FormationId,
    pub overall: ProgressAggregate,
    /// `None` when the formation has no common-core module.
    pub common_core: Option<ProgressAggregate>,
    pub modules: Vec<ModuleProgress>,
}

/// Aggregates a formation at every level. `None` for an unknown formation.
#[must_use]
pub fn formation_progress(
    catalog: &Catalog,
    formation_id: FormationId,
    progress: &ProgressMap,
) -> Option<FormationProgress> {
    catalog.formation(formation_id)?;

    let modules = catalog
        .modules_of(formation_id)
        .into_iter()
        .map(|module| ModuleProgress {
            module_id: module.id,
            common_core: module.common_core,
            aggregate: aggregate(catalog.flatten_module(module.id), progress),
            chapters: catalog
                .chapters_of(module.id)
                .into_iter()
                .map(|chapter| ChapterProgress {
                    chapter_id: chapter.id,
                    aggregate: aggregate(catalog.flatten_chapter(chapter.id), progress),
                    sub_chapters: match &chapter.content {
                        ChapterContent::Units(_) => Vec::new(),
                        ChapterContent::SubChapters(ids) => ids
                            .iter()
                            .map(|id| SubChapterProgress {
                                sub_chapter_id: *id,
                                aggregate: aggregate(catalog.flatten_sub_chapter(*id), progress),
                            })
                            .collect(),
                    },
                })
                .collect(),
        })
        .collect();

    Some(FormationProgress {
        formation_id,
        overall: aggregate(catalog.flatten_formation(formation_id), progress),
        common_core: catalog
            .common_core_units(formation_id)
            .map(|units| aggregate(units, progress)),
        modules,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        CatalogDefinition, ChapterDefinition, FormationDefinition, ModuleDefinition,
        UnitDefinition, UnitPath,
    };
    use crate::time::fixed_now;

    fn path() -> UnitPath {
        UnitPath {
            formation_id: FormationId::new(1),
            module_id: ModuleId::new(1),
            chapter_id: ChapterId::new(1),
            sub_chapter_id: None,
        }
    }

    fn record(spent: u64, percent: f64) -> ProgressRecord {
        ProgressRecord::from_persisted(spent, percent, 0, fixed_now()).unwrap()
    }

    #[test]
    fn duration_weighted_branch() {
        let units: Vec<_> = [(1, 100), (2, 200), (3, 300)]
            .into_iter()
            .map(|(id, d)| ContentUnit::new(UnitId::new(id), "u", d, path()))
            .collect();
        let progress = ProgressMap::from([
            (UnitId::new(1), record(50, 50.0)),
            (UnitId::new(2), record(200, 100.0)),
        ]);

        let agg = aggregate(&units, &progress);
        assert_eq!(agg.basis, AggregateBasis::DurationWeighted);
        assert_eq!(agg.time_spent_secs, 250);
        assert_eq!(agg.total_duration_secs, 600);
        assert!((agg.rounded_percent() - 41.7).abs() < 1e-9);
    }

    #[test]
    fn unit_average_branch_when_no_duration_is_known() {
        let units: Vec<_> = (1..=3)
            .map(|id| ContentUnit::new(UnitId::new(id), "u", 0, path()))
            .collect();
        let progress = ProgressMap::from([
            (UnitId::new(1), record(0, 0.0)),
            (UnitId::new(2), record(10, 50.0)),
            (UnitId::new(3), record(20, 100.0)),
        ]);

        let agg = aggregate(&units, &progress);
        assert_eq!(agg.basis, AggregateBasis::UnitAverage);
        assert!((agg.rounded_percent() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn unit_average_uses_stored_percent_without_duration() {
        let units: Vec<_> = (1..=3)
            .map(|id| ContentUnit::new(UnitId::new(id), "u", 0, path()))
            .collect();
        // One third of a 3 s course, stored as 33.3.
        let third = ProgressRecord::from_elapsed(1, 3, 0, fixed_now());
        let progress = ProgressMap::from([
            (UnitId::new(1), third.clone()),
            (UnitId::new(2), third.clone()),
            (UnitId::new(3), third),
        ]);

        let agg = aggregate(&units, &progress);
        assert_eq!(agg.basis, AggregateBasis::UnitAverage);
        assert!((agg.percent_complete - 33.3).abs() < 1e-9);
    }

    #[test]
    fn unit_percent_ignores_the_rounded_value_when_duration_is_known() {
        let unit = ContentUnit::new(UnitId::new(1), "u", 3_600, path());
        let record = ProgressRecord::from_elapsed(3_599, 3_600, 0, fixed_now());
        assert!((record.percent_complete() - 100.0).abs() < f64::EPSILON);

        let raw = unit_percent(&unit, Some(&record));
        assert!(raw < 100.0);
        assert!((raw - 99.972).abs() < 1e-3);
        assert!(unit_percent(&unit, None).abs() < f64::EPSILON);
    }

    #[test]
    fn over_budget_time_is_capped() {
        let units = vec![ContentUnit::new(UnitId::new(1), "u", 60, path())];
        let progress = ProgressMap::from([(UnitId::new(1), record(600, 100.0))]);
        assert!((aggregate(&units, &progress).percent_complete - 100.0).abs() < 1e-9);
    }

    #[test]
    fn empty_set_is_zero() {
        let agg = aggregate(std::iter::empty(), &ProgressMap::new());
        assert_eq!(agg.basis, AggregateBasis::Empty);
        assert!(agg.percent_complete.abs() < f64::EPSILON);
    }

    fn course(id: u64) -> UnitDefinition {
        UnitDefinition {
            id: UnitId::new(id),
            title: format!("c{id}"),
            expected_duration_secs: Some(100),
        }
    }

    fn module(id: u64, common_core: bool, units: Vec<UnitDefinition>) -> ModuleDefinition {
        ModuleDefinition {
            id: ModuleId::new(id),
            name: format!("m{id}"),
            common_core: Some(common_core),
            chapters: vec![ChapterDefinition {
                id: ChapterId::new(id * 10),
                name: "c".into(),
                sub_chapters: Vec::new(),
                courses: units,
            }],
        }
    }

    #[test]
    fn common_core_is_aggregated_independently() {
        let def = CatalogDefinition {
            formations: vec![FormationDefinition {
                id: FormationId::new(1),
                name: "f".into(),
                modules: vec![
                    module(1, true, vec![course(1)]),
                    module(2, false, vec![course(2)]),
                ],
            }],
        };
        let catalog = Catalog::from_definition(def, 3_600).unwrap();
        let progress = ProgressMap::from([
            (UnitId::new(1), record(80, 80.0)),
            (UnitId::new(2), record(20, 20.0)),
        ]);

        let report = formation_progress(&catalog, FormationId::new(1), &progress).unwrap();
        let common_core = report.common_core.unwrap();
        assert!((common_core.rounded_percent() - 80.0).abs() < 1e-9);
        assert!((report.overall.rounded_percent() - 50.0).abs() < 1e-9);
        assert!((report.modules[1].aggregate.rounded_percent() - 20.0).abs() < 1e-9);
        assert!(report.modules[0].common_core);
        assert_eq!(report.modules[0].chapters.len(), 1);
    }

    #[test]
    fn no_common_core_module_reports_none_not_zero() {
        let def = CatalogDefinition {
            formations: vec![FormationDefinition {
                id: FormationId::new(1),
                name: "f".into(),
                modules: vec![module(1, false, vec![course(1)])],
            }],
        };
        let catalog = Catalog::from_definition(def, 3_600).unwrap();
        let report =
            formation_progress(&catalog, FormationId::new(1), &ProgressMap::new()).unwrap();
        assert!(report.common_core.is_none());
        assert!(formation_progress(&catalog, FormationId::new(9), &ProgressMap::new()).is_none());
    }
}
