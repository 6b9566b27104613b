use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{ChapterId, FormationId, ModuleId, SubChapterId, UnitId};

/// Case-insensitive marker that older catalogs use in module names to flag the common core.
pub const LEGACY_COMMON_CORE_MARKER: &str = "tronc commun";

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("duplicate formation id {0}")]
    DuplicateFormation(FormationId),

    #[error("duplicate module id {0}")]
    DuplicateModule(ModuleId),

    #[error("duplicate chapter id {0}")]
    DuplicateChapter(ChapterId),

    #[error("duplicate sub-chapter id {0}")]
    DuplicateSubChapter(SubChapterId),

    #[error("duplicate course id {0}")]
    DuplicateUnit(UnitId),

    #[error("chapter {0} mixes sub-chapters and direct courses")]
    MixedChapter(ChapterId),

    #[error("default course duration must be > 0")]
    InvalidDefaultDuration,
}

//
// ─── DEFINITIONS (INPUT SHAPE) ─────────────────────────────────────────────────
//

/// Nested catalog description, as loaded from JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogDefinition {
    #[serde(default)]
    pub formations: Vec<FormationDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormationDefinition {
    pub id: FormationId,
    pub name: String,
    #[serde(default)]
    pub modules: Vec<ModuleDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDefinition {
    pub id: ModuleId,
    pub name: String,
    /// Explicit common-core flag. When absent, the legacy name marker is consulted.
    #[serde(default)]
    pub common_core: Option<bool>,
    #[serde(default)]
    pub chapters: Vec<ChapterDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterDefinition {
    pub id: ChapterId,
    pub name: String,
    #[serde(default)]
    pub sub_chapters: Vec<SubChapterDefinition>,
    #[serde(default)]
    pub courses: Vec<UnitDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubChapterDefinition {
    pub id: SubChapterId,
    pub name: String,
    #[serde(default)]
    pub courses: Vec<UnitDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitDefinition {
    pub id: UnitId,
    pub title: String,
    #[serde(default)]
    pub expected_duration_secs: Option<u64>,
}

//
// ─── CATALOG ENTITIES ──────────────────────────────────────────────────────────
//

/// Where a content unit sits in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitPath {
    pub formation_id: FormationId,
    pub module_id: ModuleId,
    pub chapter_id: ChapterId,
    pub sub_chapter_id: Option<SubChapterId>,
}

/// The atomic piece of content a learner opens and spends time on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentUnit {
    id: UnitId,
    title: String,
    expected_duration_secs: u64,
    path: UnitPath,
}

impl ContentUnit {
    #[must_use]
    pub fn new(
        id: UnitId,
        title: impl Into<String>,
        expected_duration_secs: u64,
        path: UnitPath,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            expected_duration_secs,
            path,
        }
    }

    #[must_use]
    pub fn id(&self) -> UnitId {
        self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Authoritative expected duration. Zero means the catalog knows nothing about it.
    #[must_use]
    pub fn expected_duration_secs(&self) -> u64 {
        self.expected_duration_secs
    }

    #[must_use]
    pub fn path(&self) -> UnitPath {
        self.path
    }

    #[must_use]
    pub fn formation_id(&self) -> FormationId {
        self.path.formation_id
    }

    #[must_use]
    pub fn module_id(&self) -> ModuleId {
        self.path.module_id
    }

    #[must_use]
    pub fn chapter_id(&self) -> ChapterId {
        self.path.chapter_id
    }

    #[must_use]
    pub fn sub_chapter_id(&self) -> Option<SubChapterId> {
        self.path.sub_chapter_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formation {
    pub id: FormationId,
    pub name: String,
    pub modules: Vec<ModuleId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub id: ModuleId,
    pub formation_id: FormationId,
    pub name: String,
    pub common_core: bool,
    pub chapters: Vec<ChapterId>,
}

impl Module {
    /// Legacy classification by display name, kept for catalogs without an explicit flag.
    #[must_use]
    pub fn looks_like_common_core(name: &str) -> bool {
        name.to_lowercase().contains(LEGACY_COMMON_CORE_MARKER)
    }
}

/// A chapter holds either sub-chapters or courses, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterContent {
    Units(Vec<UnitId>),
    SubChapters(Vec<SubChapterId>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub id: ChapterId,
    pub module_id: ModuleId,
    pub name: String,
    pub content: ChapterContent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubChapter {
    pub id: SubChapterId,
    pub chapter_id: ChapterId,
    pub name: String,
    pub units: Vec<UnitId>,
}

/// Read-only, validated content hierarchy with lookup indexes.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    formation_order: Vec<FormationId>,
    formations: HashMap<FormationId, Formation>,
    modules: HashMap<ModuleId, Module>,
    chapters: HashMap<ChapterId, Chapter>,
    sub_chapters: HashMap<SubChapterId, SubChapter>,
    units: HashMap<UnitId, ContentUnit>,
}

impl Catalog {
    /// Validate a nested definition and build the indexed catalog.
    ///
    /// Courses without a duration get `default_duration_secs`.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` on duplicate ids, on a chapter that mixes
    /// sub-chapters with direct courses, or when the default duration is zero.
    pub fn from_definition(
        definition: CatalogDefinition,
        default_duration_secs: u64,
    ) -> Result<Self, CatalogError> {
        if default_duration_secs == 0 {
            return Err(CatalogError::InvalidDefaultDuration);
        }

        let mut catalog = Self::default();
        let mut seen_units = HashSet::new();

        for formation_def in definition.formations {
            let formation_id = formation_def.id;
            if catalog.formations.contains_key(&formation_id) {
                return Err(CatalogError::DuplicateFormation(formation_id));
            }

            let mut module_ids = Vec::with_capacity(formation_def.modules.len());
            for module_def in formation_def.modules {
                let module_id = module_def.id;
                if catalog.modules.contains_key(&module_id) {
                    return Err(CatalogError::DuplicateModule(module_id));
                }

                let mut chapter_ids = Vec::with_capacity(module_def.chapters.len());
                for chapter_def in module_def.chapters {
                    let chapter_id = chapter_def.id;
                    if catalog.chapters.contains_key(&chapter_id) {
                        return Err(CatalogError::DuplicateChapter(chapter_id));
                    }
                    if !chapter_def.sub_chapters.is_empty() && !chapter_def.courses.is_empty() {
                        return Err(CatalogError::MixedChapter(chapter_id));
                    }

                    let path = UnitPath {
                        formation_id,
                        module_id,
                        chapter_id,
                        sub_chapter_id: None,
                    };

                    let content = if chapter_def.sub_chapters.is_empty() {
                        ChapterContent::Units(catalog.insert_units(
                            chapter_def.courses,
                            path,
                            default_duration_secs,
                            &mut seen_units,
                        )?)
                    } else {
                        let mut sub_ids = Vec::with_capacity(chapter_def.sub_chapters.len());
                        for sub_def in chapter_def.sub_chapters {
                            if catalog.sub_chapters.contains_key(&sub_def.id) {
                                return Err(CatalogError::DuplicateSubChapter(sub_def.id));
                            }
                            let sub_path = UnitPath {
                                sub_chapter_id: Some(sub_def.id),
                                ..path
                            };
                            let units = catalog.insert_units(
                                sub_def.courses,
                                sub_path,
                                default_duration_secs,
                                &mut seen_units,
                            )?;
                            catalog.sub_chapters.insert(
                                sub_def.id,
                                SubChapter {
                                    id: sub_def.id,
                                    chapter_id,
                                    name: sub_def.name,
                                    units,
                                },
                            );
                            sub_ids.push(sub_def.id);
                        }
                        ChapterContent::SubChapters(sub_ids)
                    };

                    catalog.chapters.insert(
                        chapter_id,
                        Chapter {
                            id: chapter_id,
                            module_id,
                            name: chapter_def.name,
                            content,
                        },
                    );
                    chapter_ids.push(chapter_id);
                }

                let common_core = module_def
                    .common_core
                    .unwrap_or_else(|| Module::looks_like_common_core(&module_def.name));
                catalog.modules.insert(
                    module_id,
                    Module {
                        id: module_id,
                        formation_id,
                        name: module_def.name,
                        common_core,
                        chapters: chapter_ids,
                    },
                );
                module_ids.push(module_id);
            }

            catalog.formations.insert(
                formation_id,
                Formation {
                    id: formation_id,
                    name: formation_def.name,
                    modules: module_ids,
                },
            );
            catalog.formation_order.push(formation_id);
        }

        Ok(catalog)
    }

    fn insert_units(
        &mut self,
        definitions: Vec<UnitDefinition>,
        path: UnitPath,
        default_duration_secs: u64,
        seen: &mut HashSet<UnitId>,
    ) -> Result<Vec<UnitId>, CatalogError> {
        let mut ids = Vec::with_capacity(definitions.len());
        for def in definitions {
            if !seen.insert(def.id) {
                return Err(CatalogError::DuplicateUnit(def.id));
            }
            let duration = def.expected_duration_secs.unwrap_or(default_duration_secs);
            self.units
                .insert(def.id, ContentUnit::new(def.id, def.title, duration, path));
            ids.push(def.id);
        }
        Ok(ids)
    }

    /// Formations in declaration order.
    pub fn formations(&self) -> impl Iterator<Item = &Formation> {
        self.formation_order
            .iter()
            .filter_map(|id| self.formations.get(id))
    }

    #[must_use]
    pub fn formation(&self, id: FormationId) -> Option<&Formation> {
        self.formations.get(&id)
    }

    #[must_use]
    pub fn module(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(&id)
    }

    #[must_use]
    pub fn chapter(&self, id: ChapterId) -> Option<&Chapter> {
        self.chapters.get(&id)
    }

    #[must_use]
    pub fn sub_chapter(&self, id: SubChapterId) -> Option<&SubChapter> {
        self.sub_chapters.get(&id)
    }

    #[must_use]
    pub fn get_content_unit(&self, id: UnitId) -> Option<&ContentUnit> {
        self.units.get(&id)
    }

    /// Modules of a formation in declaration order.
    #[must_use]
    pub fn modules_of(&self, formation_id: FormationId) -> Vec<&Module> {
        self.formation(formation_id)
            .map(|f| f.modules.iter().filter_map(|id| self.module(*id)).collect())
            .unwrap_or_default()
    }

    /// Chapters of a module in declaration order.
    #[must_use]
    pub fn chapters_of(&self, module_id: ModuleId) -> Vec<&Chapter> {
        self.module(module_id)
            .map(|m| m.chapters.iter().filter_map(|id| self.chapter(*id)).collect())
            .unwrap_or_default()
    }

    /// Units of a chapter in flattened order (through its sub-chapters if it has any).
    #[must_use]
    pub fn flatten_chapter(&self, chapter_id: ChapterId) -> Vec<&ContentUnit> {
        let Some(chapter) = self.chapter(chapter_id) else {
            return Vec::new();
        };
        match &chapter.content {
            ChapterContent::Units(ids) => self.resolve(ids),
            ChapterContent::SubChapters(sub_ids) => sub_ids
                .iter()
                .filter_map(|id| self.sub_chapter(*id))
                .flat_map(|sub| self.resolve(&sub.units))
                .collect(),
        }
    }

    #[must_use]
    pub fn flatten_sub_chapter(&self, sub_chapter_id: SubChapterId) -> Vec<&ContentUnit> {
        self.sub_chapter(sub_chapter_id)
            .map(|sub| self.resolve(&sub.units))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn flatten_module(&self, module_id: ModuleId) -> Vec<&ContentUnit> {
        self.module(module_id)
            .map(|m| {
                m.chapters
                    .iter()
                    .flat_map(|id| self.flatten_chapter(*id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Depth-first flattened order: modules, chapters, sub-chapters, then courses.
    #[must_use]
    pub fn flatten_formation(&self, formation_id: FormationId) -> Vec<&ContentUnit> {
        self.formation(formation_id)
            .map(|f| {
                f.modules
                    .iter()
                    .flat_map(|id| self.flatten_module(*id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Units of the formation's common-core modules, or `None` if it has none.
    #[must_use]
    pub fn common_core_units(&self, formation_id: FormationId) -> Option<Vec<&ContentUnit>> {
        let modules: Vec<_> = self
            .modules_of(formation_id)
            .into_iter()
            .filter(|m| m.common_core)
            .collect();
        if modules.is_empty() {
            return None;
        }
        Some(
            modules
                .iter()
                .flat_map(|m| self.flatten_module(m.id))
                .collect(),
        )
    }

    fn resolve(&self, ids: &[UnitId]) -> Vec<&ContentUnit> {
        ids.iter().filter_map(|id| self.units.get(id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(id: u64, secs: Option<u64>) -> UnitDefinition {
        UnitDefinition {
            id: UnitId::new(id),
            title: format!("Course {id}"),
            expected_duration_secs: secs,
        }
    }

    fn sample() -> CatalogDefinition {
        CatalogDefinition {
            formations: vec![FormationDefinition {
                id: FormationId::new(1),
                name: "Formation".into(),
                modules: vec![
                    ModuleDefinition {
                        id: ModuleId::new(10),
                        name: "Basics".into(),
                        common_core: Some(true),
                        chapters: vec![ChapterDefinition {
                            id: ChapterId::new(100),
                            name: "Intro".into(),
                            sub_chapters: vec![
                                SubChapterDefinition {
                                    id: SubChapterId::new(1000),
                                    name: "Part A".into(),
                                    courses: vec![unit(1, Some(600)), unit(2, None)],
                                },
                                SubChapterDefinition {
                                    id: SubChapterId::new(1001),
                                    name: "Part B".into(),
                                    courses: vec![unit(3, Some(300))],
                                },
                            ],
                            courses: Vec::new(),
                        }],
                    },
                    ModuleDefinition {
                        id: ModuleId::new(11),
                        name: "Specialty".into(),
                        common_core: None,
                        chapters: vec![ChapterDefinition {
                            id: ChapterId::new(101),
                            name: "Deep dive".into(),
                            sub_chapters: Vec::new(),
                            courses: vec![unit(4, Some(900)), unit(5, Some(900))],
                        }],
                    },
                ],
            }],
        }
    }

    #[test]
    fn flatten_formation_is_depth_first() {
        let catalog = Catalog::from_definition(sample(), 3_600).unwrap();
        let order: Vec<u64> = catalog
            .flatten_formation(FormationId::new(1))
            .iter()
            .map(|u| u.id().value())
            .collect();
        assert_eq!(order, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn missing_duration_uses_default() {
        let catalog = Catalog::from_definition(sample(), 3_600).unwrap();
        let unit = catalog.get_content_unit(UnitId::new(2)).unwrap();
        assert_eq!(unit.expected_duration_secs(), 3_600);
        assert_eq!(unit.sub_chapter_id(), Some(SubChapterId::new(1000)));
    }

    #[test]
    fn common_core_units_follow_explicit_flag() {
        let catalog = Catalog::from_definition(sample(), 3_600).unwrap();
        let units = catalog.common_core_units(FormationId::new(1)).unwrap();
        assert_eq!(units.len(), 3);
        assert!(!catalog.module(ModuleId::new(11)).unwrap().common_core);
    }

    #[test]
    fn legacy_marker_applies_only_without_flag() {
        assert!(Module::looks_like_common_core("Module 1 - Tronc Commun"));
        assert!(!Module::looks_like_common_core("Specialty"));

        let mut def = sample();
        def.formations[0].modules[1].name = "TRONC COMMUN avancé".into();
        let catalog = Catalog::from_definition(def.clone(), 3_600).unwrap();
        assert!(catalog.module(ModuleId::new(11)).unwrap().common_core);

        def.formations[0].modules[1].common_core = Some(false);
        let catalog = Catalog::from_definition(def, 3_600).unwrap();
        assert!(!catalog.module(ModuleId::new(11)).unwrap().common_core);
    }

    #[test]
    fn formation_without_common_core_returns_none() {
        let mut def = sample();
        def.formations[0].modules[0].common_core = Some(false);
        let catalog = Catalog::from_definition(def, 3_600).unwrap();
        assert!(catalog.common_core_units(FormationId::new(1)).is_none());
    }

    #[test]
    fn rejects_mixed_chapter_and_duplicates() {
        let mut def = sample();
        def.formations[0].modules[0].chapters[0]
            .courses
            .push(unit(9, Some(10)));
        let err = Catalog::from_definition(def, 3_600).unwrap_err();
        assert_eq!(err, CatalogError::MixedChapter(ChapterId::new(100)));

        let mut def = sample();
        def.formations[0].modules[1].chapters[0]
            .courses
            .push(unit(1, Some(10)));
        let err = Catalog::from_definition(def, 3_600).unwrap_err();
        assert_eq!(err, CatalogError::DuplicateUnit(UnitId::new(1)));
    }

    #[test]
    fn parses_json_definition() {
        let json = r#"{
            "formations": [{
                "id": 7, "name": "F",
                "modules": [{
                    "id": 1, "name": "Tronc commun",
                    "chapters": [{ "id": 2, "name": "C", "courses": [{ "id": 3, "title": "U" }] }]
                }]
            }]
        }"#;
        let def: CatalogDefinition = serde_json::from_str(json).unwrap();
        let catalog = Catalog::from_definition(def, 1_800).unwrap();
        let units = catalog.flatten_formation(FormationId::new(7));
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].expected_duration_secs(), 1_800);
        assert!(catalog.common_core_units(FormationId::new(7)).is_some());
    }
}
