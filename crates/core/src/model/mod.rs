pub mod catalog;
mod ids;
mod progress;

pub use catalog::{
    Catalog, CatalogDefinition, CatalogError, Chapter, ChapterContent, ChapterDefinition,
    ContentUnit, Formation, FormationDefinition, Module, ModuleDefinition, SubChapter,
    SubChapterDefinition, UnitDefinition, UnitPath,
};
pub use ids::{ChapterId, FormationId, LearnerId, ModuleId, ParseIdError, SubChapterId, UnitId};
pub use progress::{ProgressError, ProgressRecord, percent_of, round_percent};
