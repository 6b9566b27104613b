#![forbid(unsafe_code)]

pub mod repository;
pub mod sqlite;

pub use repository::{
    InMemoryRepository, LastOpened, LastOpenedRepository, ProgressRepository, Storage,
    StorageError, WriteOutcome,
};
