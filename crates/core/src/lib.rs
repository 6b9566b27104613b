#![forbid(unsafe_code)]

pub mod activity;
pub mod aggregate;
pub mod counter;
pub mod model;
pub mod resume;
pub mod settings;
pub mod time;

pub use time::Clock;
