// src/store/mod.rs
pub mod models;
pub mod queries;
pub mod schema;
pub mod sqlite;

pub use models::{AuthProfile, Feed, HealthLogEntry, ImportLogEntry, NewFeed};
pub use sqlite::Store;
