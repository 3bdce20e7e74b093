//! Data layer module
//!
//! Handles all persistence for the mention pipelines:
//! - Plain entity records (models)
//! - SQLite repository operations (database)

mod database;
mod models;

pub use database::Database;
pub use models::*;

#[cfg(test)]
mod database_test;
