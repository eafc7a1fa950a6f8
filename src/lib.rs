pub mod aggregate;
pub mod cli;
pub mod collection;
pub mod config;
pub mod controllers;
pub mod document;
pub mod engine;
pub mod errors;
pub mod features;
pub mod hooks;
pub mod index;
pub mod logger;
pub mod model;
pub mod models;
pub mod query;
pub mod seed;
pub mod types;
pub mod wal;

pub use engine::{Store, StoreOptions, WriteOptions};
pub use errors::DbError;
pub use features::{ApiFeatures, QueryString};
pub use model::Model;

/// Sets up logging from the `NATOURS_LOG_*` environment variables.
///
/// Call once before opening a store; calling again keeps the first configuration.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    logger::configure_from_env()?;
    Ok(())
}
