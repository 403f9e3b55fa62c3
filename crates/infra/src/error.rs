//! Startup failure taxonomy.
//!
//! Anything in here stops the worker before it serves a single job.

use thiserror::Error;

use compiler_core::DatabaseError;

use crate::catalog::CatalogError;
use crate::config::ConfigError;
use crate::runner::QueueError;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("query catalog: {0}")]
    Catalog(#[from] CatalogError),

    #[error("destination database: {0}")]
    Database(#[from] DatabaseError),

    #[error("job queue: {0}")]
    Queue(#[from] QueueError),
}
