//! Infrastructure layer: query catalog, destination connection, job runner, config.

pub mod catalog;
pub mod compiler;
pub mod config;
pub mod database;
pub mod error;
pub mod runner;
pub mod transaction;

#[cfg(test)]
mod integration_tests;

pub use catalog::{CatalogError, QueryCatalog, Statement};
pub use compiler::Compiler;
pub use config::{ConfigError, DatabaseConfig, WorkerConfig};
pub use database::{InMemoryConnection, PostgresConnection, SqlConnection};
pub use error::StartupError;
pub use runner::{
    BackoffPolicy, InMemoryJobQueue, JobHandler, JobQueue, JobRunner, PostgresJobQueue,
    QueueError, RunnerConfig, RunnerHandle, RunnerStats,
};
