//! The job compiler: runs a table's query set for one object.
//!
//! For a job payload `{"id": <object>, "type": <table>}` the compiler looks up
//! `<table>` in the [`QueryCatalog`] and executes each statement in load
//! order with `<object>` bound to `$1`, inside the transaction opened by
//! [`JobHandler::windup`]. Unknown tables are skipped without touching the
//! database.
//!
//! ## Failure classification
//!
//! | Failure | Reported as | Runner effect |
//! |---------|-------------|---------------|
//! | deadlock / serialization conflict | `JobError::Failed { critical: true }` | retry job, back off batch |
//! | any other database error | `JobError::Database` (unchanged) | default failure handling |
//! | payload without `id`/`type` | `JobError::InvalidPayload` | default failure handling |
//!
//! Execution stops at the first failing statement; later statements of the
//! same job never run.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, warn};

use compiler_core::{DatabaseError, JobError, JobId, JobOutcome, JobPayload};

use crate::catalog::{QueryCatalog, Statement};
use crate::database::SqlConnection;
use crate::error::StartupError;
use crate::runner::JobHandler;
use crate::transaction::{Finalized, TransactionScope};

pub struct Compiler<C> {
    conn: C,
    catalog: Arc<QueryCatalog>,
    queries_dir: Option<PathBuf>,
    scope: TransactionScope,
}

impl<C: SqlConnection> Compiler<C> {
    /// Compiler that loads its catalog from `queries_dir` during `setup`.
    pub fn new(conn: C, queries_dir: impl Into<PathBuf>) -> Self {
        Self {
            conn,
            catalog: Arc::new(QueryCatalog::default()),
            queries_dir: Some(queries_dir.into()),
            scope: TransactionScope::new(),
        }
    }

    /// Compiler over an already loaded catalog; `setup` is a no-op.
    pub fn with_catalog(conn: C, catalog: Arc<QueryCatalog>) -> Self {
        Self {
            conn,
            catalog,
            queries_dir: None,
            scope: TransactionScope::new(),
        }
    }

    pub fn catalog(&self) -> &Arc<QueryCatalog> {
        &self.catalog
    }

    fn classify(
        job_id: JobId,
        payload: &JobPayload,
        index: usize,
        statement: &Statement,
        err: DatabaseError,
    ) -> JobError {
        match err {
            DatabaseError::Conflict { ref code, .. } => {
                error!(
                    job_id = %job_id,
                    table = %payload.table,
                    statement = %statement.name,
                    index,
                    code = %code,
                    "deadlocked"
                );
                JobError::critical(format!("concurrency conflict ({code})"))
            }
            other => {
                warn!(
                    job_id = %job_id,
                    table = %payload.table,
                    statement = %statement.name,
                    index,
                    error = %other,
                    "statement failed"
                );
                JobError::Database(other)
            }
        }
    }
}

/// Transaction control failures: conflicts at commit time are as critical as
/// conflicts during a statement.
fn classify_control(err: DatabaseError) -> JobError {
    match err {
        DatabaseError::Conflict { code, .. } => {
            JobError::critical(format!("concurrency conflict ({code})"))
        }
        other => JobError::Database(other),
    }
}

#[async_trait]
impl<C: SqlConnection> JobHandler for Compiler<C> {
    async fn setup(&mut self) -> Result<(), StartupError> {
        if let Some(dir) = &self.queries_dir {
            let catalog = QueryCatalog::load(dir.clone())?;
            info!(
                root = %dir.display(),
                tables = catalog.len(),
                statements = catalog.statement_count(),
                "query catalog loaded"
            );
            self.catalog = Arc::new(catalog);
        }
        Ok(())
    }

    async fn windup(&mut self) -> Result<(), JobError> {
        self.scope
            .begin(&mut self.conn)
            .await
            .map_err(classify_control)
    }

    async fn execute_job(
        &mut self,
        job_id: JobId,
        payload: &JsonValue,
        priority: i32,
    ) -> Result<JobOutcome, JobError> {
        let payload = JobPayload::from_value(payload)?;
        let catalog = Arc::clone(&self.catalog);

        let Some(statements) = catalog.statements(&payload.table) else {
            debug!(job_id = %job_id, table = %payload.table, "no query set, skipping");
            return Ok(JobOutcome::Skipped);
        };

        debug!(
            job_id = %job_id,
            object_id = %payload.id,
            table = %payload.table,
            priority,
            "compiling"
        );

        for (index, statement) in statements.iter().enumerate() {
            if let Err(err) = self.conn.execute(&statement.sql, &payload.id).await {
                return Err(Self::classify(job_id, &payload, index, statement, err));
            }
        }

        Ok(JobOutcome::Compiled {
            statements: statements.len(),
        })
    }

    async fn teardown(&mut self, failed: bool) -> Result<(), JobError> {
        match self.scope.end(&mut self.conn, failed).await {
            Ok(Finalized::Committed) | Ok(Finalized::RolledBack) => Ok(()),
            Err(err) => Err(classify_control(err)),
        }
    }
}
