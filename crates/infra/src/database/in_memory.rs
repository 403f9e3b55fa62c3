use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use compiler_core::{DatabaseError, ObjectId};

use super::SqlConnection;

/// A call issued against an [`InMemoryConnection`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Begin,
    Execute { sql: String, param: ObjectId },
    Commit,
    Rollback,
}

/// A statement whose effects are visible (committed).
pub type Applied = (String, ObjectId);

#[derive(Debug, Default)]
struct State {
    calls: Vec<Call>,
    in_transaction: bool,
    aborted: bool,
    pending: Vec<Applied>,
    committed: Vec<Applied>,
    failures: HashMap<String, DatabaseError>,
    commit_failure: Option<DatabaseError>,
}

/// In-memory destination connection.
///
/// Intended for tests/dev. Records every call and models transactional
/// visibility: statements executed inside a transaction only become visible
/// after `commit`. Clones share state, so a test can keep a handle while the
/// compiler owns another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryConnection {
    state: Arc<Mutex<State>>,
}

impl InMemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every execution of exactly `sql` fail with `err`.
    pub fn fail_statement(&self, sql: impl Into<String>, err: DatabaseError) {
        self.lock().failures.insert(sql.into(), err);
    }

    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.failures.clear();
        state.commit_failure = None;
    }

    /// Make the next `commit` fail with `err` (the transaction is discarded).
    pub fn fail_next_commit(&self, err: DatabaseError) {
        self.lock().commit_failure = Some(err);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Statements issued via `execute`, in order, including failed ones.
    pub fn executed(&self) -> Vec<Applied> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Execute { sql, param } => Some((sql.clone(), param.clone())),
                _ => None,
            })
            .collect()
    }

    /// Statements whose effects are visible after commit.
    pub fn committed(&self) -> Vec<Applied> {
        self.lock().committed.clone()
    }

    pub fn in_transaction(&self) -> bool {
        self.lock().in_transaction
    }
}

#[async_trait]
impl SqlConnection for InMemoryConnection {
    async fn begin(&mut self) -> Result<(), DatabaseError> {
        let mut state = self.lock();
        state.calls.push(Call::Begin);
        if state.in_transaction {
            return Err(DatabaseError::transaction_state(
                "there is already a transaction in progress",
            ));
        }
        state.in_transaction = true;
        state.aborted = false;
        state.pending.clear();
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DatabaseError> {
        let mut state = self.lock();
        state.calls.push(Call::Commit);
        if !state.in_transaction {
            return Err(DatabaseError::transaction_state(
                "there is no transaction in progress",
            ));
        }
        state.in_transaction = false;

        let pending = std::mem::take(&mut state.pending);
        if let Some(err) = state.commit_failure.take() {
            return Err(err);
        }
        if state.aborted {
            // Postgres turns COMMIT of a failed transaction into ROLLBACK.
            return Ok(());
        }
        state.committed.extend(pending);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DatabaseError> {
        let mut state = self.lock();
        state.calls.push(Call::Rollback);
        if !state.in_transaction {
            return Err(DatabaseError::transaction_state(
                "there is no transaction in progress",
            ));
        }
        state.in_transaction = false;
        state.aborted = false;
        state.pending.clear();
        Ok(())
    }

    async fn execute(&mut self, sql: &str, param: &ObjectId) -> Result<(), DatabaseError> {
        let mut state = self.lock();
        state.calls.push(Call::Execute {
            sql: sql.to_string(),
            param: param.clone(),
        });

        if state.aborted {
            return Err(DatabaseError::Statement {
                code: Some("25P02".to_string()),
                message: "current transaction is aborted".to_string(),
            });
        }
        if let Some(err) = state.failures.get(sql).cloned() {
            if state.in_transaction {
                state.aborted = true;
            }
            return Err(err);
        }

        let applied = (sql.to_string(), param.clone());
        if state.in_transaction {
            state.pending.push(applied);
        } else {
            state.committed.push(applied);
        }
        Ok(())
    }
}
