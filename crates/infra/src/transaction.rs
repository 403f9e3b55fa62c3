//! Per-job transaction bracket.
//!
//! Every job runs inside exactly one transaction: [`TransactionScope::begin`]
//! before the first statement, [`TransactionScope::end`] after the last one
//! (or after the first failure). The scope tracks whether a transaction is
//! open so it can never be left open or finalized twice.

use tracing::debug;

use compiler_core::DatabaseError;

use crate::database::SqlConnection;

/// How a transaction was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalized {
    Committed,
    RolledBack,
}

#[derive(Debug, Default)]
pub struct TransactionScope {
    open: bool,
}

impl TransactionScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Open a transaction on `conn`.
    ///
    /// Fails without touching the connection if a transaction is already open.
    pub async fn begin<C>(&mut self, conn: &mut C) -> Result<(), DatabaseError>
    where
        C: SqlConnection + ?Sized,
    {
        if self.open {
            return Err(DatabaseError::transaction_state(
                "begin called while a job transaction is still open",
            ));
        }
        conn.begin().await?;
        self.open = true;
        debug!("transaction opened");
        Ok(())
    }

    /// Roll back when `failed`, commit otherwise.
    ///
    /// The scope is closed before the driver call returns, so a failing
    /// commit or rollback still leaves it ready for the next job.
    pub async fn end<C>(&mut self, conn: &mut C, failed: bool) -> Result<Finalized, DatabaseError>
    where
        C: SqlConnection + ?Sized,
    {
        if !self.open {
            return Err(DatabaseError::transaction_state(
                "end called without an open job transaction",
            ));
        }
        self.open = false;

        if failed {
            conn.rollback().await?;
            debug!("transaction rolled back");
            Ok(Finalized::RolledBack)
        } else {
            conn.commit().await?;
            debug!("transaction committed");
            Ok(Finalized::Committed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Call, InMemoryConnection};
    use compiler_core::ObjectId;

    #[tokio::test]
    async fn success_commits() {
        let mut conn = InMemoryConnection::new();
        let mut scope = TransactionScope::new();

        scope.begin(&mut conn).await.unwrap();
        conn.execute("A", &ObjectId::Int(1)).await.unwrap();
        let finalized = scope.end(&mut conn, false).await.unwrap();

        assert_eq!(finalized, Finalized::Committed);
        assert!(!scope.is_open());
        assert_eq!(conn.committed().len(), 1);
    }

    #[tokio::test]
    async fn failure_rolls_back() {
        let mut conn = InMemoryConnection::new();
        let mut scope = TransactionScope::new();

        scope.begin(&mut conn).await.unwrap();
        conn.execute("A", &ObjectId::Int(1)).await.unwrap();
        let finalized = scope.end(&mut conn, true).await.unwrap();

        assert_eq!(finalized, Finalized::RolledBack);
        assert!(conn.committed().is_empty());
        assert_eq!(conn.calls().last(), Some(&Call::Rollback));
    }

    #[tokio::test]
    async fn never_double_begins_or_double_finalizes() {
        let mut conn = InMemoryConnection::new();
        let mut scope = TransactionScope::new();

        assert!(scope.end(&mut conn, false).await.is_err());

        scope.begin(&mut conn).await.unwrap();
        assert!(scope.begin(&mut conn).await.is_err());

        scope.end(&mut conn, false).await.unwrap();
        assert!(scope.end(&mut conn, true).await.is_err());

        assert_eq!(conn.calls(), vec![Call::Begin, Call::Commit]);
    }

    #[tokio::test]
    async fn failed_commit_still_closes_the_scope() {
        let mut conn = InMemoryConnection::new();
        conn.fail_next_commit(DatabaseError::conflict("40001", "could not serialize access"));
        let mut scope = TransactionScope::new();

        scope.begin(&mut conn).await.unwrap();
        let err = scope.end(&mut conn, false).await.unwrap_err();

        assert!(err.is_conflict());
        assert!(!scope.is_open());
        scope.begin(&mut conn).await.unwrap();
    }
}
