//! Destination database boundary.
//!
//! The compiler only needs four operations from the destination: open,
//! commit and roll back a transaction, and run a statement with one bound
//! parameter. The connection is exclusively owned by one worker, hence
//! `&mut self` everywhere.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;

use compiler_core::{DatabaseError, ObjectId};

pub use in_memory::{Call, InMemoryConnection};
pub use postgres::PostgresConnection;

/// A single long-lived connection to the destination database.
#[async_trait]
pub trait SqlConnection: Send {
    async fn begin(&mut self) -> Result<(), DatabaseError>;

    async fn commit(&mut self) -> Result<(), DatabaseError>;

    async fn rollback(&mut self) -> Result<(), DatabaseError>;

    /// Run `sql` with `param` bound to `$1`. Result rows are discarded.
    async fn execute(&mut self, sql: &str, param: &ObjectId) -> Result<(), DatabaseError>;
}

#[async_trait]
impl<C> SqlConnection for Box<C>
where
    C: SqlConnection + ?Sized,
{
    async fn begin(&mut self) -> Result<(), DatabaseError> {
        (**self).begin().await
    }

    async fn commit(&mut self) -> Result<(), DatabaseError> {
        (**self).commit().await
    }

    async fn rollback(&mut self) -> Result<(), DatabaseError> {
        (**self).rollback().await
    }

    async fn execute(&mut self, sql: &str, param: &ObjectId) -> Result<(), DatabaseError> {
        (**self).execute(sql, param).await
    }
}
