//! Postgres-backed destination connection.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `DatabaseError` as follows:
//!
//! | SQLx Error | PostgreSQL Error Code | DatabaseError | Scenario |
//! |------------|----------------------|---------------|----------|
//! | Database (deadlock detected) | `40P01` | `Conflict` | Two jobs locked the same rows in opposite order |
//! | Database (serialization failure) | `40001` | `Conflict` | Concurrent update under `REPEATABLE READ`/`SERIALIZABLE` |
//! | Database (other) | Any other | `Statement` | Syntax errors, constraint violations, missing relations |
//! | Io / Tls / Protocol / Pool* / WorkerCrashed | N/A | `Connection` | Connection lost or unusable |
//! | Other | N/A | `Statement` | Decode/encode errors and the rest |
//!
//! ## Transactions
//!
//! The connection is a single `PgConnection`, not a pool. Transaction control
//! uses plain `BEGIN`/`COMMIT`/`ROLLBACK` over the simple query protocol so the
//! transaction can span several calls from the compiler without holding a
//! borrowed `sqlx::Transaction`.
//!
//! ## Parameter Binding
//!
//! `$1` is bound as `INT8` for integer ids and as `TEXT` for string ids. A
//! text id compared against a non-text column needs an explicit cast in the
//! query file (`WHERE id = $1::uuid`), otherwise Postgres reports an operator
//! error (`42883`) and the job fails.

use async_trait::async_trait;
use sqlx::{Connection, Executor, PgConnection};
use tracing::{debug, instrument};

use compiler_core::{DatabaseError, ObjectId};

use super::SqlConnection;
use crate::config::DatabaseConfig;

const DEADLOCK_DETECTED: &str = "40P01";
const SERIALIZATION_FAILURE: &str = "40001";

/// Exclusive connection to the destination database.
#[derive(Debug)]
pub struct PostgresConnection {
    conn: PgConnection,
}

impl PostgresConnection {
    /// Open a connection using the given settings.
    #[instrument(skip(config), fields(host = %config.host, database = %config.database), err)]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let conn = PgConnection::connect_with(&config.connect_options())
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        debug!("connected to destination database");
        Ok(Self { conn })
    }

    async fn run_control(&mut self, command: &'static str) -> Result<(), DatabaseError> {
        (&mut self.conn)
            .execute(command)
            .await
            .map(|_| ())
            .map_err(|e| map_sqlx_error(command, e))
    }
}

#[async_trait]
impl SqlConnection for PostgresConnection {
    async fn begin(&mut self) -> Result<(), DatabaseError> {
        self.run_control("BEGIN").await
    }

    async fn commit(&mut self) -> Result<(), DatabaseError> {
        self.run_control("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), DatabaseError> {
        self.run_control("ROLLBACK").await
    }

    /// Run `sql` as a prepared statement with `param` bound to `$1`.
    async fn execute(&mut self, sql: &str, param: &ObjectId) -> Result<(), DatabaseError> {
        let query = sqlx::query(sql);
        let query = match param {
            ObjectId::Int(v) => query.bind(*v),
            ObjectId::Text(v) => query.bind(v.as_str()),
        };

        query
            .execute(&mut self.conn)
            .await
            .map(|_| ())
            .map_err(|e| map_sqlx_error("execute", e))
    }
}

fn is_conflict_code(code: &str) -> bool {
    matches!(code, DEADLOCK_DETECTED | SERIALIZATION_FAILURE)
}

/// Map SQLx errors to DatabaseError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> DatabaseError {
    match err {
        sqlx::Error::Database(db_err) => {
            let message = format!("database error in {}: {}", operation, db_err.message());

            match db_err.code() {
                Some(code) if is_conflict_code(&code) => DatabaseError::Conflict {
                    code: code.into_owned(),
                    message,
                },
                code => DatabaseError::Statement {
                    code: code.map(|c| c.into_owned()),
                    message,
                },
            }
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => {
            DatabaseError::Connection(format!("{} failed: {}", operation, err))
        }
        _ => DatabaseError::statement(format!("sqlx error in {}: {}", operation, err)),
    }
}
