//! Query catalog: SQL statement sets indexed by destination table.
//!
//! ## Layout
//!
//! ```text
//! queries/
//!   users/
//!     01_score.sql
//!     02_rank.sql
//!   roster/
//!     update.sql
//! ```
//!
//! Each subdirectory name is a table key (verbatim, case-sensitive). Every
//! `*.sql` file directly inside it is one statement body. Statements keep
//! file-name order, which is the order they run in for a job.
//!
//! The job's object id is bound to `$1`, typed `INT8` or `TEXT`. Compare it
//! against other column types with an explicit cast, e.g. `$1::uuid`.
//!
//! The catalog is built once at startup and never mutated afterwards, so it
//! can be shared behind an `Arc` without locking.

mod loader;

use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;

pub use loader::SQL_EXTENSION;

/// One SQL statement body loaded from a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// File name the body was read from (for logging).
    pub name: String,
    pub sql: String,
}

impl Statement {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
        }
    }
}

/// Catalog load failure. Always fatal: a worker must not start serving jobs
/// with a partial catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("query root {0} does not exist or is not a directory")]
    MissingRoot(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is not valid UTF-8")]
    InvalidEncoding(PathBuf),

    #[error("table directory name {0:?} is not valid UTF-8")]
    InvalidTableName(PathBuf),
}

/// Immutable mapping from table key to its ordered statements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryCatalog {
    tables: HashMap<String, Vec<Statement>>,
}

impl QueryCatalog {
    /// Scan `root` and load every table's statements.
    pub fn load(root: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        loader::load(&root.into())
    }

    /// Build a catalog from in-memory statement lists.
    ///
    /// Tables with an empty list get no entry, matching what [`load`](Self::load)
    /// does for an empty directory.
    pub fn from_tables<K, I, S>(tables: impl IntoIterator<Item = (K, I)>) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tables = tables
            .into_iter()
            .filter_map(|(key, bodies)| {
                let statements: Vec<Statement> = bodies
                    .into_iter()
                    .enumerate()
                    .map(|(idx, sql)| Statement::new(format!("{idx}.{SQL_EXTENSION}"), sql))
                    .collect();
                (!statements.is_empty()).then(|| (key.into(), statements))
            })
            .collect();
        Self { tables }
    }

    /// Statements for `table`, in execution order. `None` means the table has
    /// no query set (the job is skipped).
    pub fn statements(&self, table: &str) -> Option<&[Statement]> {
        self.tables.get(table).map(Vec::as_slice)
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Table keys, sorted.
    pub fn tables(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Total number of statements across all tables.
    pub fn statement_count(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_tables_drops_empty_sets() {
        let catalog = QueryCatalog::from_tables([
            ("users", vec!["UPDATE users SET score = 1 WHERE id = $1"]),
            ("matches", vec![]),
        ]);

        assert!(catalog.contains("users"));
        assert!(!catalog.contains("matches"));
        assert_eq!(catalog.statements("matches"), None);
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn lookup_is_case_sensitive() {
        let catalog = QueryCatalog::from_tables([("Users", vec!["SELECT $1"])]);

        assert!(catalog.statements("Users").is_some());
        assert!(catalog.statements("users").is_none());
    }

    #[test]
    fn statements_keep_insertion_order() {
        let catalog = QueryCatalog::from_tables([("roster", vec!["A", "B", "C"])]);

        let sql: Vec<&str> = catalog
            .statements("roster")
            .unwrap()
            .iter()
            .map(|s| s.sql.as_str())
            .collect();
        assert_eq!(sql, vec!["A", "B", "C"]);
        assert_eq!(catalog.statement_count(), 3);
    }
}
