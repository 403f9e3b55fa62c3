//! Configuration loading and representation.
//!
//! Everything comes from environment variables. Unset or empty variables fall
//! back to the development defaults of the docker-compose setup.

use std::path::PathBuf;
use std::time::Duration;

use sqlx::postgres::PgConnectOptions;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Connection settings for one Postgres database.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl core::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .finish()
    }
}

impl DatabaseConfig {
    /// Queue-side ("raw") database defaults.
    pub fn source_defaults() -> Self {
        Self {
            host: "vaindock_postgres_raw".to_string(),
            port: 5532,
            user: "vainraw".to_string(),
            password: "vainraw".to_string(),
            database: "vainsocial-raw".to_string(),
        }
    }

    /// Destination ("web") database defaults.
    pub fn destination_defaults() -> Self {
        Self {
            host: "vaindock_postgres_web".to_string(),
            port: 5432,
            user: "vainweb".to_string(),
            password: "vainweb".to_string(),
            database: "vainsocial-web".to_string(),
        }
    }

    /// Read `{prefix}_HOST`, `{prefix}_PORT`, `{prefix}_USER`,
    /// `{prefix}_PASSWORD` and `{prefix}_DB`, keeping `defaults` for anything
    /// unset.
    pub fn from_lookup<F>(prefix: &str, defaults: Self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |suffix: &str| lookup_non_empty(&lookup, &format!("{prefix}_{suffix}"));

        let port = match get("PORT") {
            Some(raw) => parse_value(&format!("{prefix}_PORT"), &raw)?,
            None => defaults.port,
        };

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port,
            user: get("USER").unwrap_or(defaults.user),
            password: get("PASSWORD").unwrap_or(defaults.password),
            database: get("DB").unwrap_or(defaults.database),
        })
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }
}

/// Full worker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Database holding the job queue.
    pub source: DatabaseConfig,
    /// Database the compiled statements run against.
    pub destination: DatabaseConfig,
    /// Root of the `<table>/*.sql` layout.
    pub queries_dir: PathBuf,
    /// Maximum number of jobs leased per batch.
    pub batch_limit: u32,
    /// Queue job type consumed by this worker.
    pub job_type: String,
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
}

impl WorkerConfig {
    pub const SOURCE_PREFIX: &'static str = "POSTGRESQL_SOURCE";
    pub const DESTINATION_PREFIX: &'static str = "POSTGRESQL_DEST";

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = DatabaseConfig::from_lookup(
            Self::SOURCE_PREFIX,
            DatabaseConfig::source_defaults(),
            &lookup,
        )?;
        let destination = DatabaseConfig::from_lookup(
            Self::DESTINATION_PREFIX,
            DatabaseConfig::destination_defaults(),
            &lookup,
        )?;

        let batch_limit: u32 = match lookup_non_empty(&lookup, "COMPILER_BATCH_LIMIT") {
            Some(raw) => parse_value("COMPILER_BATCH_LIMIT", &raw)?,
            None => 20,
        };
        if batch_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "COMPILER_BATCH_LIMIT".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let poll_ms: u64 = match lookup_non_empty(&lookup, "COMPILER_POLL_INTERVAL_MS") {
            Some(raw) => parse_value("COMPILER_POLL_INTERVAL_MS", &raw)?,
            None => 1_000,
        };

        Ok(Self {
            source,
            destination,
            queries_dir: lookup_non_empty(&lookup, "COMPILER_QUERIES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("queries")),
            batch_limit,
            job_type: lookup_non_empty(&lookup, "COMPILER_JOB_TYPE")
                .unwrap_or_else(|| "compile".to_string()),
            poll_interval: Duration::from_millis(poll_ms),
        })
    }
}

fn lookup_non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).filter(|v| !v.is_empty())
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = WorkerConfig::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config.source, DatabaseConfig::source_defaults());
        assert_eq!(config.destination, DatabaseConfig::destination_defaults());
        assert_eq!(config.batch_limit, 20);
        assert_eq!(config.job_type, "compile");
        assert_eq!(config.queries_dir, PathBuf::from("queries"));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn source_and_destination_are_independent() {
        let config = WorkerConfig::from_lookup(lookup_from(&[
            ("POSTGRESQL_SOURCE_HOST", "queue.internal"),
            ("POSTGRESQL_DEST_PORT", "6543"),
            ("POSTGRESQL_DEST_DB", "web"),
        ]))
        .unwrap();

        assert_eq!(config.source.host, "queue.internal");
        assert_eq!(config.source.port, 5532);
        assert_eq!(config.destination.host, "vaindock_postgres_web");
        assert_eq!(config.destination.port, 6543);
        assert_eq!(config.destination.database, "web");
    }

    #[test]
    fn empty_values_count_as_unset() {
        let config = WorkerConfig::from_lookup(lookup_from(&[
            ("POSTGRESQL_DEST_USER", ""),
            ("COMPILER_BATCH_LIMIT", ""),
        ]))
        .unwrap();

        assert_eq!(config.destination.user, "vainweb");
        assert_eq!(config.batch_limit, 20);
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = WorkerConfig::from_lookup(lookup_from(&[("POSTGRESQL_SOURCE_PORT", "abc")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "POSTGRESQL_SOURCE_PORT"));

        let err =
            WorkerConfig::from_lookup(lookup_from(&[("COMPILER_BATCH_LIMIT", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "COMPILER_BATCH_LIMIT"));
    }

    #[test]
    fn debug_output_redacts_password() {
        let rendered = format!("{:?}", DatabaseConfig::destination_defaults());
        assert!(rendered.contains("***"));
        assert!(!rendered.contains("password: \"vainweb\""));
    }
}
