//! End-to-end tests: queue → runner → compiler → connection.
//!
//! The catalog is loaded from a temporary `queries/` tree the way the worker
//! loads it at startup; the destination is an `InMemoryConnection` so
//! transactional visibility can be asserted.

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tempfile::TempDir;

    use compiler_core::{DatabaseError, Job, JobId, ObjectId};

    use crate::compiler::Compiler;
    use crate::database::InMemoryConnection;
    use crate::runner::{
        BackoffPolicy, InMemoryJobQueue, JobRunner, QueueStatus, RunnerConfig,
    };

    fn write_query(root: &Path, table: &str, file: &str, sql: &str) {
        let dir = root.join(table);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(file), sql).unwrap();
    }

    fn queries() -> TempDir {
        let dir = TempDir::new().unwrap();
        write_query(dir.path(), "player", "1_stats.sql", "UPDATE player SET k = 1 WHERE id = $1");
        write_query(dir.path(), "player", "2_rank.sql", "UPDATE player SET r = 2 WHERE id = $1");
        write_query(dir.path(), "match", "summary.sql", "INSERT INTO match_summary SELECT $1");
        write_query(dir.path(), "match", "README.md", "not a query");
        dir
    }

    fn enqueue(queue: &InMemoryJobQueue, priority: i32, id: i64, table: &str) -> JobId {
        queue
            .enqueue(Job::new(json!({"id": id, "type": table})).with_priority(priority))
            .unwrap()
    }

    async fn runner_for(
        dir: &TempDir,
        queue: Arc<InMemoryJobQueue>,
        conn: InMemoryConnection,
        config: RunnerConfig,
    ) -> JobRunner<Arc<InMemoryJobQueue>, Compiler<InMemoryConnection>> {
        let compiler = Compiler::new(conn, dir.path());
        let mut runner = JobRunner::new(queue, compiler, config);
        runner.setup().await.unwrap();
        runner
    }

    fn applied(sql: &str, id: i64) -> (String, ObjectId) {
        (sql.to_string(), ObjectId::Int(id))
    }

    #[tokio::test]
    async fn batch_compiles_known_tables_and_skips_unknown_ones() {
        let dir = queries();
        let queue = Arc::new(InMemoryJobQueue::new());
        let conn = InMemoryConnection::new();
        let player = enqueue(&queue, 0, 42, "player");
        let unknown = enqueue(&queue, 1, 7, "team");
        let matched = enqueue(&queue, 2, 9, "match");

        let mut runner = runner_for(&dir, queue.clone(), conn.clone(), RunnerConfig::default()).await;
        let report = runner.run_batch().await.unwrap();

        assert_eq!(report.compiled, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(
            conn.committed(),
            vec![
                applied("UPDATE player SET k = 1 WHERE id = $1", 42),
                applied("UPDATE player SET r = 2 WHERE id = $1", 42),
                applied("INSERT INTO match_summary SELECT $1", 9),
            ]
        );
        for id in [player, unknown, matched] {
            assert_eq!(queue.status(id), Some(QueueStatus::Done));
        }
        assert!(!conn.in_transaction());
    }

    #[tokio::test]
    async fn deadlocked_job_is_retried_and_the_rest_of_the_batch_released() {
        let dir = queries();
        let queue = Arc::new(InMemoryJobQueue::new());
        let conn = InMemoryConnection::new();
        let first = enqueue(&queue, 0, 1, "match");
        let deadlocked = enqueue(&queue, 1, 2, "player");
        let last = enqueue(&queue, 2, 3, "match");
        conn.fail_statement(
            "UPDATE player SET r = 2 WHERE id = $1",
            DatabaseError::conflict("40P01", "deadlock detected"),
        );

        let mut runner = runner_for(&dir, queue.clone(), conn.clone(), RunnerConfig::default()).await;
        let report = runner.run_batch().await.unwrap();

        assert!(report.critical);
        assert_eq!(report.compiled, 1);
        assert_eq!(report.released, 1);
        assert_eq!(queue.status(first), Some(QueueStatus::Done));
        assert_eq!(queue.status(deadlocked), Some(QueueStatus::Queued));
        assert_eq!(queue.attempts(deadlocked), Some(1));
        assert_eq!(queue.attempts(last), Some(0));
        // the first statement of the deadlocked job was rolled back
        assert_eq!(
            conn.committed(),
            vec![applied("INSERT INTO match_summary SELECT $1", 1)]
        );

        conn.clear_failures();
        let retry = runner.run_batch().await.unwrap();

        assert_eq!(retry.compiled, 2);
        assert_eq!(queue.status(deadlocked), Some(QueueStatus::Done));
        assert_eq!(queue.status(last), Some(QueueStatus::Done));
        assert_eq!(conn.committed().len(), 4);
    }

    #[tokio::test]
    async fn ordinary_statement_error_fails_only_that_job() {
        let dir = queries();
        let queue = Arc::new(InMemoryJobQueue::with_max_attempts(1));
        let conn = InMemoryConnection::new();
        let broken = enqueue(&queue, 0, 1, "player");
        let fine = enqueue(&queue, 1, 2, "match");
        conn.fail_statement(
            "UPDATE player SET k = 1 WHERE id = $1",
            DatabaseError::Statement {
                code: Some("42P01".to_string()),
                message: "relation \"player\" does not exist".to_string(),
            },
        );

        let mut runner = runner_for(&dir, queue.clone(), conn.clone(), RunnerConfig::default()).await;
        let report = runner.run_batch().await.unwrap();

        assert!(!report.critical);
        assert_eq!(report.failed, 1);
        assert_eq!(report.compiled, 1);
        assert_eq!(queue.status(broken), Some(QueueStatus::Failed));
        assert!(queue.last_error(broken).unwrap().contains("42P01"));
        assert_eq!(queue.status(fine), Some(QueueStatus::Done));
        // the second statement of the failed job never ran
        assert!(!conn
            .executed()
            .iter()
            .any(|(sql, _)| sql == "UPDATE player SET r = 2 WHERE id = $1"));
    }

    #[tokio::test(start_paused = true)]
    async fn worker_loop_drains_queue_until_shutdown() {
        let dir = queries();
        let queue = Arc::new(InMemoryJobQueue::new());
        let conn = InMemoryConnection::new();
        let ids: Vec<JobId> = (0..7).map(|i| enqueue(&queue, i, i64::from(i), "match")).collect();
        let config = RunnerConfig::default()
            .with_batch_limit(3)
            .with_poll_interval(Duration::from_millis(100))
            .with_backoff(BackoffPolicy::fixed(Duration::from_secs(1)));

        let runner = runner_for(&dir, queue.clone(), conn.clone(), config).await;
        let handle = runner.spawn();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let stats = handle.shutdown().await.unwrap();

        assert_eq!(stats.jobs_compiled, 7);
        assert_eq!(stats.batches, 3);
        assert_eq!(conn.committed().len(), 7);
        assert!(ids.iter().all(|id| queue.status(*id) == Some(QueueStatus::Done)));
    }
}
