use anyhow::Context;

use compiler_core::WorkerId;
use compiler_infra::{
    Compiler, JobRunner, PostgresConnection, PostgresJobQueue, RunnerConfig, WorkerConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    compiler_observability::init();

    let config = WorkerConfig::from_env().context("invalid worker configuration")?;
    let worker_id = WorkerId::new();
    tracing::info!(
        worker_id = %worker_id,
        source = ?config.source,
        destination = ?config.destination,
        queries = %config.queries_dir.display(),
        "starting compiler worker"
    );

    let queue = PostgresJobQueue::connect(&config.source, config.job_type.clone(), worker_id)
        .await
        .context("failed to connect to the job queue")?;
    let conn = PostgresConnection::connect(&config.destination)
        .await
        .context("failed to connect to the destination database")?;

    let compiler = Compiler::new(conn, config.queries_dir.clone());
    let mut runner = JobRunner::new(queue, compiler, RunnerConfig::from_worker_config(&config));
    runner.setup().await.context("worker setup failed")?;

    let handle = runner.spawn();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested, finishing current batch");

    let stats = handle.shutdown().await.context("job runner panicked")?;
    tracing::info!(?stats, "compiler worker stopped");
    Ok(())
}
