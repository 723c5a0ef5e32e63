use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use choreo_worker::{init_tracing, run_queue, run_single, task_store, WorkerConfig, WorkerMode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env()?;
    init_tracing(config.log_format);

    let pool = match &config.database_url {
        Some(url) => {
            let pool = choreo_db::create_pool(url).await?;
            choreo_db::health_check(&pool).await?;
            choreo_db::run_migrations(&pool).await?;
            tracing::info!("Database connected");
            Some(pool)
        }
        None => None,
    };

    let store = task_store(pool.as_ref());
    let runner = config.pipeline.build_runner(store).await;

    match config.mode {
        WorkerMode::Single => {
            let json = config.blueprint.as_deref().unwrap_or_default();
            let output = run_single(&runner, json).await?;
            tracing::info!(
                output_url = %output.output_url,
                duration_seconds = output.duration_seconds,
                "Render finished",
            );
        }
        WorkerMode::Queue => {
            let Some(pool) = pool else {
                anyhow::bail!("queue mode needs DATABASE_URL");
            };
            let cancel = CancellationToken::new();
            let shutdown = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Shutdown signal received");
                    shutdown.cancel();
                }
            });
            run_queue(pool, Arc::new(runner), config.worker_id, config.poll_interval, cancel).await;
        }
    }

    Ok(())
}
