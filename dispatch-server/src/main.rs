use dispatch_server::{Config, ServerState, setup_environment};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Environment (dotenv, logging)
    setup_environment()?;

    tracing::info!("Dispatch server starting...");

    // 2. Configuration
    let config = Config::from_env();

    // 3. Services and store
    let state = ServerState::initialize(&config).await?;

    // 4. Background tasks (sync scheduler)
    state.start_background_tasks();

    tracing::info!(
        work_dir = %config.work_dir,
        environment = %config.environment,
        sync_interval_secs = config.sync_interval_secs,
        "Dispatch server running"
    );

    // 5. Run until interrupted
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    state.shutdown();

    Ok(())
}
