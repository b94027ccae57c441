// src/bin/supervisor.rs - Path-streaming supervisor entry point
use polargraph_rs::config::SupervisorConfig;
use polargraph_rs::supervisor::poller::spawn_status_poller;
use polargraph_rs::supervisor::{api, JobRunner};
use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    tracing::info!("Starting polargraph supervisor");

    let args: Vec<String> = env::args().collect();
    let config_path = if args.len() > 1 {
        args[1].as_str()
    } else {
        "supervisor.toml"
    };

    let config = if std::path::Path::new(config_path).exists() {
        tracing::info!("Loading configuration from: {}", config_path);
        SupervisorConfig::load(config_path).map_err(|e| {
            tracing::error!("Failed to load config from '{}': {}", config_path, e);
            Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
        })?
    } else {
        tracing::info!("No config file at '{}', using defaults", config_path);
        SupervisorConfig::default()
    };

    tracing::info!(
        "Device controller at {}, batch size {}",
        config.controller_url,
        config.batch_size
    );

    let bind = format!("{}:{}", config.bind_address, config.port);
    let runner = JobRunner::new(config)?;
    let _poller = spawn_status_poller(runner.clone());

    let app = api::create_router(runner);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!("Supervisor API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
