// src/main.rs - Device controller entry point
use polargraph_rs::config::Config;
use polargraph_rs::controller::Controller;
use polargraph_rs::hardware::{MotorBank, SimPenServo, SimStepDriver};
use polargraph_rs::web;
use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    tracing::info!("Starting polargraph controller");

    let args: Vec<String> = env::args().collect();
    let config_path = if args.len() > 1 {
        args[1].as_str()
    } else {
        "polargraph.toml"
    };

    let config = if std::path::Path::new(config_path).exists() {
        tracing::info!("Loading configuration from: {}", config_path);
        Config::load(config_path).map_err(|e| {
            tracing::error!("Failed to load config from '{}': {}", config_path, e);
            Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
        })?
    } else {
        tracing::info!("No config file at '{}', using defaults", config_path);
        Config::default()
    };

    tracing::info!(
        "Board: {}x{} mm, {:.2} steps/mm, queue capacity {}",
        config.board.width_mm,
        config.board.height_mm,
        config.motors.steps_per_mm(),
        config.queue.capacity
    );

    let (left, _) = SimStepDriver::new("left", config.motors.invert_dir_left);
    let (right, _) = SimStepDriver::new("right", config.motors.invert_dir_right);
    let (servo, _) = SimPenServo::new();
    let motors = MotorBank::new(Box::new(left), Box::new(right));

    let bind = format!("{}:{}", config.web.bind_address, config.web.port);
    let controller = Controller::new(config, motors, Box::new(servo));
    let worker = controller.spawn_motion_worker();

    let app = web::api::create_router(controller.clone());
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!("Device API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    controller.shutdown();
    let _ = worker.join();
    Ok(())
}
