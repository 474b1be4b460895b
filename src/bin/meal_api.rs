//! meal_api - food detection HTTP service
//!
//! This daemon:
//! 1. Loads configuration from `MEAL_CONFIG` and the environment
//! 2. Loads the detection model and label table once
//! 3. Serves the food detection API until Ctrl-C

use anyhow::{anyhow, Result};
use std::sync::mpsc;

use meal_vision::{
    api::{ApiConfig, ApiServer},
    build_detector, ServiceConfig,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServiceConfig::load()?;
    let detector = build_detector(&config);
    if detector.is_loaded() {
        log::info!(
            "{} ready with {} classes",
            detector.model_name(),
            detector.labels().len()
        );
    } else {
        log::warn!("no detection model loaded; detection requests will fail until restart");
    }

    let api_config = ApiConfig {
        addr: config.api.addr(),
        max_upload_bytes: config.api.max_upload_bytes,
        workers: config.api.workers,
    };
    let api_handle = ApiServer::new(api_config, detector).spawn()?;
    log::info!("food api listening on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("meal_api waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
