//! gauged - HTTP water-level service
//!
//! This daemon:
//! 1. Loads the service config (file + environment)
//! 2. Serves measurements, stored images and health on one port
//! 3. Measures on request only; nothing runs in the background

use anyhow::Result;
use std::sync::{mpsc, Arc};

use river_gauge::{
    api::{ApiConfig, ApiServer},
    config::ServiceConfig,
    GaugeService,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServiceConfig::load()?;
    let service = Arc::new(GaugeService::from_config(&config)?);
    log::info!("sites: {}", service.site_names().join(", "));

    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
    };
    let api_handle = ApiServer::new(api_config, service).spawn()?;
    log::info!("gauge api listening on {}", api_handle.addr);
    log::info!("publishing image urls under {}images/", config.base_url);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("gauged waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
