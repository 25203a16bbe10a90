//! gauge_once - measure one site and print the result as JSON

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use river_gauge::config::ServiceConfig;
use river_gauge::ingest::StreamSource;
use river_gauge::service::{processor_for, ErrorResponse};
use river_gauge::{DirImageStore, GaugeService};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Site to measure (pakkred, tanamnon).
    #[arg(long)]
    site: String,
    /// Read this stream instead of the site's configured source.
    #[arg(long, value_name = "URL")]
    url: Option<String>,
    /// Directory for the original and processed JPEGs.
    #[arg(long, env = "RIVER_GAUGE_IMAGE_DIR")]
    image_dir: Option<PathBuf>,
    /// Prefix for the printed image URLs.
    #[arg(long, env = "RIVER_GAUGE_BASE_URL")]
    base_url: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = ServiceConfig::load()?;
    if let Some(dir) = args.image_dir {
        config.image_dir = dir;
    }
    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }
    let name = args.site.to_lowercase();
    if let Some(url) = args.url {
        config
            .site_sources
            .insert(name.clone(), StreamSource::direct(url));
    }

    let site = config
        .sites()?
        .into_iter()
        .find(|site| site.name == name)
        .ok_or_else(|| anyhow!("unknown site '{}'", args.site))?;
    let store = DirImageStore::open(&config.image_dir)?;
    let service = GaugeService::new(
        vec![processor_for(&config, site)],
        Box::new(store),
        &config.base_url,
    );
    let Some(processor) = service.find(&name) else {
        return Err(anyhow!("unknown site '{}'", args.site));
    };

    match service.measure(processor) {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(err) => {
            let body = ErrorResponse::new(&processor.config().display_name, &err);
            println!("{}", serde_json::to_string_pretty(&body)?);
            Err(err.into())
        }
    }
}
