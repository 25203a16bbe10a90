use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::StreamSource;
use crate::site::SiteConfig;
use crate::storage::DEFAULT_IMAGE_DIR;

const DEFAULT_API_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000/";
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_EXTRACTOR: &str = crate::ingest::resolve::DEFAULT_EXTRACTOR;

#[derive(Debug, Deserialize, Default)]
struct ServiceConfigFile {
    api: Option<ApiConfigFile>,
    images: Option<ImagesConfigFile>,
    probe: Option<ProbeConfigFile>,
    extractor: Option<String>,
    sites: Option<BTreeMap<String, SiteSourceFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    base_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ImagesConfigFile {
    dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ProbeConfigFile {
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SiteSourceFile {
    stream_url: Option<String>,
    chunk_template: Option<String>,
    first_id: Option<u32>,
    last_id: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub api_addr: String,
    /// Prefix for published image URLs, always ends with '/'.
    pub base_url: String,
    pub image_dir: PathBuf,
    /// Timeout for liveness probes and HTTP snapshots. Zero disables it.
    pub probe_timeout: Duration,
    pub extractor: String,
    /// Stream source replacements keyed by site name.
    pub site_sources: BTreeMap<String, StreamSource>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_addr: DEFAULT_API_ADDR.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            image_dir: PathBuf::from(DEFAULT_IMAGE_DIR),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            extractor: DEFAULT_EXTRACTOR.to_string(),
            site_sources: BTreeMap::new(),
        }
    }
}

impl ServiceConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("RIVER_GAUGE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServiceConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let api_addr = file
            .api
            .as_ref()
            .and_then(|api| api.addr.clone())
            .unwrap_or(defaults.api_addr);
        let base_url = file
            .api
            .and_then(|api| api.base_url)
            .unwrap_or(defaults.base_url);
        let image_dir = file
            .images
            .and_then(|images| images.dir)
            .unwrap_or(defaults.image_dir);
        let probe_timeout = file
            .probe
            .and_then(|probe| probe.timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(defaults.probe_timeout);
        let extractor = file.extractor.unwrap_or(defaults.extractor);

        let mut site_sources = BTreeMap::new();
        for (name, site) in file.sites.unwrap_or_default() {
            let source = site_source(&name, site)?;
            site_sources.insert(name.to_lowercase(), source);
        }

        Ok(Self {
            api_addr,
            base_url,
            image_dir,
            probe_timeout,
            extractor,
            site_sources,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("RIVER_GAUGE_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(base_url) = std::env::var("RIVER_GAUGE_BASE_URL") {
            if !base_url.trim().is_empty() {
                self.base_url = base_url;
            }
        }
        if let Ok(dir) = std::env::var("RIVER_GAUGE_IMAGE_DIR") {
            if !dir.trim().is_empty() {
                self.image_dir = PathBuf::from(dir);
            }
        }
        if let Ok(timeout) = std::env::var("RIVER_GAUGE_PROBE_TIMEOUT_SECS") {
            let seconds: u64 = timeout.parse().map_err(|_| {
                anyhow!("RIVER_GAUGE_PROBE_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.probe_timeout = Duration::from_secs(seconds);
        }
        if let Ok(extractor) = std::env::var("RIVER_GAUGE_EXTRACTOR") {
            if !extractor.trim().is_empty() {
                self.extractor = extractor;
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.api_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|_| anyhow!("api addr '{}' is not a socket address", self.api_addr))?;
        url::Url::parse(&self.base_url)
            .map_err(|e| anyhow!("base url '{}' is invalid: {}", self.base_url, e))?;
        if !self.base_url.ends_with('/') {
            self.base_url.push('/');
        }
        for source in self.site_sources.values() {
            source.validate()?;
        }
        Ok(())
    }

    /// Probe/snapshot timeout, `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        (!self.probe_timeout.is_zero()).then_some(self.probe_timeout)
    }

    /// Built-in sites with configured stream replacements applied.
    pub fn sites(&self) -> Result<Vec<SiteConfig>> {
        let mut sites = SiteConfig::builtin()?;
        for (name, source) in &self.site_sources {
            let site = sites
                .iter_mut()
                .find(|site| &site.name == name)
                .ok_or_else(|| anyhow!("config names unknown site '{}'", name))?;
            site.source = source.clone();
        }
        Ok(sites)
    }
}

fn site_source(name: &str, site: SiteSourceFile) -> Result<StreamSource> {
    match (site.stream_url, site.chunk_template) {
        (Some(url), None) => Ok(StreamSource::direct(url)),
        (None, Some(template)) => {
            let first_id = site
                .first_id
                .ok_or_else(|| anyhow!("site '{}' chunk_template needs first_id", name))?;
            let last_id = site
                .last_id
                .ok_or_else(|| anyhow!("site '{}' chunk_template needs last_id", name))?;
            Ok(StreamSource::chunked(template, first_id, last_id))
        }
        (Some(_), Some(_)) => Err(anyhow!(
            "site '{}' sets both stream_url and chunk_template",
            name
        )),
        (None, None) => Err(anyhow!(
            "site '{}' needs stream_url or chunk_template",
            name
        )),
    }
}

fn read_config_file(path: &Path) -> Result<ServiceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
