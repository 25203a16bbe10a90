//! Site processors wired to an image store, rendering the published JSON.

use anyhow::Result;
use serde::Serialize;

use crate::calibration::LevelReading;
use crate::config::ServiceConfig;
use crate::error::PipelineError;
use crate::ingest::{FrameCapture, HttpProbe, StreamResolver, UrlOpener};
use crate::site::{SiteConfig, SiteProcessor, SiteReport};
use crate::storage::{DirImageStore, ImageStore};

/// Published shape of one successful measurement.
#[derive(Clone, Debug, Serialize)]
pub struct SiteResponse {
    pub cctv_location: String,
    pub original_image_url: String,
    pub processed_image_url: String,
    #[serde(rename = "water_level_range(m)")]
    pub water_level: LevelReading,
    pub timestamp: String,
}

/// Published shape of a failed measurement.
#[derive(Clone, Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub cctv_location: String,
    pub kind: &'static str,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(location: &str, err: &PipelineError) -> Self {
        Self {
            status: "error",
            cctv_location: location.to_string(),
            kind: err.kind.code(),
            message: err.message.clone(),
        }
    }
}

/// Per-site entry in the combined response.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum SiteOutcome {
    Measured(SiteResponse),
    Failed(ErrorResponse),
}

pub struct GaugeService {
    sites: Vec<SiteProcessor>,
    store: Box<dyn ImageStore>,
    base_url: String,
}

impl GaugeService {
    pub fn new(sites: Vec<SiteProcessor>, store: Box<dyn ImageStore>, base_url: &str) -> Self {
        let mut base_url = base_url.to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            sites,
            store,
            base_url,
        }
    }

    /// Production wiring: HTTP probe, URL opener and a directory store.
    pub fn from_config(cfg: &ServiceConfig) -> Result<Self> {
        let sites = cfg
            .sites()?
            .into_iter()
            .map(|site| processor_for(cfg, site))
            .collect();
        let store = DirImageStore::open(&cfg.image_dir)?;
        log::info!("storing images in {}", store.root().display());
        Ok(Self::new(sites, Box::new(store), &cfg.base_url))
    }

    pub fn site_names(&self) -> Vec<&str> {
        self.sites.iter().map(|site| site.name()).collect()
    }

    pub fn find(&self, name: &str) -> Option<&SiteProcessor> {
        let name = name.to_lowercase();
        self.sites.iter().find(|site| site.name() == name)
    }

    pub fn store(&self) -> &dyn ImageStore {
        self.store.as_ref()
    }

    /// Measure one site and persist both images.
    pub fn measure(&self, site: &SiteProcessor) -> Result<SiteResponse, PipelineError> {
        let report = site.measure()?;
        self.publish(site, report)
    }

    /// Measure every site in order; failures are reported per site.
    pub fn measure_all(&self) -> Vec<SiteOutcome> {
        self.sites
            .iter()
            .map(|site| match self.measure(site) {
                Ok(response) => SiteOutcome::Measured(response),
                Err(err) => SiteOutcome::Failed(ErrorResponse::new(
                    &site.config().display_name,
                    &err,
                )),
            })
            .collect()
    }

    fn publish(&self, site: &SiteProcessor, report: SiteReport) -> Result<SiteResponse, PipelineError> {
        let original = self
            .store
            .put(&report.original.name, &report.original.bytes)
            .map_err(PipelineError::internal)?;
        let processed = self
            .store
            .put(&report.processed.name, &report.processed.bytes)
            .map_err(PipelineError::internal)?;
        let measurement = report.measurement;
        Ok(SiteResponse {
            cctv_location: site.config().display_name.clone(),
            original_image_url: self.image_url(&original),
            processed_image_url: self.image_url(&processed),
            water_level: measurement.water_level,
            timestamp: measurement.timestamp,
        })
    }

    pub fn image_url(&self, reference: &str) -> String {
        format!("{}images/{}", self.base_url, reference)
    }
}

/// Site processor with the production probe, extractor and opener.
pub fn processor_for(cfg: &ServiceConfig, site: SiteConfig) -> SiteProcessor {
    let resolver = StreamResolver::new(Box::new(HttpProbe::new(cfg.timeout())))
        .with_extractor(cfg.extractor.clone());
    let capture = FrameCapture::new(Box::new(UrlOpener::new(cfg.timeout())));
    SiteProcessor::new(site, resolver, capture)
}
