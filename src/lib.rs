//! River Gauge
//!
//! Estimates a river's water level from a single live CCTV frame. A painted
//! marker on a bridge pillar or staff gauge is segmented by colour, the lower
//! edge of its largest region gives a pixel row, and a per-site calibration
//! table maps that row to metres.
//!
//! # Module Structure
//!
//! - `ingest`: stream URL resolution and single-frame capture
//! - `frame`: decoded RGB frames and JPEG encoding
//! - `detect`: colour segmentation and marker location
//! - `calibration`: pixel-row to water-level lookup
//! - `site`: per-site configuration and the measurement pipeline
//! - `storage`: published image store
//! - `service`, `api`, `config`: the HTTP service around the pipeline

pub mod api;
pub mod calibration;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod service;
pub mod site;
pub mod storage;

pub use calibration::{CalibrationTable, LevelMapper, LevelReading, RangeBound, RangeLabels};
pub use error::{FailureKind, PipelineError, Stage};
pub use frame::Frame;
pub use service::{GaugeService, SiteResponse};
pub use site::{Measurement, SiteConfig, SiteProcessor, SiteReport};
pub use storage::{DirImageStore, ImageStore};
