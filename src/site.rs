//! Per-site measurement pipeline.
//!
//! A [`SiteProcessor`] runs one request through
//! `ResolvingStream → CapturingFrame → LocatingMarker → MappingLevel → Done`.
//! Any stage failure ends the request with a [`PipelineError`] tagged with the
//! stage; nothing is retried. Sites differ only in configuration: stream
//! source, region of interest, colour thresholds, calibration table and
//! sentinel labels.

use anyhow::Result;
use chrono::{DateTime, Local};
use serde::Serialize;

use crate::calibration::{CalibrationTable, LevelMapper, LevelReading, RangeLabels};
use crate::detect::{ColorSegmenter, ColorThresholds, LineStyle, MarkerLocator, RegionOfInterest};
use crate::error::{FailureKind, PipelineError, Stage};
use crate::ingest::{FrameCapture, StreamResolver, StreamSource};

/// Local timestamp format published with each measurement.
pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

const PAKKRED_PAGE_URL: &str = "https://www.youtube.com/watch?v=Isvol4kdEb0";
const TANAMNON_CHUNK_TEMPLATE: &str =
    "https://stream.firsttech.co.th/live/nakornnont.stream/chunklist_{}.m3u8";

const PAKKRED_BREAKPOINTS: &[(f64, f64)] = &[
    (1080.0, 1.40),
    (1045.0, 1.50),
    (1017.0, 1.60),
    (984.0, 1.70),
    (950.0, 1.80),
    (922.0, 1.90),
    (892.0, 2.00),
    (856.0, 2.10),
    (822.0, 2.20),
    (785.0, 2.30),
    (750.0, 2.40),
    (708.0, 2.50),
    (670.0, 2.60),
    (627.0, 2.70),
    (585.0, 2.80),
    (540.0, 2.90),
    (495.0, 3.00),
    (445.0, 3.10),
    (400.0, 3.20),
    (351.0, 3.30),
    (304.0, 3.40),
    (254.0, 3.50),
    (206.0, 3.60),
    (155.0, 3.70),
    (105.0, 3.80),
    (53.0, 3.90),
    (20.0, 4.00),
];

const TANAMNON_BREAKPOINTS: &[(f64, f64)] = &[
    (351.0, 1.80),
    (329.1, 1.90),
    (309.8, 2.00),
    (289.2, 2.10),
    (269.8, 2.20),
    (259.1, 2.24),
    (254.8, 2.26),
    (250.7, 2.28),
    (247.2, 2.30),
    (227.0, 2.40),
    (215.7, 2.45),
    (205.8, 2.50),
    (196.1, 2.55),
    (185.5, 2.60),
    (174.2, 2.65),
    (164.2, 2.70),
    (153.4, 2.75),
    (143.0, 2.80),
    (131.8, 2.85),
    (121.2, 2.90),
    (110.0, 2.95),
    (100.3, 3.00),
    (87.8, 3.05),
    (77.8, 3.10),
    (67.0, 3.15),
    (56.4, 3.20),
    (44.8, 3.25),
    (34.8, 3.30),
    (29.5, 3.32),
    (24.6, 3.34),
    (19.8, 3.36),
    (16.4, 3.38),
    (12.7, 3.40),
];

/// Everything that makes one monitored location different from another.
#[derive(Clone, Debug)]
pub struct SiteConfig {
    /// Lower-case identifier used in routes and image names.
    pub name: String,
    /// Human-readable location name published as `cctv_location`.
    pub display_name: String,
    pub source: StreamSource,
    pub roi: RegionOfInterest,
    pub thresholds: ColorThresholds,
    pub table: CalibrationTable,
    pub labels: RangeLabels,
    pub line: LineStyle,
}

impl SiteConfig {
    pub fn pakkred() -> Result<Self> {
        Ok(Self {
            name: "pakkred".to_string(),
            display_name: "Pakkred".to_string(),
            source: StreamSource::page(PAKKRED_PAGE_URL),
            roi: RegionOfInterest::new(0.52, 0.58, 0.0, 0.7)?,
            thresholds: ColorThresholds::yellow_with_red_fallback(),
            table: CalibrationTable::new(PAKKRED_BREAKPOINTS)?,
            labels: RangeLabels {
                below: "under 1.4 m".to_string(),
                above: "over 4.0 m".to_string(),
            },
            line: LineStyle {
                color: [0, 255, 0],
                thickness: 2,
            },
        })
    }

    pub fn tanamnon() -> Result<Self> {
        Ok(Self {
            name: "tanamnon".to_string(),
            display_name: "Tanamnon".to_string(),
            source: StreamSource::chunked(TANAMNON_CHUNK_TEMPLATE, 1000, 1100),
            roi: RegionOfInterest::new(0.42, 0.58, 0.0, 0.7)?,
            thresholds: ColorThresholds::yellow_with_red_fallback(),
            table: CalibrationTable::new(TANAMNON_BREAKPOINTS)?,
            labels: RangeLabels {
                below: "under 1.8 m".to_string(),
                above: "over 3.4 m".to_string(),
            },
            line: LineStyle {
                color: [0, 255, 0],
                thickness: 1,
            },
        })
    }

    /// The compiled-in monitored sites.
    pub fn builtin() -> Result<Vec<Self>> {
        Ok(vec![Self::pakkred()?, Self::tanamnon()?])
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            anyhow::bail!(
                "site name '{}' must be non-empty lower-case ascii, digits, '_' or '-'",
                self.name
            );
        }
        self.source.validate()?;
        self.roi.validate()?;
        Ok(())
    }
}

/// Which of the two published images a name refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageKind {
    Original,
    Processed,
}

impl ImageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageKind::Original => "original",
            ImageKind::Processed => "processed",
        }
    }
}

/// `<site>_<kind>_<epochMillis>.jpg`
pub fn image_name(site: &str, kind: ImageKind, epoch_ms: i64) -> String {
    format!("{}_{}_{}.jpg", site, kind.as_str(), epoch_ms)
}

/// One finished measurement. Immutable once built.
#[derive(Clone, Debug, Serialize)]
pub struct Measurement {
    pub site: String,
    pub location: String,
    pub original_image: String,
    pub processed_image: String,
    pub water_level: LevelReading,
    pub pixel_row: u32,
    pub timestamp: String,
    pub epoch_ms: i64,
}

/// Encoded JPEG plus the name it should be stored under.
#[derive(Clone, Debug)]
pub struct NamedImage {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Measurement and the two images to hand to the image store.
#[derive(Clone, Debug)]
pub struct SiteReport {
    pub measurement: Measurement,
    pub original: NamedImage,
    pub processed: NamedImage,
}

/// Runs the pipeline for one site.
pub struct SiteProcessor {
    config: SiteConfig,
    locator: MarkerLocator,
    mapper: LevelMapper,
    resolver: StreamResolver,
    capture: FrameCapture,
}

impl SiteProcessor {
    pub fn new(config: SiteConfig, resolver: StreamResolver, capture: FrameCapture) -> Self {
        let locator = MarkerLocator::new(
            config.roi,
            ColorSegmenter::new(config.thresholds.clone()),
            config.line,
        );
        let mapper = LevelMapper::new(config.table.clone(), config.labels.clone());
        Self {
            config,
            locator,
            mapper,
            resolver,
            capture,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    pub fn measure(&self) -> Result<SiteReport, PipelineError> {
        self.measure_at(Local::now())
    }

    /// Run the pipeline, stamping results with `now`.
    pub fn measure_at(&self, now: DateTime<Local>) -> Result<SiteReport, PipelineError> {
        let site = self.config.name.as_str();

        self.enter(Stage::ResolvingStream);
        log::debug!("{}: resolving {}", site, self.config.source.describe());
        let url = self
            .resolver
            .resolve(&self.config.source)
            .map_err(|err| self.fail(err, Stage::ResolvingStream))?;

        self.enter(Stage::CapturingFrame);
        let frame = self
            .capture
            .capture(&url)
            .map_err(|err| self.fail(err, Stage::CapturingFrame))?;

        self.enter(Stage::LocatingMarker);
        let detection = self.locator.locate(&frame);
        let Some(row) = detection.row else {
            return Err(self.fail(
                PipelineError::new(
                    FailureKind::UndetectedMarker,
                    format!("no marker found in the {} region of interest", site),
                ),
                Stage::LocatingMarker,
            ));
        };

        self.enter(Stage::MappingLevel);
        let water_level = self.mapper.map_row(row as f64);

        let epoch_ms = now.timestamp_millis();
        let original = NamedImage {
            name: image_name(site, ImageKind::Original, epoch_ms),
            bytes: frame
                .to_jpeg()
                .map_err(|err| self.fail(PipelineError::internal(err), Stage::MappingLevel))?,
        };
        let processed = NamedImage {
            name: image_name(site, ImageKind::Processed, epoch_ms),
            bytes: detection
                .annotated
                .to_jpeg()
                .map_err(|err| self.fail(PipelineError::internal(err), Stage::MappingLevel))?,
        };

        self.enter(Stage::Done);
        log::info!(
            "{}: marker row {} ({:?} band) -> {}",
            site,
            row,
            detection.band,
            water_level
        );

        Ok(SiteReport {
            measurement: Measurement {
                site: site.to_string(),
                location: self.config.display_name.clone(),
                original_image: original.name.clone(),
                processed_image: processed.name.clone(),
                water_level,
                pixel_row: row,
                timestamp: now.format(TIMESTAMP_FORMAT).to_string(),
                epoch_ms,
            },
            original,
            processed,
        })
    }

    fn enter(&self, stage: Stage) {
        log::debug!("{}: {:?}", self.config.name, stage);
    }

    fn fail(&self, err: PipelineError, stage: Stage) -> PipelineError {
        log::warn!(
            "{}: {:?} failed ({}): {}",
            self.config.name,
            stage,
            self.config.source.describe(),
            err
        );
        err.at(stage)
    }
}
