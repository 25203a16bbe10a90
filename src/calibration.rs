//! Pixel row → water level mapping.
//!
//! A calibration table is an empirical list of breakpoints measured on site:
//! "when the marker's lower edge sits at pixel row P, the gauge reads L metres".
//! Rows between breakpoints snap to the tightest breakpoint the row has not yet
//! exceeded. Rows outside the measured span are reported as out of range and
//! never extrapolated.

use anyhow::{anyhow, Result};
use serde::{Serialize, Serializer};

/// One calibration entry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Breakpoint {
    pub pixel: f64,
    pub level: f64,
}

/// Breakpoints sorted descending by pixel position. Never empty.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationTable {
    entries: Vec<Breakpoint>,
}

impl CalibrationTable {
    /// Build a table from `(pixel, level)` pairs in any order.
    pub fn new(pairs: &[(f64, f64)]) -> Result<Self> {
        if pairs.is_empty() {
            return Err(anyhow!("calibration table must have at least one breakpoint"));
        }
        let mut entries = Vec::with_capacity(pairs.len());
        for &(pixel, level) in pairs {
            if !pixel.is_finite() || !level.is_finite() {
                return Err(anyhow!(
                    "calibration breakpoint ({}, {}) is not finite",
                    pixel,
                    level
                ));
            }
            entries.push(Breakpoint { pixel, level });
        }
        entries.sort_by(|a, b| b.pixel.total_cmp(&a.pixel));
        if let Some(pair) = entries.windows(2).find(|w| w[0].pixel == w[1].pixel) {
            return Err(anyhow!(
                "calibration table has duplicate pixel position {}",
                pair[0].pixel
            ));
        }
        Ok(Self { entries })
    }

    /// Breakpoints in descending pixel order.
    pub fn entries(&self) -> &[Breakpoint] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Largest calibrated pixel position (lowest point on the gauge in image space).
    pub fn max_pixel(&self) -> f64 {
        self.entries[0].pixel
    }

    pub fn min_pixel(&self) -> f64 {
        self.entries[self.entries.len() - 1].pixel
    }
}

/// Which end of the calibrated span a row fell off.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RangeBound {
    /// Row is past the largest calibrated pixel position.
    Below,
    /// Row is before the smallest calibrated pixel position.
    Above,
}

/// A mapped reading: a calibrated level, or a site-specific sentinel.
#[derive(Clone, Debug, PartialEq)]
pub enum LevelReading {
    Level(f64),
    OutOfRange { bound: RangeBound, label: String },
}

impl LevelReading {
    pub fn level(&self) -> Option<f64> {
        match self {
            LevelReading::Level(level) => Some(*level),
            LevelReading::OutOfRange { .. } => None,
        }
    }
}

impl std::fmt::Display for LevelReading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LevelReading::Level(level) => write!(f, "{:.2} m", level),
            LevelReading::OutOfRange { label, .. } => f.write_str(label),
        }
    }
}

// Rendered as a bare number or the sentinel label, matching the published JSON.
impl Serialize for LevelReading {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            LevelReading::Level(level) => serializer.serialize_f64(*level),
            LevelReading::OutOfRange { label, .. } => serializer.serialize_str(label),
        }
    }
}

/// Sentinel labels a site reports when a row falls outside its table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeLabels {
    pub below: String,
    pub above: String,
}

/// Maps detected rows onto a site's calibration table.
#[derive(Clone, Debug)]
pub struct LevelMapper {
    table: CalibrationTable,
    labels: RangeLabels,
}

impl LevelMapper {
    pub fn new(table: CalibrationTable, labels: RangeLabels) -> Self {
        Self { table, labels }
    }

    /// Map a detected row. `None` means the marker was not detected.
    pub fn map(&self, row: Option<u32>) -> Option<LevelReading> {
        row.map(|row| self.map_row(row as f64))
    }

    pub fn map_row(&self, row: f64) -> LevelReading {
        if row > self.table.max_pixel() {
            return LevelReading::OutOfRange {
                bound: RangeBound::Below,
                label: self.labels.below.clone(),
            };
        }
        if row < self.table.min_pixel() {
            return LevelReading::OutOfRange {
                bound: RangeBound::Above,
                label: self.labels.above.clone(),
            };
        }
        let mut hit = self.table.entries[0];
        for entry in &self.table.entries {
            if entry.pixel < row {
                break;
            }
            hit = *entry;
        }
        LevelReading::Level(hit.level)
    }
}
