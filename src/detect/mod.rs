//! Marker detection.
//!
//! - `color`: HSV segmentation with a primary band and a fallback band
//! - `locate`: region-of-interest crop, dominant contour, lower-edge row

pub mod color;
pub mod locate;

pub use color::{ColorSegmenter, ColorThresholds, HsvRange, MarkerBand, Segmentation};
pub use locate::{
    largest_region, BoundingBox, DetectionResult, LineStyle, MarkerLocator, RegionOfInterest,
};
