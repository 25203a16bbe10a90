use anyhow::{anyhow, Result};
use image::{imageops, GrayImage, Rgb};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;

use super::color::{ColorSegmenter, MarkerBand};
use crate::frame::Frame;

/// Fractional search window, applied to the actual frame size at detection time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RegionOfInterest {
    pub x_start: f64,
    pub x_end: f64,
    pub y_start: f64,
    pub y_end: f64,
}

impl RegionOfInterest {
    pub fn new(x_start: f64, x_end: f64, y_start: f64, y_end: f64) -> Result<Self> {
        let roi = Self {
            x_start,
            x_end,
            y_start,
            y_end,
        };
        roi.validate()?;
        Ok(roi)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, start, end) in [
            ("x", self.x_start, self.x_end),
            ("y", self.y_start, self.y_end),
        ] {
            if !(0.0..=1.0).contains(&start) || !(0.0..=1.0).contains(&end) {
                return Err(anyhow!("roi {} bounds must lie in [0, 1]", name));
            }
            if start >= end {
                return Err(anyhow!("roi {} start must be below its end", name));
            }
        }
        Ok(())
    }

    /// Pixel rectangle `(x, y, width, height)`, bounds truncated toward zero.
    pub fn to_pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let x0 = (width as f64 * self.x_start) as u32;
        let x1 = (width as f64 * self.x_end) as u32;
        let y0 = (height as f64 * self.y_start) as u32;
        let y1 = (height as f64 * self.y_end) as u32;
        (x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
    }
}

/// Axis-aligned bounds of a mask region, OpenCV `boundingRect` semantics
/// (width and height count pixels inclusively).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// First row below the box.
    pub fn lower_edge(&self) -> u32 {
        self.y + self.height
    }
}

/// Overlay style for the detected row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineStyle {
    pub color: [u8; 3],
    pub thickness: u32,
}

impl Default for LineStyle {
    fn default() -> Self {
        Self {
            color: [0, 255, 0],
            thickness: 2,
        }
    }
}

/// Result of searching one frame.
#[derive(Clone, Debug)]
pub struct DetectionResult {
    /// Lower edge of the marker in full-frame rows.
    pub row: Option<u32>,
    pub band: Option<MarkerBand>,
    /// Copy of the frame with the overlay line, or the untouched frame.
    pub annotated: Frame,
}

#[derive(Clone, Debug)]
pub struct MarkerLocator {
    roi: RegionOfInterest,
    segmenter: ColorSegmenter,
    line: LineStyle,
}

impl MarkerLocator {
    pub fn new(roi: RegionOfInterest, segmenter: ColorSegmenter, line: LineStyle) -> Self {
        Self {
            roi,
            segmenter,
            line,
        }
    }

    pub fn locate(&self, frame: &Frame) -> DetectionResult {
        let (x, y, w, h) = self.roi.to_pixels(frame.width(), frame.height());
        if w == 0 || h == 0 {
            log::debug!("roi is empty on a {}x{} frame", frame.width(), frame.height());
            return undetected(frame);
        }

        let crop = imageops::crop_imm(frame.image(), x, y, w, h).to_image();
        let segmentation = self.segmenter.segment(&crop);
        if segmentation.is_empty() {
            return undetected(frame);
        }

        let Some(bounds) = largest_region(&segmentation.mask) else {
            return undetected(frame);
        };
        let row = y + bounds.lower_edge();
        log::debug!(
            "marker bounds {:?} in roi at ({}, {}), lower edge row {}",
            bounds,
            x,
            y,
            row
        );

        DetectionResult {
            row: Some(row),
            band: segmentation.band,
            annotated: draw_level_line(frame, row, self.line),
        }
    }
}

fn undetected(frame: &Frame) -> DetectionResult {
    DetectionResult {
        row: None,
        band: None,
        annotated: frame.clone(),
    }
}

/// Bounding box of the external contour enclosing the largest area.
///
/// Ties keep the contour found first in raster order.
pub fn largest_region(mask: &GrayImage) -> Option<BoundingBox> {
    if mask.width() == 0 || mask.height() == 0 {
        return None;
    }
    let contours: Vec<Contour<i32>> = find_contours(mask);
    let mut best: Option<(f64, &Contour<i32>)> = None;
    for contour in contours
        .iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
    {
        let area = polygon_area(contour);
        if best.map_or(true, |(best_area, _)| area > best_area) {
            best = Some((area, contour));
        }
    }
    best.and_then(|(_, contour)| bounding_box(contour))
}

fn polygon_area(contour: &Contour<i32>) -> f64 {
    let points = &contour.points;
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        twice += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    twice.abs() as f64 / 2.0
}

fn bounding_box(contour: &Contour<i32>) -> Option<BoundingBox> {
    let min_x = contour.points.iter().map(|p| p.x).min()?;
    let max_x = contour.points.iter().map(|p| p.x).max()?;
    let min_y = contour.points.iter().map(|p| p.y).min()?;
    let max_y = contour.points.iter().map(|p| p.y).max()?;
    Some(BoundingBox {
        x: min_x as u32,
        y: min_y as u32,
        width: (max_x - min_x + 1) as u32,
        height: (max_y - min_y + 1) as u32,
    })
}

/// Copy of `frame` with a horizontal line across its full width centred on `row`.
pub fn draw_level_line(frame: &Frame, row: u32, style: LineStyle) -> Frame {
    let mut image = frame.image().clone();
    let thickness = style.thickness.max(1);
    let top = row as i32 - (thickness as i32 - 1) / 2;
    let width = image.width();
    if width > 0 {
        draw_filled_rect_mut(
            &mut image,
            Rect::at(0, top).of_size(width, thickness),
            Rgb(style.color),
        );
    }
    Frame::new(image)
}
