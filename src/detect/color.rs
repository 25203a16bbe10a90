//! HSV colour segmentation of the marker.
//!
//! Hue uses the 8-bit OpenCV scale (0..180, i.e. degrees / 2) and saturation and
//! value use 0..255, so thresholds read the same as the ones calibrated on site.
//! The primary band is tried first; the fallback band only runs when the primary
//! mask has no foreground at all.

use image::{GrayImage, Luma, RgbImage};

/// Inclusive HSV bounds on the 8-bit OpenCV scale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HsvRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvRange {
    pub const fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|i| hsv[i] >= self.lower[i] && hsv[i] <= self.upper[i])
    }
}

/// Which band produced a mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkerBand {
    Primary,
    Fallback,
}

/// Primary band plus a fallback band made of one or more sub-ranges (unioned).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColorThresholds {
    pub primary: HsvRange,
    pub fallback: Vec<HsvRange>,
}

impl ColorThresholds {
    /// Yellow marker, red fallback split across the hue wrap-around.
    pub fn yellow_with_red_fallback() -> Self {
        Self {
            primary: HsvRange::new([20, 100, 100], [90, 255, 255]),
            fallback: vec![
                HsvRange::new([0, 100, 100], [10, 255, 255]),
                HsvRange::new([160, 100, 100], [180, 255, 255]),
            ],
        }
    }
}

impl Default for ColorThresholds {
    fn default() -> Self {
        Self::yellow_with_red_fallback()
    }
}

/// Output of a segmentation pass.
#[derive(Clone, Debug)]
pub struct Segmentation {
    /// Binary mask, 255 where the pixel matched.
    pub mask: GrayImage,
    /// Band that produced a non-empty mask, `None` when nothing matched.
    pub band: Option<MarkerBand>,
}

impl Segmentation {
    pub fn is_empty(&self) -> bool {
        self.band.is_none()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ColorSegmenter {
    thresholds: ColorThresholds,
}

impl ColorSegmenter {
    pub fn new(thresholds: ColorThresholds) -> Self {
        Self { thresholds }
    }

    pub fn segment(&self, region: &RgbImage) -> Segmentation {
        let hsv = to_hsv(region);

        let (mask, hits) = threshold(&hsv, region.width(), region.height(), |px| {
            self.thresholds.primary.contains(px)
        });
        if hits > 0 {
            return Segmentation {
                mask,
                band: Some(MarkerBand::Primary),
            };
        }

        let (mask, hits) = threshold(&hsv, region.width(), region.height(), |px| {
            self.thresholds.fallback.iter().any(|range| range.contains(px))
        });
        log::debug!("primary band empty, fallback band matched {} pixels", hits);
        Segmentation {
            mask,
            band: (hits > 0).then_some(MarkerBand::Fallback),
        }
    }
}

fn to_hsv(region: &RgbImage) -> Vec<[u8; 3]> {
    region
        .pixels()
        .map(|p| rgb_to_hsv8(p[0], p[1], p[2]))
        .collect()
}

fn threshold(
    hsv: &[[u8; 3]],
    width: u32,
    height: u32,
    keep: impl Fn([u8; 3]) -> bool,
) -> (GrayImage, usize) {
    let mut mask = GrayImage::new(width, height);
    let mut hits = 0;
    for (px, out) in hsv.iter().zip(mask.pixels_mut()) {
        if keep(*px) {
            *out = Luma([255]);
            hits += 1;
        }
    }
    (mask, hits)
}

/// RGB → HSV with the 8-bit OpenCV conventions (H in 0..180, S and V in 0..255).
pub fn rgb_to_hsv8(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let s = if max > 0.0 { delta * 255.0 / max } else { 0.0 };

    let mut h = if delta == 0.0 {
        0.0
    } else if max == rf {
        60.0 * (gf - bf) / delta
    } else if max == gf {
        120.0 + 60.0 * (bf - rf) / delta
    } else {
        240.0 + 60.0 * (rf - gf) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }

    let h8 = (h / 2.0).round();
    // 359.x degrees rounds up to 180, which OpenCV folds back to 0
    let h8 = if h8 >= 180.0 { 0.0 } else { h8 };
    [h8 as u8, s.round() as u8, max as u8]
}
