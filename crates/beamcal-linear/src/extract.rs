//! Beam extraction from an on/off image pair.
//!
//! 1. `diff = on - off` (saturating), after an optional undistortion hook.
//! 2. Local contrast: `diff - box_blur(diff)`, rescaled so the configured high
//!    percentile maps to the reference brightness.
//! 3. Threshold → weighted pixel cloud (weight = raw difference / 255).
//! 4. Huber line fit through the pixel positions.
//! 5. Validity: mean thresholded value along the fitted line, edge to edge.
//!
//! Extraction is a pure function of the two images and the settings.

use crate::line_fit::{fit_line_huber, LineFitOptions};
use beamcal_core::{CalibError, Line2D, Vec2};
use image::{GrayImage, Luma};
use log::debug;
use serde::{Deserialize, Serialize};

/// Pixel-domain correction applied to both frames before differencing.
pub trait Undistort {
    fn undistort(&self, image: &GrayImage) -> GrayImage;
}

/// Identity correction.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoUndistort;

impl Undistort for NoUndistort {
    fn undistort(&self, image: &GrayImage) -> GrayImage {
        image.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineFinderSettings {
    /// Box-blur window (pixels) used for local contrast normalization.
    pub blur_size: u32,
    /// Percentile in `(0, 1]` of the contrast image mapped to `reference_brightness`.
    pub normalize_percentile: f64,
    pub reference_brightness: f64,
    /// Threshold on the normalized image.
    pub difference_threshold: u8,
    /// Inlier distance (pixels) to the first-guess line, used by the solver.
    pub distance_threshold: f64,
    /// Minimum mean of the thresholded image (0/255) under the fitted line.
    pub min_mean_pixel_value_on_line: f64,
    pub line_fit: LineFitOptions,
}

impl Default for LineFinderSettings {
    fn default() -> Self {
        Self {
            blur_size: 64,
            normalize_percentile: 0.99,
            reference_brightness: 127.0,
            difference_threshold: 50,
            distance_threshold: 5.0,
            min_mean_pixel_value_on_line: 16.0,
            line_fit: LineFitOptions::default(),
        }
    }
}

impl LineFinderSettings {
    pub fn validate(&self) -> Result<(), CalibError> {
        if self.blur_size == 0 {
            return Err(CalibError::invalid("blur_size must be positive"));
        }
        if !(self.normalize_percentile > 0.0 && self.normalize_percentile <= 1.0) {
            return Err(CalibError::invalid(format!(
                "normalize_percentile must be in (0, 1], got {}",
                self.normalize_percentile
            )));
        }
        if !(self.distance_threshold > 0.0) {
            return Err(CalibError::invalid("distance_threshold must be positive"));
        }
        Ok(())
    }
}

/// One thresholded pixel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightedPixel {
    /// Pixel centre.
    pub position: Vec2,
    /// Raw on/off difference scaled to `[0, 1]`.
    pub weight: f64,
}

/// Output of [`extract_beam`].
#[derive(Debug, Clone)]
pub struct BeamObservation {
    pub points: Vec<WeightedPixel>,
    /// Thresholded image, 0 or 255.
    pub mask: GrayImage,
    pub line: Option<Line2D<f64>>,
    pub mean_on_line: f64,
    pub valid: bool,
}

impl BeamObservation {
    /// Points within `threshold` pixels of the first-guess line.
    pub fn inliers(&self, threshold: f64) -> Vec<WeightedPixel> {
        let Some(line) = &self.line else {
            return Vec::new();
        };
        self.points
            .iter()
            .filter(|p| line.distance_to_point(&p.position) <= threshold)
            .copied()
            .collect()
    }
}

pub fn extract_beam(
    on: &GrayImage,
    off: &GrayImage,
    settings: &LineFinderSettings,
) -> Result<BeamObservation, CalibError> {
    extract_beam_with(on, off, settings, &NoUndistort)
}

pub fn extract_beam_with(
    on: &GrayImage,
    off: &GrayImage,
    settings: &LineFinderSettings,
    undistort: &dyn Undistort,
) -> Result<BeamObservation, CalibError> {
    settings.validate()?;
    if on.dimensions() != off.dimensions() {
        return Err(CalibError::invalid(format!(
            "on/off image sizes differ: {:?} vs {:?}",
            on.dimensions(),
            off.dimensions()
        )));
    }
    let (width, height) = on.dimensions();
    if width == 0 || height == 0 {
        return Err(CalibError::invalid("on/off images are empty"));
    }

    let on = undistort.undistort(on);
    let off = undistort.undistort(off);
    let diff = difference(&on, &off);
    let local = subtract_local_mean(&diff, settings.blur_size);
    let norm_factor = settings.reference_brightness / percentile_value(&local, settings.normalize_percentile).max(1.0);

    let mut points = Vec::new();
    let mask = GrayImage::from_fn(width, height, |x, y| {
        let v = (local.get_pixel(x, y).0[0] as f64 * norm_factor).min(255.0);
        if v >= settings.difference_threshold as f64 {
            points.push(WeightedPixel {
                position: Vec2::new(x as f64 + 0.5, y as f64 + 0.5),
                weight: diff.get_pixel(x, y).0[0] as f64 / 255.0,
            });
            Luma([255])
        } else {
            Luma([0])
        }
    });

    let positions: Vec<Vec2> = points.iter().map(|p| p.position).collect();
    let line = if positions.len() >= 2 {
        fit_line_huber(&positions, None, &settings.line_fit).ok()
    } else {
        None
    };
    let mean_on_line = line
        .as_ref()
        .map(|l| mean_under_line(&mask, l))
        .unwrap_or(0.0);
    let valid = line.is_some() && mean_on_line >= settings.min_mean_pixel_value_on_line;
    debug!(
        "beam extraction: {} points, mean on line {:.1}, valid={}",
        points.len(),
        mean_on_line,
        valid
    );

    Ok(BeamObservation {
        points,
        mask,
        line,
        mean_on_line,
        valid,
    })
}

fn difference(on: &GrayImage, off: &GrayImage) -> GrayImage {
    GrayImage::from_fn(on.width(), on.height(), |x, y| {
        Luma([on.get_pixel(x, y).0[0].saturating_sub(off.get_pixel(x, y).0[0])])
    })
}

/// `img - box_blur(img)`, saturating at zero. The window is clipped at the
/// image border.
fn subtract_local_mean(img: &GrayImage, window: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    let (wu, hu) = (w as usize, h as usize);
    // Summed-area table with a zero row/column.
    let mut sat = vec![0u64; (wu + 1) * (hu + 1)];
    for y in 0..hu {
        let mut row = 0u64;
        for x in 0..wu {
            row += img.get_pixel(x as u32, y as u32).0[0] as u64;
            sat[(y + 1) * (wu + 1) + x + 1] = sat[y * (wu + 1) + x + 1] + row;
        }
    }
    let half = (window / 2) as usize;
    GrayImage::from_fn(w, h, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let x0 = x.saturating_sub(half);
        let y0 = y.saturating_sub(half);
        let x1 = (x + half + 1).min(wu);
        let y1 = (y + half + 1).min(hu);
        let sum = sat[y1 * (wu + 1) + x1] + sat[y0 * (wu + 1) + x0]
            - sat[y0 * (wu + 1) + x1]
            - sat[y1 * (wu + 1) + x0];
        let mean = sum as f64 / ((x1 - x0) * (y1 - y0)) as f64;
        let v = img.get_pixel(x as u32, y as u32).0[0] as f64;
        Luma([(v - mean).max(0.0).round() as u8])
    })
}

/// Value at `percentile` of every 4th pixel, sorted ascending.
fn percentile_value(img: &GrayImage, percentile: f64) -> f64 {
    let mut samples: Vec<u8> = img.as_raw().iter().step_by(4).copied().collect();
    if samples.is_empty() {
        return 0.0;
    }
    samples.sort_unstable();
    let idx = ((samples.len() - 1) as f64 * percentile) as usize;
    samples[idx.min(samples.len() - 1)] as f64
}

/// Mean of `img` over the one-pixel rasterization of `line` across the image.
fn mean_under_line(img: &GrayImage, line: &Line2D<f64>) -> f64 {
    let (w, h) = img.dimensions();
    let Some((a, b)) = line.image_edge_intersections(w as f64, h as f64) else {
        return 0.0;
    };
    let steps = (b - a).norm().ceil().max(1.0) as usize;
    let mut last = None;
    let (mut sum, mut count) = (0.0, 0usize);
    for i in 0..=steps {
        let p = a + (b - a) * (i as f64 / steps as f64);
        let px = (p.x.floor().max(0.0) as u32).min(w - 1);
        let py = (p.y.floor().max(0.0) as u32).min(h - 1);
        if last == Some((px, py)) {
            continue;
        }
        last = Some((px, py));
        sum += img.get_pixel(px, py).0[0] as f64;
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
