//! Synthetic on/off beam captures.
//!
//! The "off" frame carries a smooth background gradient; the "on" frame adds
//! a bright stripe around one image segment. Used by tests and demos in
//! place of real camera captures.

use beamcal_core::Vec2;
use image::{GrayImage, Luma};

#[derive(Debug, Clone, PartialEq)]
pub struct BeamRenderSettings {
    /// Distance from the segment at which the stripe fades to zero.
    pub half_width: f64,
    pub peak: u8,
    pub background: u8,
}

impl Default for BeamRenderSettings {
    fn default() -> Self {
        Self {
            half_width: 3.0,
            peak: 180,
            background: 40,
        }
    }
}

fn distance_to_segment(p: &Vec2, a: &Vec2, b: &Vec2) -> f64 {
    let ab = b - a;
    let len2 = ab.norm_squared();
    if len2 <= f64::EPSILON {
        return (p - a).norm();
    }
    let t = ((p - a).dot(&ab) / len2).clamp(0.0, 1.0);
    (p - (a + ab * t)).norm()
}

/// Background-only frame.
pub fn render_background(width: u32, height: u32, settings: &BeamRenderSettings) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        let g = 20.0 * (x as f64 / width.max(1) as f64) + 10.0 * (y as f64 / height.max(1) as f64);
        Luma([(settings.background as f64 + g).min(255.0) as u8])
    })
}

/// `(on, off)` frames for a beam covering the segment `a`–`b`.
pub fn render_beam_pair(
    width: u32,
    height: u32,
    a: &Vec2,
    b: &Vec2,
    settings: &BeamRenderSettings,
) -> (GrayImage, GrayImage) {
    let off = render_background(width, height, settings);
    let mut on = off.clone();
    for (x, y, px) in on.enumerate_pixels_mut() {
        let centre = Vec2::new(x as f64 + 0.5, y as f64 + 0.5);
        let d = distance_to_segment(&centre, a, b);
        if d < settings.half_width {
            let falloff = 1.0 - (d / settings.half_width).powi(2);
            let add = (settings.peak as f64 * falloff).round() as u16;
            px.0[0] = (px.0[0] as u16 + add).min(255) as u8;
        }
    }
    (on, off)
}
