//! Color-space math and the illumination-color palette
//!
//! `bgr_to_hsv`/`hsv_to_bgr` are plain scalar conversions (no image library
//! involved) so the `e_hsv == bgr_to_hsv(e_bgr)` invariant can be
//! checked and exercised without the `opencv` feature. The whole-image
//! conversion in `sphere-vision` is defined to apply this same per-pixel
//! formula to every pixel, so the two stay in lockstep by construction.
//!
//! Hue follows the OpenCV convention of `[0, 180)` rather than the more
//! common `[0, 360)`, since the HSV band half-widths used elsewhere
//! (`12, 85, 85`) are calibrated against that range.

use serde::{Deserialize, Serialize};

/// Convert an 8-bit BGR triple to HSV with hue in `[0, 180)`, saturation and
/// value in `[0, 255]`.
pub fn bgr_to_hsv(bgr: [f64; 3]) -> [f64; 3] {
    let [b, g, r] = bgr;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let v = max;
    let s = if max > 0.0 { delta / max * 255.0 } else { 0.0 };

    let h_deg = if delta <= 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };

    [h_deg / 2.0, s, v]
}

/// Inverse of [`bgr_to_hsv`].
pub fn hsv_to_bgr(hsv: [f64; 3]) -> [f64; 3] {
    let [h, s, v] = hsv;
    let h_deg = (h * 2.0).rem_euclid(360.0);
    let s_frac = (s / 255.0).clamp(0.0, 1.0);
    let v_val = v.clamp(0.0, 255.0);

    if s_frac <= 0.0 {
        return [v_val, v_val, v_val];
    }

    let c = v_val * s_frac;
    let x = c * (1.0 - ((h_deg / 60.0).rem_euclid(2.0) - 1.0).abs());
    let m = v_val - c;

    let (r1, g1, b1) = match (h_deg / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    [b1 + m, g1 + m, r1 + m]
}

/// Shortest signed distance between two hues on the circular `[0, 180)`
/// scale.
fn hue_delta(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(180.0);
    if d > 90.0 {
        180.0 - d
    } else {
        d
    }
}

/// Weighted HSV distance used to gate color-adaptation revert:
/// `|ΔH|·1 + |ΔS|·0.5 + |ΔV|·0.5`.
pub fn hsv_diff(a: [f64; 3], b: [f64; 3]) -> f64 {
    hue_delta(a[0], b[0]) + 0.5 * (a[1] - b[1]).abs() + 0.5 * (a[2] - b[2]).abs()
}

/// Whether `pixel` falls inside the in-range filter built from `center ±
/// band`, with hue treated circularly. Mirrors the whole-image `in_range`
/// filter applied by the vision layer, at the single-pixel level.
pub fn in_hsv_range(pixel: [f64; 3], center: [f64; 3], band: [f64; 3]) -> bool {
    hue_delta(pixel[0], center[0]) <= band[0]
        && (pixel[1] - center[1]).abs() <= band[1]
        && (pixel[2] - center[2]).abs() <= band[2]
}

/// Fixed HSV half-widths used for every in-range filter built around an
/// estimated sphere color.
pub const HSV_BAND: [f64; 3] = [12.0, 85.0, 85.0];

/// A candidate illumination color in the palette.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaletteColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub used: bool,
}

impl PaletteColor {
    const fn free(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, used: false }
    }

    pub fn rgb(&self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

/// Ordered set of candidate illumination colors, each free or in-use.
///
/// Insertion order is fixed (magenta, cyan, blue) so allocation is
/// deterministic: `pick_free` always returns the first free entry in that
/// order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColorRegistry {
    entries: Vec<PaletteColor>,
}

impl Default for ColorRegistry {
    fn default() -> Self {
        Self {
            entries: vec![
                PaletteColor::free(255, 0, 255), // magenta
                PaletteColor::free(0, 255, 255), // cyan
                PaletteColor::free(0, 0, 255),   // blue
            ],
        }
    }
}

impl ColorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// First free entry in fixed insertion order, or `None` if every
    /// candidate color is in use.
    pub fn pick_free(&self) -> Option<[u8; 3]> {
        self.entries.iter().find(|c| !c.used).map(|c| c.rgb())
    }

    /// Exact match on the 8-bit RGB triple.
    pub fn find(&self, rgb: [u8; 3]) -> Option<&PaletteColor> {
        self.entries
            .iter()
            .find(|c| c.r == rgb[0] && c.g == rgb[1] && c.b == rgb[2])
    }

    /// Flip the `used` flag of the entry matching `rgb`, if any.
    pub fn mark(&mut self, rgb: [u8; 3], used: bool) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|c| c.r == rgb[0] && c.g == rgb[1] && c.b == rgb[2])
        {
            entry.used = used;
        }
    }

    pub fn used_count(&self) -> usize {
        self.entries.iter().filter(|c| c.used).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PaletteColor> {
        self.entries.iter()
    }
}
