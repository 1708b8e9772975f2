//! Participant colors.
//!
//! Colors are allocated by the relay, never generated by clients, so two
//! participants in one room never share a color. A color is derived from a
//! small palette index: hues are spread with the golden ratio so that every
//! index maps to a different hue.

use serde::{Deserialize, Serialize};

/// Golden ratio conjugate, used to spread consecutive hues.
const GOLDEN_RATIO_CONJUGATE: f32 = 0.618_034;

/// RGB color with components in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Distinct, vivid color for palette slot `index`.
    pub fn from_index(index: u32) -> Self {
        let hue = (index as f32 * GOLDEN_RATIO_CONJUGATE).fract();
        let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.55);
        Self { r, g, b }
    }

    /// `#rrggbb` notation, as consumed by the HTML overlays.
    pub fn to_hex(&self) -> String {
        let c = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        format!("#{:02x}{:02x}{:02x}", c(self.r), c(self.g), c(self.b))
    }

    pub fn to_array(&self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }
}

impl Default for Color {
    fn default() -> Self {
        Self { r: 0.26, g: 0.52, b: 0.96 }
    }
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l);
    }

    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;

    (
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 { t += 1.0; }
    if t > 1.0 { t -= 1.0; }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_index_is_stable() {
        assert_eq!(Color::from_index(3), Color::from_index(3));
    }

    #[test]
    fn test_first_indices_are_distinct() {
        let hexes: std::collections::HashSet<String> =
            (0..32).map(|i| Color::from_index(i).to_hex()).collect();
        assert_eq!(hexes.len(), 32);
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(Color::rgb(1.0, 0.0, 0.0).to_hex(), "#ff0000");
        assert_eq!(Color::rgb(0.0, 0.0, 0.0).to_hex(), "#000000");
    }

    #[test]
    fn test_components_in_range() {
        for i in 0..64 {
            let c = Color::from_index(i);
            for v in c.to_array() {
                assert!((0.0..=1.0).contains(&v));
            }
        }
    }
}
