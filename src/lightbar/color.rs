//! Color math for the lightbar: hue conversion and linear blending.
//!
//! Everything in here is pure. Callers pass colors by value and get a new
//! color back, so no per-device state leaks into these helpers.

use serde::{Deserialize, Serialize};

/// 8-bit RGB color as written to the controller lightbar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Color {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Color {
    pub const BLACK: Color = Color::new(0, 0, 0);
    pub const RED: Color = Color::new(255, 0, 0);

    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    /// True when at least one channel is lit
    pub fn is_set(&self) -> bool {
        self.red != 0 || self.green != 0 || self.blue != 0
    }

    /// Brightest of the three channels
    pub fn max_channel(&self) -> u8 {
        self.red.max(self.green).max(self.blue)
    }
}

/// Converts a hue in degrees to a fully bright color with the given saturation.
///
/// The hue is split into six 60° sectors. Anything outside `[0, 360)`,
/// NaN included, comes back as pure red.
pub fn hue_to_color(hue: f32, sat: u8) -> Color {
    let c = sat;
    let x = (f32::from(c) * (1.0 - ((hue / 60.0) % 2.0 - 1.0).abs())) as u8;

    match hue {
        h if (0.0..60.0).contains(&h) => Color::new(c, x, 0),
        h if (60.0..120.0).contains(&h) => Color::new(x, c, 0),
        h if (120.0..180.0).contains(&h) => Color::new(0, c, x),
        h if (180.0..240.0).contains(&h) => Color::new(0, x, c),
        h if (240.0..300.0).contains(&h) => Color::new(x, 0, c),
        h if (300.0..360.0).contains(&h) => Color::new(c, 0, x),
        _ => Color::RED,
    }
}

/// Blends `from` toward `to`. `ratio` is a percentage and gets clamped to `[0, 100]`.
pub fn transition(from: Color, to: Color, ratio: f64) -> Color {
    let ratio = if ratio.is_nan() {
        0.0
    } else {
        ratio.clamp(0.0, 100.0) * 0.01
    };

    Color::new(
        blend_channel(from.red, to.red, ratio),
        blend_channel(from.green, to.green, ratio),
        blend_channel(from.blue, to.blue, ratio),
    )
}

fn blend_channel(from: u8, to: u8, ratio: f64) -> u8 {
    (f64::from(from) * (1.0 - ratio) + f64::from(to) * ratio).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn primary_hues_map_to_primaries() {
        assert_eq!(hue_to_color(0.0, 255), Color::new(255, 0, 0));
        assert_eq!(hue_to_color(120.0, 255), Color::new(0, 255, 0));
        assert_eq!(hue_to_color(240.0, 255), Color::new(0, 0, 255));
    }

    #[test]
    fn secondary_hues_mix_two_channels() {
        assert_eq!(hue_to_color(60.0, 255), Color::new(255, 255, 0));
        assert_eq!(hue_to_color(180.0, 255), Color::new(0, 255, 255));
        assert_eq!(hue_to_color(300.0, 255), Color::new(255, 0, 255));
        assert_eq!(hue_to_color(30.0, 255), Color::new(255, 127, 0));
    }

    #[test]
    fn saturation_scales_peak_channel() {
        assert_eq!(hue_to_color(0.0, 100), Color::new(100, 0, 0));
        assert_eq!(hue_to_color(240.0, 0), Color::BLACK);
    }

    #[test]
    fn out_of_domain_hue_falls_back_to_red() {
        assert_eq!(hue_to_color(360.0, 10), Color::RED);
        assert_eq!(hue_to_color(-1.0, 10), Color::RED);
        assert_eq!(hue_to_color(f32::NAN, 10), Color::RED);
    }

    #[test]
    fn transition_clamps_ratio() {
        let a = Color::new(10, 20, 30);
        let b = Color::new(200, 100, 0);
        assert_eq!(transition(a, b, -40.0), a);
        assert_eq!(transition(a, b, 250.0), b);
        assert_eq!(transition(a, b, f64::NAN), a);
        assert_eq!(transition(a, b, 50.0), Color::new(105, 60, 15));
    }

    fn any_color() -> impl Strategy<Value = Color> {
        (any::<u8>(), any::<u8>(), any::<u8>()).prop_map(|(r, g, b)| Color::new(r, g, b))
    }

    proptest! {
        #[test]
        fn transition_hits_both_endpoints(a in any_color(), b in any_color()) {
            prop_assert_eq!(transition(a, b, 0.0), a);
            prop_assert_eq!(transition(a, b, 100.0), b);
        }

        #[test]
        fn transition_is_monotonic_per_channel(
            a in any_color(),
            b in any_color(),
            lo in 0.0f64..=100.0,
            hi in 0.0f64..=100.0,
        ) {
            let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            let first = transition(a, b, lo);
            let second = transition(a, b, hi);
            for (from, to, x, y) in [
                (a.red, b.red, first.red, second.red),
                (a.green, b.green, first.green, second.green),
                (a.blue, b.blue, first.blue, second.blue),
            ] {
                if from <= to {
                    prop_assert!(x <= y);
                } else {
                    prop_assert!(x >= y);
                }
            }
        }
    }
}
