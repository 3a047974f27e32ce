// 🎨 Color Scale - continuous sequential palette + legend buckets
//
// Values are clamped to [min, max] before lookup, so anything outside the
// observed range maps to the first or last stop and never indexes past the
// palette.

use serde::{Deserialize, Serialize};

/// ColorBrewer "Blues", light → dark
pub const BLUES: [&str; 5] = ["#eff3ff", "#bdd7e7", "#6baed6", "#3182bd", "#08519c"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    /// Parse "#rrggbb"; anything else is black
    pub fn from_hex(hex: &str) -> Self {
        let digits = hex.trim_start_matches('#');
        let channel = |i: usize| {
            digits
                .get(i..i + 2)
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .unwrap_or(0)
        };
        Rgb {
            r: channel(0),
            g: channel(2),
            b: channel(4),
        }
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Rec. 601 luma
    pub fn luma(&self) -> f64 {
        0.299 * self.r as f64 + 0.587 * self.g as f64 + 0.114 * self.b as f64
    }

    fn lerp(&self, other: &Rgb, t: f64) -> Rgb {
        let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
        Rgb {
            r: mix(self.r, other.r),
            g: mix(self.g, other.g),
            b: mix(self.b, other.b),
        }
    }
}

// ============================================================================
// LEGEND
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegendBucket {
    pub lower: f64,

    /// None for the open-ended "max+" bucket
    pub upper: Option<f64>,

    pub label: String,
    pub color: String,
}

// ============================================================================
// COLOR SCALE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorScale {
    min: f64,
    max: f64,
    stops: Vec<Rgb>,
}

impl ColorScale {
    /// Scale over [min, max] with the default palette.
    ///
    /// A degenerate range is widened: min == max != 0 gets max = min + 1
    /// (or a few ulps of min when 1 would be absorbed), min == 0 gets
    /// max = ε. Non-finite bounds count as 0. Afterwards max > min always.
    pub fn new(min: f64, max: f64) -> Self {
        Self::with_palette(min, max, &BLUES)
    }

    pub fn with_palette(min: f64, max: f64, palette: &[&str]) -> Self {
        let mut min = if min.is_finite() { min } else { 0.0 };
        let mut max = if max.is_finite() { max } else { 0.0 };

        if min >= max {
            let step = if min != 0.0 {
                f64::max(1.0, min.abs() * f64::EPSILON * 4.0)
            } else {
                f64::EPSILON
            };
            max = min + step;
            if !max.is_finite() {
                // No room above f64::MAX; widen downwards
                max = min;
                min = max - step;
            }
        }

        let mut stops: Vec<Rgb> = palette.iter().map(|h| Rgb::from_hex(h)).collect();
        if stops.is_empty() {
            stops = BLUES.iter().map(|h| Rgb::from_hex(h)).collect();
        }

        ColorScale { min, max, stops }
    }

    /// Scale over the observed range of a column
    pub fn from_values<I: IntoIterator<Item = f64>>(values: I) -> Self {
        let (min, max) = crate::aggregate::value_range(values);
        Self::new(min, max)
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// Interpolated "#rrggbb" for a value, clamped to the scale range
    pub fn color_for(&self, value: f64) -> String {
        self.rgb_for(value).to_hex()
    }

    pub fn rgb_for(&self, value: f64) -> Rgb {
        let v = if value.is_nan() {
            self.min
        } else {
            value.clamp(self.min, self.max)
        };

        let last = self.stops.len() - 1;
        if last == 0 {
            return self.stops[0];
        }

        // Widening by 1 is absorbed at extreme magnitudes; pin those to the first stop
        let span = self.max - self.min;
        let t = if span > 0.0 && span.is_finite() {
            ((v - self.min) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let position = t * last as f64;
        let segment = (position.floor() as usize).min(last - 1);
        let local = position - segment as f64;

        self.stops[segment].lerp(&self.stops[segment + 1], local)
    }

    /// Four quartile buckets of the range plus an open-ended "max+" bucket
    pub fn legend(&self) -> Vec<LegendBucket> {
        let span = self.max - self.min;
        let bounds: Vec<f64> = [0.0, 0.25, 0.5, 0.75, 1.0]
            .iter()
            .map(|q| self.min + span * q)
            .collect();

        let mut buckets: Vec<LegendBucket> = bounds
            .windows(2)
            .map(|w| LegendBucket {
                lower: w[0],
                upper: Some(w[1]),
                label: format!("{:.2} - {:.2}", w[0], w[1]),
                color: self.color_for((w[0] + w[1]) / 2.0),
            })
            .collect();

        buckets.push(LegendBucket {
            lower: self.max,
            upper: None,
            label: format!("{:.2}+", self.max),
            color: self.color_for(self.max),
        });

        buckets
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_endpoints_hit_palette_ends() {
        let scale = ColorScale::new(0.0, 40.0);
        assert_eq!(scale.color_for(0.0), BLUES[0]);
        assert_eq!(scale.color_for(40.0), BLUES[4]);
        assert_eq!(scale.color_for(20.0), BLUES[2]);
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        let scale = ColorScale::new(5.0, 10.0);
        assert_eq!(scale.color_for(-100.0), BLUES[0]);
        assert_eq!(scale.color_for(1e12), BLUES[4]);
        assert_eq!(scale.color_for(f64::INFINITY), BLUES[4]);
        assert_eq!(scale.color_for(f64::NAN), BLUES[0]);
    }

    #[test]
    fn test_degenerate_ranges_are_widened() {
        let equal = ColorScale::new(7.0, 7.0);
        assert_eq!(equal.max(), 8.0);
        assert_eq!(equal.color_for(7.0), BLUES[0]);

        let zero = ColorScale::new(0.0, 0.0);
        assert!(zero.max() > zero.min());
        assert_eq!(zero.color_for(0.0), BLUES[0]);

        let inverted = ColorScale::new(3.0, 1.0);
        assert!(inverted.max() > inverted.min());

        let nan = ColorScale::new(f64::NAN, f64::NAN);
        assert!(nan.max() > nan.min());
    }

    #[test]
    fn test_huge_degenerate_ranges_stay_increasing() {
        for v in [1e20, -1e20, 9.007_199_254_740_993e15, f64::MAX, f64::MIN] {
            let scale = ColorScale::new(v, v);
            assert!(scale.max() > scale.min(), "range collapsed at {v}");
            assert!(scale.max().is_finite() && scale.min().is_finite());
            assert_eq!(scale.color_for(scale.min()), BLUES[0]);
            assert_eq!(scale.color_for(scale.max()), BLUES[4]);
        }
    }

    #[test]
    fn test_legend_has_quartiles_and_open_bucket() {
        let scale = ColorScale::new(0.0, 100.0);
        let legend = scale.legend();

        assert_eq!(legend.len(), 5);
        let lowers: Vec<f64> = legend.iter().map(|b| b.lower).collect();
        assert_eq!(lowers, vec![0.0, 25.0, 50.0, 75.0, 100.0]);
        assert_eq!(legend[0].upper, Some(25.0));
        assert_eq!(legend[0].label, "0.00 - 25.00");
        assert_eq!(legend[4].upper, None);
        assert_eq!(legend[4].label, "100.00+");
        assert_eq!(legend[4].color, BLUES[4]);
    }

    #[test]
    fn test_from_values_uses_observed_range() {
        let scale = ColorScale::from_values(vec![4.0, 2.0, 9.0]);
        assert_eq!(scale.min(), 2.0);
        assert_eq!(scale.max(), 9.0);

        let empty = ColorScale::from_values(Vec::new());
        assert!(empty.max() > empty.min());
    }

    #[test]
    fn test_palette_luma_is_sequential() {
        let lumas: Vec<f64> = BLUES.iter().map(|h| Rgb::from_hex(h).luma()).collect();
        assert!(lumas.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_hex_roundtrip() {
        assert_eq!(Rgb::from_hex("#3182bd").to_hex(), "#3182bd");
        assert_eq!(Rgb::from_hex("nonsense"), Rgb { r: 0, g: 0, b: 0 });
    }

    proptest! {
        #[test]
        fn prop_luma_monotonic(
            min in -1000.0f64..1000.0,
            span in 0.0f64..500.0,
            a in -2000.0f64..2000.0,
            b in -2000.0f64..2000.0,
        ) {
            let scale = ColorScale::new(min, min + span);
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            // Channel rounding can wobble luma by < 1 within a segment
            prop_assert!(scale.rgb_for(lo).luma() + 1.0 >= scale.rgb_for(hi).luma());
        }

        #[test]
        fn prop_color_for_never_panics(v in proptest::num::f64::ANY, lo in proptest::num::f64::ANY, hi in proptest::num::f64::ANY) {
            let hex = ColorScale::new(lo, hi).color_for(v);
            prop_assert_eq!(hex.len(), 7);
        }
    }
}
