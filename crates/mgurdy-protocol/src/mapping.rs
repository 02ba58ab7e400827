use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::MAP_MAX_RANGES;

/// A piecewise-linear mapping from one integer range to another, built from
/// up to [`MAP_MAX_RANGES`] breakpoints `(input, output)` in ascending input
/// order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mapping {
    ranges: Vec<(i32, i32)>,
}

impl Mapping {
    pub fn new(ranges: Vec<(i32, i32)>) -> Result<Self, ConfigError> {
        if ranges.is_empty() {
            return Err(ConfigError::EmptyMapping);
        }
        if ranges.len() > MAP_MAX_RANGES {
            return Err(ConfigError::MappingTooLarge(ranges.len()));
        }
        Ok(Self { ranges })
    }

    pub fn ranges(&self) -> &[(i32, i32)] {
        &self.ranges
    }

    /// Map `x` through the piecewise-linear breakpoints. Values below the
    /// first breakpoint clamp to its output; values above the last clamp to
    /// its output. Values between two breakpoints are interpolated, rounding
    /// up when the input span is larger than the output span and rounding
    /// down (exact proportional) otherwise.
    pub fn map(&self, x: i32) -> i32 {
        if x <= self.ranges[0].0 {
            return self.ranges[0].1;
        }

        for i in 1..self.ranges.len() {
            let (in_max, out_max) = self.ranges[i];
            if x > in_max {
                continue;
            }
            let (in_min, out_min) = self.ranges[i - 1];
            return map_impl(x, in_min, in_max, out_min, out_max);
        }

        self.ranges[self.ranges.len() - 1].1
    }
}

/// Round up if mapping a bigger input range onto a smaller output range,
/// otherwise round down.
fn map_impl(x: i32, in_min: i32, in_max: i32, out_min: i32, out_max: i32) -> i32 {
    if (in_max - in_min) > (out_max - out_min) {
        (x - in_min) * (out_max - out_min + 1) / (in_max - in_min + 1) + out_min
    } else {
        (x - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
    }
}

/// Exponentially smooth `val` towards `prev` using `factor` as the amount of
/// `prev` retained each step, with a floor-bias of one unit towards `val` so
/// that the value always converges exactly instead of asymptotically
/// flattening out one unit short.
pub fn smooth(val: i32, prev: i32, factor: f32) -> i32 {
    if val == prev {
        return val;
    }

    let add = (1.0 - factor) * (val - prev) as f32;
    (prev as f32 + add) as i32 + if val > prev { 1 } else { 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(ranges: &[(i32, i32)]) -> Mapping {
        Mapping::new(ranges.to_vec()).unwrap()
    }

    #[test]
    fn test_empty_mapping_rejected() {
        assert_eq!(Mapping::new(vec![]), Err(ConfigError::EmptyMapping));
    }

    #[test]
    fn test_endpoints_coincide() {
        let map = m(&[(0, 0), (100, 127)]);
        assert_eq!(map.map(0), 0);
        assert_eq!(map.map(100), 127);
    }

    #[test]
    fn test_clamps_outside_range() {
        let map = m(&[(0, 10), (100, 20)]);
        assert_eq!(map.map(-50), 10);
        assert_eq!(map.map(1000), 20);
    }

    #[test]
    fn test_monotonic_nondecreasing_input() {
        let map = m(&[(0, 0), (430, 35), (900, 60), (1400, 75), (2000, 87), (5000, 127)]);
        let mut prev = map.map(0);
        let mut x = 0;
        while x <= 5000 {
            let v = map.map(x);
            assert!(v >= prev, "map({x}) = {v} < previous {prev}");
            prev = v;
            x += 17;
        }
    }

    #[test]
    fn test_compress_rounds_up() {
        // 0..=10 input maps onto 0..=1 output: compressing, so round up.
        let map = m(&[(0, 0), (10, 1)]);
        assert_eq!(map.map(1), 1);
    }

    #[test]
    fn test_smooth_converges_exactly() {
        let mut prev = 0;
        for _ in 0..200 {
            prev = smooth(1000, prev, 0.9);
        }
        assert_eq!(prev, 1000);
    }

    #[test]
    fn test_smooth_no_change_when_equal() {
        assert_eq!(smooth(42, 42, 0.5), 42);
    }

    #[test]
    fn test_smooth_moves_towards_target() {
        let next = smooth(100, 0, 0.9);
        assert!(next > 0 && next < 100);
    }

    #[test]
    fn test_smooth_converges_exactly_decreasing() {
        let mut prev = 1000;
        for _ in 0..200 {
            prev = smooth(0, prev, 0.9);
        }
        assert_eq!(prev, 0);
    }

    #[test]
    fn test_smooth_decreasing_fractional_step_reaches_zero() {
        // A decreasing step whose fractional delta truncates to zero if the
        // float subtraction is computed after truncating `add` to i32 --
        // `add = (1.0 - 0.8) * (0 - 1) = -0.2`, which must still move `prev`
        // down to 0 on the very next step, not stall.
        assert_eq!(smooth(0, 1, 0.8), 0);
    }
}
