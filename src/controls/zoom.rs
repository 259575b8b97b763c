//! Zoom control
//!
//! Zoom requests are total: every input maps to a valid level inside the
//! device range, so the operation can never fail back to the caller.

use crate::state::ZoomRange;

/// Smallest zoom any lens reports.
pub const MIN_ZOOM: f32 = 1.0;

/// Sanitize a device-reported range. The floor is pinned at 1.0 and the
/// ceiling never sits below the floor.
pub fn sanitize_range(raw: (f32, f32)) -> ZoomRange {
    let (raw_min, raw_max) = raw;
    let min = if raw_min.is_finite() {
        raw_min.max(MIN_ZOOM)
    } else {
        MIN_ZOOM
    };
    let max = if raw_max.is_finite() { raw_max.max(min) } else { min };
    ZoomRange { min, max }
}

/// Clamp a requested level into the range. Non-finite requests land on the
/// range floor.
pub fn clamp_level(range: ZoomRange, requested: f32) -> f32 {
    if !requested.is_finite() {
        return range.min;
    }
    requested.clamp(range.min, range.max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_inside_range_is_identity() {
        let range = ZoomRange { min: 1.0, max: 6.0 };
        assert_eq!(clamp_level(range, 3.5), 3.5);
    }

    #[test]
    fn test_clamp_is_total() {
        let range = ZoomRange { min: 1.0, max: 6.0 };
        assert_eq!(clamp_level(range, 99.0), 6.0);
        assert_eq!(clamp_level(range, 0.1), 1.0);
        assert_eq!(clamp_level(range, -4.0), 1.0);
        assert_eq!(clamp_level(range, f32::NAN), 1.0);
        assert_eq!(clamp_level(range, f32::INFINITY), 1.0);
    }

    #[test]
    fn test_sanitize_pins_floor_at_one() {
        let range = sanitize_range((0.5, 8.0));
        assert_eq!(range.min, 1.0);
        assert_eq!(range.max, 8.0);
    }

    #[test]
    fn test_sanitize_degenerate_ranges() {
        let inverted = sanitize_range((4.0, 2.0));
        assert_eq!(inverted.min, 4.0);
        assert_eq!(inverted.max, 4.0);

        let bogus = sanitize_range((f32::NAN, f32::NAN));
        assert_eq!(bogus.min, 1.0);
        assert_eq!(bogus.max, 1.0);
    }
}
