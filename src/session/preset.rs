//! Quality presets
//!
//! Ordered resolution tiers the session asks the hardware for. When a tier
//! is rejected the session walks down the ladder until one sticks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Capture quality tier, lowest to highest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "camelCase")]
pub enum QualityPreset {
    Low,
    Medium,
    #[default]
    High,
    VeryHigh,
    UltraHigh,
    Max,
}

impl QualityPreset {
    /// Every tier, lowest first.
    pub const ALL: [QualityPreset; 6] = [
        QualityPreset::Low,
        QualityPreset::Medium,
        QualityPreset::High,
        QualityPreset::VeryHigh,
        QualityPreset::UltraHigh,
        QualityPreset::Max,
    ];

    /// Nominal landscape dimensions a tier targets. `Max` has none: it asks
    /// for the highest format the device offers.
    pub fn nominal_size(self) -> Option<(u32, u32)> {
        match self {
            QualityPreset::Low => Some((320, 240)),
            QualityPreset::Medium => Some((640, 480)),
            QualityPreset::High => Some((1280, 720)),
            QualityPreset::VeryHigh => Some((1920, 1080)),
            QualityPreset::UltraHigh => Some((3840, 2160)),
            QualityPreset::Max => None,
        }
    }

    /// Tiers to try for this requested tier, highest first, ending at `Low`.
    pub fn fallback_ladder(self) -> impl Iterator<Item = QualityPreset> {
        Self::ALL
            .iter()
            .rev()
            .copied()
            .filter(move |tier| *tier <= self)
    }
}

impl fmt::Display for QualityPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QualityPreset::Low => "low",
            QualityPreset::Medium => "medium",
            QualityPreset::High => "high",
            QualityPreset::VeryHigh => "veryHigh",
            QualityPreset::UltraHigh => "ultraHigh",
            QualityPreset::Max => "max",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ladder_walks_down_from_requested() {
        let ladder: Vec<_> = QualityPreset::VeryHigh.fallback_ladder().collect();
        assert_eq!(
            ladder,
            vec![
                QualityPreset::VeryHigh,
                QualityPreset::High,
                QualityPreset::Medium,
                QualityPreset::Low,
            ]
        );
    }

    #[test]
    fn test_ladder_from_low_is_just_low() {
        let ladder: Vec<_> = QualityPreset::Low.fallback_ladder().collect();
        assert_eq!(ladder, vec![QualityPreset::Low]);
    }

    #[test]
    fn test_tier_ordering() {
        assert!(QualityPreset::Low < QualityPreset::Max);
        assert!(QualityPreset::High < QualityPreset::VeryHigh);
    }

    #[test]
    fn test_display_matches_serde_names() {
        assert_eq!(QualityPreset::VeryHigh.to_string(), "veryHigh");
        let json = serde_json::to_string(&QualityPreset::VeryHigh).unwrap();
        assert_eq!(json, r#""veryHigh""#);
    }
}
