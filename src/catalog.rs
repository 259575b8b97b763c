//! Lens catalog
//!
//! Enumerates the lens/position combinations the hardware exposes and the
//! capability flags derived from them. The catalog is built once at
//! controller construction; everything after that is a pure lookup.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Which side of the device a lens faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LensPosition {
    Front,
    Back,
}

/// Optical class of a lens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LensKind {
    Wide,
    UltraWide,
    Telephoto,
    Macro,
}

/// Identifies one selectable lens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LensId {
    pub position: LensPosition,
    pub kind: LensKind,
}

impl LensId {
    pub const BACK_WIDE: LensId = LensId {
        position: LensPosition::Back,
        kind: LensKind::Wide,
    };

    pub const FRONT_WIDE: LensId = LensId {
        position: LensPosition::Front,
        kind: LensKind::Wide,
    };

    pub const BACK_ULTRA_WIDE: LensId = LensId {
        position: LensPosition::Back,
        kind: LensKind::UltraWide,
    };

    pub const BACK_MACRO: LensId = LensId {
        position: LensPosition::Back,
        kind: LensKind::Macro,
    };

    pub fn new(position: LensPosition, kind: LensKind) -> Self {
        Self { position, kind }
    }
}

impl fmt::Display for LensId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let position = match self.position {
            LensPosition::Front => "front",
            LensPosition::Back => "back",
        };
        let kind = match self.kind {
            LensKind::Wide => "wide",
            LensKind::UltraWide => "ultra-wide",
            LensKind::Telephoto => "telephoto",
            LensKind::Macro => "macro",
        };
        write!(f, "{position}-{kind}")
    }
}

/// One lens the catalog exposes, with its capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LensDescriptor {
    /// Identifier callers select by.
    pub id: LensId,

    /// Physical lens that backs this entry. Differs from `id` only for the
    /// derived macro variant, which reuses the back ultra-wide hardware.
    pub backing: LensId,

    pub has_torch: bool,
    pub has_autofocus: bool,
    pub supports_focus_point: bool,
    pub supports_exposure_point: bool,
}

impl LensDescriptor {
    /// Descriptor for a physical lens with no capabilities claimed.
    pub fn physical(id: LensId) -> Self {
        Self {
            id,
            backing: id,
            has_torch: false,
            has_autofocus: false,
            supports_focus_point: false,
            supports_exposure_point: false,
        }
    }
}

/// Immutable view of the lenses the hardware exposed at construction time.
#[derive(Debug, Clone, Default)]
pub struct DeviceCatalog {
    lenses: Vec<LensDescriptor>,
}

impl DeviceCatalog {
    /// Build the catalog from a raw hardware enumeration.
    ///
    /// Duplicate ids keep their first occurrence. A back ultra-wide lens
    /// with autofocus is additionally exposed as a macro lens backed by the
    /// same hardware.
    pub fn from_hardware(raw: Vec<LensDescriptor>) -> Self {
        let mut seen = HashSet::new();
        let mut lenses: Vec<LensDescriptor> = raw
            .into_iter()
            .filter(|lens| seen.insert(lens.id))
            .collect();

        let macro_base = lenses
            .iter()
            .find(|lens| lens.id == LensId::BACK_ULTRA_WIDE && lens.has_autofocus)
            .copied();
        if let Some(base) = macro_base {
            if seen.insert(LensId::BACK_MACRO) {
                lenses.push(LensDescriptor {
                    id: LensId::BACK_MACRO,
                    backing: base.id,
                    ..base
                });
            }
        }

        Self { lenses }
    }

    pub fn resolve(&self, lens: LensId) -> Option<&LensDescriptor> {
        self.lenses.iter().find(|entry| entry.id == lens)
    }

    pub fn descriptors(&self) -> &[LensDescriptor] {
        &self.lenses
    }

    /// Every selectable lens id, in enumeration order.
    pub fn available(&self) -> Vec<LensId> {
        self.lenses.iter().map(|entry| entry.id).collect()
    }

    pub fn has_front(&self) -> bool {
        self.lenses
            .iter()
            .any(|entry| entry.id.position == LensPosition::Front)
    }

    pub fn has_back(&self) -> bool {
        self.lenses
            .iter()
            .any(|entry| entry.id.position == LensPosition::Back)
    }

    pub fn is_empty(&self) -> bool {
        self.lenses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn back_ultra_wide_af() -> LensDescriptor {
        LensDescriptor {
            has_autofocus: true,
            ..LensDescriptor::physical(LensId::BACK_ULTRA_WIDE)
        }
    }

    #[test]
    fn test_macro_derived_from_autofocus_ultra_wide() {
        let catalog = DeviceCatalog::from_hardware(vec![
            LensDescriptor::physical(LensId::BACK_WIDE),
            back_ultra_wide_af(),
        ]);

        let derived = catalog.resolve(LensId::BACK_MACRO).unwrap();
        assert_eq!(derived.backing, LensId::BACK_ULTRA_WIDE);
        assert!(derived.has_autofocus);
        assert_eq!(catalog.available().len(), 3);
    }

    #[test]
    fn test_no_macro_without_autofocus() {
        let catalog = DeviceCatalog::from_hardware(vec![LensDescriptor::physical(
            LensId::BACK_ULTRA_WIDE,
        )]);
        assert!(catalog.resolve(LensId::BACK_MACRO).is_none());
    }

    #[test]
    fn test_hardware_macro_wins_over_derived() {
        let hardware_macro = LensDescriptor::physical(LensId::BACK_MACRO);
        let catalog =
            DeviceCatalog::from_hardware(vec![hardware_macro, back_ultra_wide_af()]);

        let resolved = catalog.resolve(LensId::BACK_MACRO).unwrap();
        assert_eq!(resolved.backing, LensId::BACK_MACRO);
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let mut second = LensDescriptor::physical(LensId::BACK_WIDE);
        second.has_torch = true;
        let catalog = DeviceCatalog::from_hardware(vec![
            LensDescriptor::physical(LensId::BACK_WIDE),
            second,
        ]);

        assert_eq!(catalog.available().len(), 1);
        assert!(!catalog.resolve(LensId::BACK_WIDE).unwrap().has_torch);
    }

    #[test]
    fn test_position_queries() {
        let catalog =
            DeviceCatalog::from_hardware(vec![LensDescriptor::physical(LensId::FRONT_WIDE)]);
        assert!(catalog.has_front());
        assert!(!catalog.has_back());
        assert!(!catalog.is_empty());
        assert!(DeviceCatalog::from_hardware(Vec::new()).is_empty());
    }

    #[test]
    fn test_lens_id_display() {
        assert_eq!(LensId::BACK_ULTRA_WIDE.to_string(), "back-ultra-wide");
        assert_eq!(LensId::FRONT_WIDE.to_string(), "front-wide");
    }

    #[test]
    fn test_lens_id_serializes_camel_case() {
        let json = serde_json::to_string(&LensId::BACK_ULTRA_WIDE).unwrap();
        assert_eq!(json, r#"{"position":"back","kind":"ultraWide"}"#);
    }
}
