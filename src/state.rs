//! Controller state snapshots
//!
//! `CaptureState` is the immutable value handed to callers. Every query
//! rebuilds it from live session state under the session lock, so a snapshot
//! always reflects operations that completed before it was taken.

use crate::catalog::LensId;
use crate::hardware::DeviceOptics;
use crate::session::preset::QualityPreset;
use serde::{Deserialize, Serialize};

/// Flash/torch behavior selector.
///
/// `On` is equivalent to `Torch` here: a video controller has no still
/// exposure to fire a one-shot flash for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum FlashMode {
    #[default]
    Off,
    Auto,
    On,
    Torch,
}

/// Zoom limits of the active lens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoomRange {
    pub min: f32,
    pub max: f32,
}

impl Default for ZoomRange {
    fn default() -> Self {
        Self { min: 1.0, max: 1.0 }
    }
}

/// Optical metadata sampled from the active device at wiring time.
///
/// Fields the hardware cannot report stay `None`; nothing is estimated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LensMetadata {
    /// Aperture f-number.
    pub aperture: Option<f32>,

    /// Sensor pixel-array dimensions.
    pub pixel_array_width: Option<u32>,
    pub pixel_array_height: Option<u32>,

    /// Horizontal field of view in degrees.
    pub field_of_view_deg: Option<f32>,

    /// 35mm-equivalent focal length, derived from the field of view.
    pub focal_length_35mm: Option<f32>,
}

impl LensMetadata {
    /// Build from raw device optics. The 35mm equivalent comes from the
    /// horizontal field of view against the 36mm reference frame width.
    pub fn from_optics(optics: DeviceOptics) -> Self {
        let focal_length_35mm = optics.horizontal_fov_deg.and_then(|fov| {
            if fov > 0.0 && fov < 180.0 {
                Some(18.0 / (fov.to_radians() / 2.0).tan())
            } else {
                None
            }
        });

        Self {
            aperture: optics.aperture,
            pixel_array_width: optics.pixel_array.map(|(w, _)| w),
            pixel_array_height: optics.pixel_array.map(|(_, h)| h),
            field_of_view_deg: optics.horizontal_fov_deg,
            focal_length_35mm,
        }
    }
}

/// Snapshot of the controller at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureState {
    pub initialized: bool,
    pub is_recording: bool,
    pub preview_paused: bool,

    /// Active lens, present once initialized.
    pub lens: Option<LensId>,

    /// Every lens the catalog exposes.
    pub available_lenses: Vec<LensId>,

    /// Quality tier actually in effect, which may sit below the requested
    /// one after preset fallback.
    pub quality_preset: Option<QualityPreset>,

    pub flash_mode: FlashMode,
    pub zoom: f32,
    pub zoom_range: ZoomRange,

    /// Width over height of the portrait-oriented preview.
    pub aspect_ratio: f32,
    pub preview_width: u32,
    pub preview_height: u32,

    pub has_flash: bool,
    pub has_front_lens: bool,
    pub has_back_lens: bool,
    pub supports_focus_point: bool,
    pub supports_exposure_point: bool,

    /// Renderer texture handle, present once the session is confirmed
    /// running.
    pub texture_id: Option<u64>,

    pub metadata: Option<LensMetadata>,
}

/// Outcome of a finished recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingResult {
    /// Container path on disk.
    pub path: String,

    /// Wall-clock time between recording start and stop.
    pub duration_ms: u64,

    /// Dimensions of the written video track.
    pub width: u32,
    pub height: u32,
}

/// Events the controller emits outside of direct call results.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    /// A max-duration deadline stopped the recording. Carries the same
    /// result a manual stop would have returned.
    RecordingAutoStopped(RecordingResult),

    /// A deadline-triggered stop failed.
    RecordingError(String),
}
