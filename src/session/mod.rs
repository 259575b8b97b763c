//! Capture session
//!
//! Wiring between a resolved lens and a live device: lens fallback, the
//! quality preset ladder, stream start and the state one configured input
//! carries. Sessions are owned by the controller behind its async lock;
//! nothing here is concurrent on its own.

pub mod preset;

use crate::catalog::{DeviceCatalog, LensDescriptor, LensId, LensPosition};
use crate::controls::FlashEngine;
use crate::error::CameraError;
use crate::hardware::{AudioSource, CameraBackend, CameraDevice, FrameSender};
use crate::state::LensMetadata;
use preset::QualityPreset;

/// A configured input: the device, what it was resolved from and everything
/// that must survive a lens switch.
pub(crate) struct ActiveSession {
    pub descriptor: LensDescriptor,

    /// Preset tier actually applied, at or below the requested one.
    pub preset: QualityPreset,

    pub device: Box<dyn CameraDevice>,
    pub audio: Option<Box<dyn AudioSource>>,
    pub flash: FlashEngine,
    pub metadata: LensMetadata,

    /// Renderer texture the preview is bound to.
    pub texture: u64,

    pub allow_screen_flash: bool,
    pub mirror_front: bool,
}

/// Resolve `requested` against the catalog, walking the lens fallback chain
/// when it is missing: back wide first, then front wide.
pub(crate) fn resolve_lens(
    catalog: &DeviceCatalog,
    requested: LensId,
) -> Result<LensDescriptor, CameraError> {
    if catalog.is_empty() {
        return Err(CameraError::NoDevice);
    }
    if let Some(descriptor) = catalog.resolve(requested) {
        return Ok(*descriptor);
    }
    for fallback in [LensId::BACK_WIDE, LensId::FRONT_WIDE] {
        if let Some(descriptor) = catalog.resolve(fallback) {
            tracing::warn!("lens {requested} unavailable, falling back to {fallback}");
            return Ok(*descriptor);
        }
    }
    Err(CameraError::NoDeviceForLens { lens: requested })
}

/// Open `lens` at the highest tier the device accepts, starting from
/// `preset` and walking down. Only preset rejections continue the walk.
pub(crate) async fn open_with_fallback(
    backend: &dyn CameraBackend,
    lens: LensId,
    preset: QualityPreset,
) -> Result<(Box<dyn CameraDevice>, QualityPreset), CameraError> {
    for tier in preset.fallback_ladder() {
        match backend.open(lens, tier).await {
            Ok(device) => {
                if tier != preset {
                    tracing::warn!("preset {preset} not accepted on {lens}, applied {tier}");
                }
                return Ok((device, tier));
            }
            Err(CameraError::PresetRejected { .. }) => {
                tracing::debug!("preset {tier} rejected on {lens}, trying next tier");
            }
            Err(e) => return Err(e),
        }
    }
    Err(CameraError::PresetRejected { preset, lens })
}

/// Open the physical lens behind `descriptor`, start its stream into
/// `frames` tagged with `epoch`, and apply front mirroring when asked.
pub(crate) async fn wire_input(
    backend: &dyn CameraBackend,
    descriptor: LensDescriptor,
    preset: QualityPreset,
    epoch: u64,
    frames: FrameSender,
    mirror_front: bool,
) -> Result<(Box<dyn CameraDevice>, QualityPreset, LensMetadata), CameraError> {
    let (mut device, applied) = open_with_fallback(backend, descriptor.backing, preset).await?;
    device.start_stream(epoch, frames)?;

    if mirror_front
        && descriptor.id.position == LensPosition::Front
        && !device.set_mirrored(true)
    {
        tracing::warn!("mirroring requested but unsupported on {}", descriptor.id);
    }

    let metadata = LensMetadata::from_optics(device.optics());
    Ok((device, applied, metadata))
}
