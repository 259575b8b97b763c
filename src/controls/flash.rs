//! Flash and torch control
//!
//! Three light paths: the hardware torch on lenses that have one, a
//! display-brightness substitute for front lenses, and the `Auto` mode's
//! one-shot darkness check at recording start. Stopping a recording always
//! clears the back torch, even when the heuristic never engaged it, so no
//! stop path can leave the light burning.

use crate::catalog::{LensDescriptor, LensPosition};
use crate::hardware::{CameraDevice, ExposureTelemetry, ScreenBrightness};
use crate::state::FlashMode;
use std::sync::Arc;
use std::time::Duration;

/// Darkness thresholds for the auto check. The front pair sits lower, so it
/// trips earlier.
const BACK_GAIN_THRESHOLD: f32 = 500.0;
const BACK_EXPOSURE_THRESHOLD: Duration = Duration::from_micros(50_000);
const FRONT_GAIN_THRESHOLD: f32 = 320.0;
const FRONT_EXPOSURE_THRESHOLD: Duration = Duration::from_micros(33_333);

/// Whether the scene reads dark enough to need light: high gain or a long
/// exposure, judged against the per-position thresholds.
pub fn is_dark(position: LensPosition, telemetry: ExposureTelemetry) -> bool {
    let (gain_threshold, exposure_threshold) = match position {
        LensPosition::Back => (BACK_GAIN_THRESHOLD, BACK_EXPOSURE_THRESHOLD),
        LensPosition::Front => (FRONT_GAIN_THRESHOLD, FRONT_EXPOSURE_THRESHOLD),
    };
    telemetry.gain >= gain_threshold || telemetry.exposure >= exposure_threshold
}

/// Whether any light source exists for this lens.
pub fn flash_available(
    descriptor: &LensDescriptor,
    allow_screen_flash: bool,
    has_brightness_control: bool,
) -> bool {
    descriptor.has_torch
        || (descriptor.id.position == LensPosition::Front
            && allow_screen_flash
            && has_brightness_control)
}

/// Light source currently burning, so teardown can undo exactly that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Light {
    Torch,
    Screen,
}

/// Per-session flash state machine. Lives inside the active session and is
/// only touched under the session lock.
pub struct FlashEngine {
    mode: FlashMode,
    brightness: Option<Arc<dyn ScreenBrightness>>,

    /// Display level to restore when the screen flash goes out.
    saved_brightness: Option<f32>,

    /// Light engaged by the auto heuristic at recording start.
    auto_engaged: Option<Light>,
}

impl FlashEngine {
    pub fn new(brightness: Option<Arc<dyn ScreenBrightness>>) -> Self {
        Self {
            mode: FlashMode::Off,
            brightness,
            saved_brightness: None,
            auto_engaged: None,
        }
    }

    pub fn mode(&self) -> FlashMode {
        self.mode
    }

    /// Apply a caller-selected mode. Returns whether the active lens can
    /// honor it; on `false` nothing changes.
    pub fn set_mode(
        &mut self,
        mode: FlashMode,
        descriptor: &LensDescriptor,
        allow_screen_flash: bool,
        device: &mut dyn CameraDevice,
    ) -> bool {
        let screen_capable = self.screen_capable(descriptor, allow_screen_flash);

        match mode {
            FlashMode::Off => {
                self.extinguish(descriptor, device);
                self.mode = FlashMode::Off;
                true
            }
            FlashMode::Auto => {
                if !descriptor.has_torch && !screen_capable {
                    return false;
                }
                self.extinguish(descriptor, device);
                self.mode = FlashMode::Auto;
                true
            }
            FlashMode::On | FlashMode::Torch => {
                let torch_lit = descriptor.has_torch && device.set_torch(true);
                if !torch_lit {
                    if !screen_capable {
                        return false;
                    }
                    self.engage_screen();
                }
                self.auto_engaged = None;
                self.mode = mode;
                tracing::info!("flash engaged on {} (mode {:?})", descriptor.id, mode);
                true
            }
        }
    }

    /// One-shot darkness check, run at the moment recording starts.
    pub fn on_recording_start(
        &mut self,
        descriptor: &LensDescriptor,
        allow_screen_flash: bool,
        device: &mut dyn CameraDevice,
    ) {
        if self.mode != FlashMode::Auto {
            return;
        }

        let telemetry = device.telemetry();
        if !is_dark(descriptor.id.position, telemetry) {
            return;
        }

        match descriptor.id.position {
            LensPosition::Back if descriptor.has_torch => {
                if device.set_torch(true) {
                    self.auto_engaged = Some(Light::Torch);
                    tracing::info!(
                        "auto flash engaged torch (gain {:.0}, exposure {:?})",
                        telemetry.gain,
                        telemetry.exposure
                    );
                }
            }
            LensPosition::Front if self.screen_capable(descriptor, allow_screen_flash) => {
                self.engage_screen();
                self.auto_engaged = Some(Light::Screen);
                tracing::info!(
                    "auto flash engaged screen (gain {:.0}, exposure {:?})",
                    telemetry.gain,
                    telemetry.exposure
                );
            }
            _ => {}
        }
    }

    /// Undo recording-time light. The back torch is cleared regardless of
    /// who lit it; the front screen flash only when the heuristic did.
    pub fn on_recording_stop(
        &mut self,
        descriptor: &LensDescriptor,
        device: &mut dyn CameraDevice,
    ) {
        match descriptor.id.position {
            LensPosition::Back => {
                if descriptor.has_torch {
                    let _ = device.set_torch(false);
                }
                self.auto_engaged = None;
            }
            LensPosition::Front => {
                if self.auto_engaged == Some(Light::Screen) {
                    self.restore_screen();
                    self.auto_engaged = None;
                }
            }
        }
    }

    /// Force every light source off and reset the mode. Runs before a lens
    /// switch and at release, so no flash state crosses a session boundary.
    pub fn quiesce(&mut self, descriptor: &LensDescriptor, device: &mut dyn CameraDevice) {
        self.extinguish(descriptor, device);
        self.mode = FlashMode::Off;
    }

    fn extinguish(&mut self, descriptor: &LensDescriptor, device: &mut dyn CameraDevice) {
        if descriptor.has_torch {
            let _ = device.set_torch(false);
        }
        self.restore_screen();
        self.auto_engaged = None;
    }

    fn screen_capable(&self, descriptor: &LensDescriptor, allow_screen_flash: bool) -> bool {
        descriptor.id.position == LensPosition::Front
            && allow_screen_flash
            && self.brightness.is_some()
    }

    fn engage_screen(&mut self) {
        if let Some(control) = &self.brightness {
            if self.saved_brightness.is_none() {
                self.saved_brightness = Some(control.brightness());
            }
            control.set_brightness(1.0);
        }
    }

    fn restore_screen(&mut self) {
        if let Some(previous) = self.saved_brightness.take() {
            if let Some(control) = &self.brightness {
                control.set_brightness(previous);
            }
        }
    }
}
