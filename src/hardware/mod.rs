//! Hardware seams
//!
//! Traits the controller drives, so the capture graph can be backed by real
//! devices (nokhwa cameras, cpal microphones) or by the simulated backend in
//! tests. Implementations push media into unbounded channels from their own
//! threads; nothing on the capture side requires a runtime.

pub mod audio;
pub mod sim;
pub mod webcam;

use crate::catalog::{LensDescriptor, LensId};
use crate::error::CameraError;
use crate::session::preset::QualityPreset;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Monotonic clock shared by every source of one backend. Video and audio
/// timestamps come from the same clock, so the pipeline can align them.
#[derive(Debug, Clone, Copy)]
pub struct CaptureClock {
    start: Instant,
}

impl CaptureClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for CaptureClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Pixel layouts frames can arrive in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba,
    Bgra,
    Yuyv422,
    Nv12,
    Rgb24,
}

impl PixelFormat {
    /// Name FFmpeg uses for this layout.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            PixelFormat::Rgba => "rgba",
            PixelFormat::Bgra => "bgra",
            PixelFormat::Yuyv422 => "yuyv422",
            PixelFormat::Nv12 => "nv12",
            PixelFormat::Rgb24 => "rgb24",
        }
    }

    /// Bytes one full frame occupies.
    pub fn frame_bytes(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Rgba | PixelFormat::Bgra => pixels * 4,
            PixelFormat::Yuyv422 => pixels * 2,
            PixelFormat::Nv12 => pixels * 3 / 2,
            PixelFormat::Rgb24 => pixels * 3,
        }
    }
}

/// One video frame from a capture device.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Packed pixel data in the device's reported format.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,

    /// Capture timestamp on the backend clock.
    pub pts: Duration,

    /// Stream generation this frame belongs to. Bumped on every stream
    /// start, so frames still in flight from a torn-down input can be told
    /// apart from the replacement's.
    pub epoch: u64,
}

/// A run of interleaved f32 samples from the audio source.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,

    /// Capture timestamp on the backend clock.
    pub pts: Duration,
}

/// Exposure readings the auto-flash darkness check consumes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureTelemetry {
    /// Sensor gain, ISO-equivalent.
    pub gain: f32,

    /// Exposure duration of the last frame.
    pub exposure: Duration,
}

impl Default for ExposureTelemetry {
    /// Daylight-ish readings that never trip the darkness check.
    fn default() -> Self {
        Self {
            gain: 100.0,
            exposure: Duration::from_micros(8_333),
        }
    }
}

/// Raw optical constants a device can report. Absent values stay absent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeviceOptics {
    pub aperture: Option<f32>,
    pub pixel_array: Option<(u32, u32)>,
    pub horizontal_fov_deg: Option<f32>,
}

/// Point of interest in sensor coordinates, both axes normalized 0..=1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorPoint {
    pub x: f32,
    pub y: f32,
}

/// Sender a device pushes frames into.
pub type FrameSender = mpsc::UnboundedSender<VideoFrame>;

/// Sender an audio source pushes chunks into.
pub type AudioSender = mpsc::UnboundedSender<AudioChunk>;

/// Factory for capture devices. One backend instance is handed to the
/// controller at construction.
#[async_trait]
pub trait CameraBackend: Send + Sync {
    /// Enumerate the physical lenses currently attached.
    fn enumerate(&self) -> Vec<LensDescriptor>;

    /// Open a device for `lens` at `preset`.
    ///
    /// A refused tier must come back as `CameraError::PresetRejected` so the
    /// session can walk the fallback ladder; any other error aborts it.
    async fn open(
        &self,
        lens: LensId,
        preset: QualityPreset,
    ) -> Result<Box<dyn CameraDevice>, CameraError>;

    /// Open the default audio input.
    async fn open_audio(&self) -> Result<Box<dyn AudioSource>, CameraError>;
}

/// An opened camera device.
///
/// Mutations are serialized by the session lock; implementations only see
/// one caller at a time. Capability-absent operations return `false` and
/// change nothing.
pub trait CameraDevice: Send {
    /// Physical lens this device captures through.
    fn lens(&self) -> LensId;

    /// Native frame dimensions of the negotiated format.
    fn frame_size(&self) -> (u32, u32);

    fn frame_rate(&self) -> u32;

    fn pixel_format(&self) -> PixelFormat;

    fn optics(&self) -> DeviceOptics;

    fn telemetry(&self) -> ExposureTelemetry;

    fn zoom_range(&self) -> (f32, f32);

    fn zoom(&self) -> f32;

    /// Apply an already-clamped zoom level.
    fn set_zoom(&mut self, level: f32);

    fn set_torch(&mut self, on: bool) -> bool;

    fn set_focus_point(&mut self, point: SensorPoint) -> bool;

    fn set_exposure_point(&mut self, point: SensorPoint) -> bool;

    /// Re-engage continuous auto white balance.
    fn set_white_balance_auto(&mut self) -> bool;

    /// Return focus, exposure and white balance to full continuous auto.
    fn reset_auto(&mut self) -> bool;

    fn set_mirrored(&mut self, mirrored: bool) -> bool;

    /// Begin pushing frames tagged with `epoch`.
    fn start_stream(&mut self, epoch: u64, frames: FrameSender) -> Result<(), CameraError>;

    fn stop_stream(&mut self);
}

/// An opened audio input.
pub trait AudioSource: Send {
    fn start(&mut self, chunks: AudioSender) -> Result<(), CameraError>;

    fn stop(&mut self);
}

/// Hooks into the embedding renderer.
///
/// `on_frame_available` is called from the frame worker and must not block.
pub trait RendererHooks: Send + Sync {
    /// Allocate an external texture and return its opaque handle.
    fn register_texture(&self) -> u64;

    /// A new frame is ready to be pulled for `texture`.
    fn on_frame_available(&self, texture: u64);

    fn unregister_texture(&self, texture: u64);
}

/// Display brightness control backing the screen-flash substitute on front
/// lenses. Levels are normalized 0..=1.
pub trait ScreenBrightness: Send + Sync {
    fn brightness(&self) -> f32;

    fn set_brightness(&self, level: f32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_bytes_per_format() {
        assert_eq!(PixelFormat::Rgba.frame_bytes(4, 2), 32);
        assert_eq!(PixelFormat::Yuyv422.frame_bytes(4, 2), 16);
        assert_eq!(PixelFormat::Nv12.frame_bytes(4, 2), 12);
        assert_eq!(PixelFormat::Rgb24.frame_bytes(4, 2), 24);
    }

    #[test]
    fn test_capture_clock_is_monotonic() {
        let clock = CaptureClock::new();
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
