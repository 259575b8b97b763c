//! nokhwa camera backend
//!
//! Desktop capture through UVC webcams. Each opened device is a dedicated
//! thread that owns the nokhwa camera, since the handle cannot leave the
//! thread it was created on; commands and frames cross over channels.
//! Webcams expose no torch, metering points or zoom, so those controls
//! report themselves absent.

use crate::catalog::{LensDescriptor, LensId, LensKind, LensPosition};
use crate::error::CameraError;
use crate::hardware::audio::CpalMicrophone;
use crate::hardware::{
    AudioSource, CameraBackend, CameraDevice, CaptureClock, DeviceOptics, ExposureTelemetry,
    FrameSender, PixelFormat, SensorPoint, VideoFrame,
};
use crate::session::preset::QualityPreset;
use async_trait::async_trait;
use cpal::traits::HostTrait;
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use nokhwa::Camera;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::time::Duration;

/// Lens a camera name maps to. UVC names carry no position, so anything not
/// explicitly front-facing counts as a back lens.
fn classify(name: &str) -> LensId {
    let name = name.to_ascii_lowercase();
    let position = if name.contains("front") {
        LensPosition::Front
    } else {
        LensPosition::Back
    };
    let kind = if name.contains("ultra") {
        LensKind::UltraWide
    } else if name.contains("tele") {
        LensKind::Telephoto
    } else {
        LensKind::Wide
    };
    LensId::new(position, kind)
}

fn requested_format_type(preset: QualityPreset) -> RequestedFormatType {
    match preset.nominal_size() {
        None => RequestedFormatType::AbsoluteHighestResolution,
        Some((width, height)) => RequestedFormatType::Closest(CameraFormat::new(
            Resolution::new(width, height),
            FrameFormat::NV12,
            30,
        )),
    }
}

/// Camera backend over nokhwa's auto-selected capture API.
pub struct NokhwaBackend {
    clock: CaptureClock,
    indices: Mutex<HashMap<LensId, CameraIndex>>,
}

impl NokhwaBackend {
    pub fn new() -> Self {
        Self {
            clock: CaptureClock::new(),
            indices: Mutex::new(HashMap::new()),
        }
    }

    /// Query attached cameras, rebuilding the lens-to-index cache. The first
    /// camera claiming a lens keeps it.
    fn scan(&self) -> Vec<LensDescriptor> {
        let mut cache = self.indices.lock();
        cache.clear();
        let mut found = Vec::new();
        match nokhwa::query(ApiBackend::Auto) {
            Ok(cameras) => {
                for info in cameras {
                    let lens = classify(&info.human_name());
                    if cache.contains_key(&lens) {
                        continue;
                    }
                    tracing::debug!("camera {:?} ({}) -> {lens}", info.index(), info.human_name());
                    cache.insert(lens, info.index().clone());
                    found.push(LensDescriptor::physical(lens));
                }
            }
            Err(e) => tracing::warn!("failed to enumerate cameras: {e}"),
        }
        found
    }

    fn index_for(&self, lens: LensId) -> Result<CameraIndex, CameraError> {
        {
            let cache = self.indices.lock();
            if let Some(index) = cache.get(&lens) {
                return Ok(index.clone());
            }
        }
        self.scan();
        self.indices
            .lock()
            .get(&lens)
            .cloned()
            .ok_or(CameraError::NoDeviceForLens { lens })
    }
}

impl Default for NokhwaBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CameraBackend for NokhwaBackend {
    fn enumerate(&self) -> Vec<LensDescriptor> {
        self.scan()
    }

    async fn open(
        &self,
        lens: LensId,
        preset: QualityPreset,
    ) -> Result<Box<dyn CameraDevice>, CameraError> {
        let index = self.index_for(lens)?;
        let format_type = requested_format_type(preset);
        let clock = self.clock;
        let device = tokio::task::spawn_blocking(move || open_device(index, format_type, clock, lens))
            .await
            .map_err(|e| CameraError::Internal(format!("camera open task failed: {e}")))??;
        Ok(Box::new(device))
    }

    async fn open_audio(&self) -> Result<Box<dyn AudioSource>, CameraError> {
        let clock = self.clock;
        tokio::task::spawn_blocking(move || {
            if cpal::default_host().default_input_device().is_none() {
                return Err(CameraError::AudioUnavailable(
                    "no default input device".into(),
                ));
            }
            Ok(Box::new(CpalMicrophone::new(clock)) as Box<dyn AudioSource>)
        })
        .await
        .map_err(|e| CameraError::Internal(format!("audio probe task failed: {e}")))?
    }
}

#[derive(Debug, Clone, Copy)]
struct NegotiatedFormat {
    width: u32,
    height: u32,
    fps: u32,
    pixel_format: PixelFormat,
}

enum CameraCommand {
    Start { epoch: u64, frames: FrameSender },
    Stop,
}

fn open_device(
    index: CameraIndex,
    format_type: RequestedFormatType,
    clock: CaptureClock,
    lens: LensId,
) -> Result<NokhwaDevice, CameraError> {
    let (ready_tx, ready_rx) = std::sync::mpsc::channel();
    let (cmd_tx, cmd_rx) = std::sync::mpsc::channel();
    let thread_index = index.clone();
    let thread =
        std::thread::spawn(move || camera_thread(thread_index, format_type, ready_tx, cmd_rx, clock));

    match ready_rx.recv_timeout(Duration::from_secs(10)) {
        Ok(Ok(negotiated)) => {
            tracing::info!(
                "camera opened: {lens} ({index:?}) {}x{} @ {}fps, {:?}",
                negotiated.width,
                negotiated.height,
                negotiated.fps,
                negotiated.pixel_format
            );
            Ok(NokhwaDevice {
                lens,
                negotiated,
                commands: Some(cmd_tx),
                thread: Some(thread),
            })
        }
        Ok(Err(reason)) => {
            let _ = thread.join();
            Err(CameraError::InputRejected { lens, reason })
        }
        Err(_) => {
            // Dropping the command sender tells the thread to fold whenever
            // the open finally returns.
            drop(cmd_tx);
            Err(CameraError::InputRejected {
                lens,
                reason: "camera did not open in time".into(),
            })
        }
    }
}

fn camera_thread(
    index: CameraIndex,
    format_type: RequestedFormatType,
    ready: Sender<Result<NegotiatedFormat, String>>,
    commands: Receiver<CameraCommand>,
    clock: CaptureClock,
) {
    let requested = RequestedFormat::new::<RgbAFormat>(format_type);
    let mut camera = match Camera::new(index.clone(), requested) {
        Ok(camera) => camera,
        Err(e) => {
            let _ = ready.send(Err(format!("failed to open camera {index:?}: {e}")));
            return;
        }
    };
    if let Err(e) = camera.open_stream() {
        let _ = ready.send(Err(format!("failed to open camera stream: {e}")));
        return;
    }

    let camera_format = camera.camera_format();
    let (pixel_format, needs_decode) = match camera_format.format() {
        FrameFormat::YUYV => (PixelFormat::Yuyv422, false),
        FrameFormat::NV12 => (PixelFormat::Nv12, false),
        FrameFormat::RAWRGB => (PixelFormat::Rgb24, false),
        other => {
            tracing::debug!("camera delivers {other:?}, decoding frames to rgba");
            (PixelFormat::Rgba, true)
        }
    };
    let negotiated = NegotiatedFormat {
        width: camera_format.resolution().width(),
        height: camera_format.resolution().height(),
        fps: camera_format.frame_rate(),
        pixel_format,
    };
    if ready.send(Ok(negotiated)).is_err() {
        let _ = camera.stop_stream();
        return;
    }

    let mut active: Option<(u64, FrameSender)> = None;
    loop {
        // Block for the next command while idle; between frames only peek.
        let command = if active.is_some() {
            match commands.try_recv() {
                Ok(command) => Some(command),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break,
            }
        } else {
            match commands.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            }
        };
        match command {
            Some(CameraCommand::Start { epoch, frames }) => active = Some((epoch, frames)),
            Some(CameraCommand::Stop) => active = None,
            None => {}
        }

        let Some((epoch, frames)) = active.as_ref() else {
            continue;
        };

        // The camera paces the loop; frame() blocks until one is due.
        match camera.frame() {
            Ok(frame) => {
                let (data, width, height) = if needs_decode {
                    match frame.decode_image::<RgbAFormat>() {
                        Ok(image) => {
                            let (width, height) = (image.width(), image.height());
                            (image.into_raw(), width, height)
                        }
                        Err(e) => {
                            tracing::debug!("frame decode failed: {e}");
                            continue;
                        }
                    }
                } else {
                    let resolution = frame.resolution();
                    (
                        frame.buffer().to_vec(),
                        resolution.width(),
                        resolution.height(),
                    )
                };
                let out = VideoFrame {
                    data,
                    width,
                    height,
                    pts: clock.now(),
                    epoch: *epoch,
                };
                if frames.send(out).is_err() {
                    active = None;
                }
            }
            Err(e) => {
                tracing::debug!("frame capture failed: {e}");
                std::thread::sleep(Duration::from_millis(5));
            }
        }
    }

    let _ = camera.stop_stream();
    tracing::debug!("camera thread for {index:?} exiting");
}

/// A UVC webcam behind its capture thread.
struct NokhwaDevice {
    lens: LensId,
    negotiated: NegotiatedFormat,
    commands: Option<Sender<CameraCommand>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl CameraDevice for NokhwaDevice {
    fn lens(&self) -> LensId {
        self.lens
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.negotiated.width, self.negotiated.height)
    }

    fn frame_rate(&self) -> u32 {
        self.negotiated.fps.max(1)
    }

    fn pixel_format(&self) -> PixelFormat {
        self.negotiated.pixel_format
    }

    fn optics(&self) -> DeviceOptics {
        DeviceOptics::default()
    }

    fn telemetry(&self) -> ExposureTelemetry {
        ExposureTelemetry::default()
    }

    fn zoom_range(&self) -> (f32, f32) {
        (1.0, 1.0)
    }

    fn zoom(&self) -> f32 {
        1.0
    }

    fn set_zoom(&mut self, _level: f32) {}

    fn set_torch(&mut self, _on: bool) -> bool {
        false
    }

    fn set_focus_point(&mut self, _point: SensorPoint) -> bool {
        false
    }

    fn set_exposure_point(&mut self, _point: SensorPoint) -> bool {
        false
    }

    fn set_white_balance_auto(&mut self) -> bool {
        false
    }

    fn reset_auto(&mut self) -> bool {
        false
    }

    fn set_mirrored(&mut self, _mirrored: bool) -> bool {
        false
    }

    fn start_stream(&mut self, epoch: u64, frames: FrameSender) -> Result<(), CameraError> {
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| CameraError::Internal("camera thread already closed".into()))?;
        commands
            .send(CameraCommand::Start { epoch, frames })
            .map_err(|_| CameraError::Internal("camera thread exited".into()))
    }

    fn stop_stream(&mut self) {
        if let Some(commands) = self.commands.as_ref() {
            let _ = commands.send(CameraCommand::Stop);
        }
    }
}

impl Drop for NokhwaDevice {
    fn drop(&mut self) {
        // Disconnect first so the thread folds, then wait for the camera to
        // be released before anyone reopens it.
        drop(self.commands.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
