//! Simulated capture hardware
//!
//! In-process stand-ins for the camera backend, the microphone and the
//! writer factory. Devices run real capture threads against the shared
//! clock and record every mutation into shared state, so tests can drive
//! the controller end to end and then assert on what the hardware saw.

use crate::catalog::{LensDescriptor, LensId, LensKind, LensPosition};
use crate::encoder::{MediaWriter, WriterFactory, WriterSpec, WrittenTracks};
use crate::error::{CameraError, EncoderError};
use crate::hardware::{
    AudioChunk, AudioSender, AudioSource, CameraBackend, CameraDevice, CaptureClock, DeviceOptics,
    ExposureTelemetry, FrameSender, PixelFormat, SensorPoint, VideoFrame,
};
use crate::session::preset::QualityPreset;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// One lens the simulated backend exposes.
#[derive(Debug, Clone, Copy)]
pub struct SimLens {
    pub descriptor: LensDescriptor,

    /// Highest preset `open` accepts; requests above it are rejected so the
    /// fallback ladder has something to walk.
    pub max_preset: Option<QualityPreset>,
}

impl SimLens {
    pub fn new(descriptor: LensDescriptor) -> Self {
        Self {
            descriptor,
            max_preset: None,
        }
    }

    pub fn with_max_preset(mut self, preset: QualityPreset) -> Self {
        self.max_preset = Some(preset);
        self
    }
}

/// Everything device mutations touch, kept per lens and surviving the
/// device that wrote it so tests can inspect state after teardown.
#[derive(Debug, Clone, Copy)]
pub struct SimDeviceState {
    pub torch_on: bool,
    pub zoom: f32,
    pub mirrored: bool,
    pub continuous_auto: bool,
    pub focus_point: Option<SensorPoint>,
    pub exposure_point: Option<SensorPoint>,
}

impl Default for SimDeviceState {
    fn default() -> Self {
        Self {
            torch_on: false,
            zoom: 1.0,
            mirrored: false,
            continuous_auto: true,
            focus_point: None,
            exposure_point: None,
        }
    }
}

struct SimShared {
    clock: CaptureClock,
    lenses: Vec<SimLens>,
    audio_available: AtomicBool,
    frame_interval: Mutex<Duration>,
    telemetry: Mutex<HashMap<LensPosition, ExposureTelemetry>>,
    device_state: Mutex<HashMap<LensId, SimDeviceState>>,
    failing_lenses: Mutex<HashSet<LensId>>,
    stalled_lenses: Mutex<HashSet<LensId>>,
}

/// Simulated camera backend.
pub struct SimBackend {
    shared: Arc<SimShared>,
}

impl SimBackend {
    pub fn new(lenses: Vec<SimLens>) -> Self {
        Self {
            shared: Arc::new(SimShared {
                clock: CaptureClock::new(),
                lenses,
                audio_available: AtomicBool::new(true),
                frame_interval: Mutex::new(Duration::from_millis(10)),
                telemetry: Mutex::new(HashMap::new()),
                device_state: Mutex::new(HashMap::new()),
                failing_lenses: Mutex::new(HashSet::new()),
                stalled_lenses: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// A typical phone layout: three back lenses with torch and autofocus,
    /// one fixed-focus front lens that can still meter exposure. The back
    /// ultra-wide qualifies for the derived macro entry.
    pub fn phone() -> Self {
        let full = |id: LensId| LensDescriptor {
            has_torch: true,
            has_autofocus: true,
            supports_focus_point: true,
            supports_exposure_point: true,
            ..LensDescriptor::physical(id)
        };
        let front = LensDescriptor {
            supports_exposure_point: true,
            ..LensDescriptor::physical(LensId::FRONT_WIDE)
        };
        Self::new(vec![
            SimLens::new(full(LensId::BACK_WIDE)),
            SimLens::new(full(LensId::BACK_ULTRA_WIDE)),
            SimLens::new(full(LensId::new(LensPosition::Back, LensKind::Telephoto))),
            SimLens::new(front),
        ])
    }

    /// Make `open_audio` fail as if no input device existed.
    pub fn without_audio(self) -> Self {
        self.shared.audio_available.store(false, Ordering::SeqCst);
        self
    }

    /// Change how often streaming devices emit frames.
    pub fn with_frame_interval(self, interval: Duration) -> Self {
        *self.shared.frame_interval.lock() = interval;
        self
    }

    /// Inspection handle that stays usable after the backend moves into the
    /// controller.
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

#[async_trait]
impl CameraBackend for SimBackend {
    fn enumerate(&self) -> Vec<LensDescriptor> {
        self.shared.lenses.iter().map(|l| l.descriptor).collect()
    }

    async fn open(
        &self,
        lens: LensId,
        preset: QualityPreset,
    ) -> Result<Box<dyn CameraDevice>, CameraError> {
        let sim = self
            .shared
            .lenses
            .iter()
            .find(|l| l.descriptor.id == lens)
            .ok_or(CameraError::NoDeviceForLens { lens })?;
        if self.shared.failing_lenses.lock().contains(&lens) {
            return Err(CameraError::InputRejected {
                lens,
                reason: "simulated open failure".into(),
            });
        }
        if let Some(max) = sim.max_preset {
            if preset > max {
                return Err(CameraError::PresetRejected { preset, lens });
            }
        }
        Ok(Box::new(SimDevice {
            shared: Arc::clone(&self.shared),
            descriptor: sim.descriptor,
            size: sim_frame_size(preset),
            stop: None,
            thread: None,
        }))
    }

    async fn open_audio(&self) -> Result<Box<dyn AudioSource>, CameraError> {
        if !self.shared.audio_available.load(Ordering::SeqCst) {
            return Err(CameraError::AudioUnavailable(
                "no simulated input device".into(),
            ));
        }
        Ok(Box::new(SimMicrophone {
            clock: self.shared.clock,
            stop: None,
            thread: None,
        }))
    }
}

/// Test-side view into the simulated hardware.
#[derive(Clone)]
pub struct SimHandle {
    shared: Arc<SimShared>,
}

impl SimHandle {
    /// Set the exposure readings devices on `position` will report.
    pub fn set_telemetry(&self, position: LensPosition, gain: f32, exposure: Duration) {
        self.shared
            .telemetry
            .lock()
            .insert(position, ExposureTelemetry { gain, exposure });
    }

    /// Make every `open` of `lens` fail until cleared.
    pub fn set_open_failure(&self, lens: LensId, failing: bool) {
        let mut set = self.shared.failing_lenses.lock();
        if failing {
            set.insert(lens);
        } else {
            set.remove(&lens);
        }
    }

    /// Keep streams of `lens` open but frameless until cleared.
    pub fn set_stream_stall(&self, lens: LensId, stalled: bool) {
        let mut set = self.shared.stalled_lenses.lock();
        if stalled {
            set.insert(lens);
        } else {
            set.remove(&lens);
        }
    }

    pub fn device_state(&self, lens: LensId) -> SimDeviceState {
        self.shared
            .device_state
            .lock()
            .get(&lens)
            .copied()
            .unwrap_or_default()
    }

    pub fn torch_on(&self, lens: LensId) -> bool {
        self.device_state(lens).torch_on
    }

    pub fn continuous_auto(&self, lens: LensId) -> bool {
        self.device_state(lens).continuous_auto
    }

    pub fn mirrored(&self, lens: LensId) -> bool {
        self.device_state(lens).mirrored
    }

    pub fn zoom(&self, lens: LensId) -> f32 {
        self.device_state(lens).zoom
    }
}

/// Frame dimensions per preset, landscape and deliberately tiny so raw
/// frames stay cheap in tests.
fn sim_frame_size(preset: QualityPreset) -> (u32, u32) {
    match preset {
        QualityPreset::Low => (64, 48),
        QualityPreset::Medium => (96, 72),
        QualityPreset::High => (128, 96),
        QualityPreset::VeryHigh => (160, 120),
        QualityPreset::UltraHigh => (192, 144),
        QualityPreset::Max => (256, 192),
    }
}

fn sim_zoom_range(lens: LensId) -> (f32, f32) {
    if lens.position == LensPosition::Front {
        return (1.0, 4.0);
    }
    match lens.kind {
        LensKind::UltraWide | LensKind::Macro => (1.0, 2.0),
        LensKind::Wide => (1.0, 6.0),
        LensKind::Telephoto => (1.0, 4.0),
    }
}

struct SimDevice {
    shared: Arc<SimShared>,
    descriptor: LensDescriptor,
    size: (u32, u32),
    stop: Option<Arc<AtomicBool>>,
    thread: Option<JoinHandle<()>>,
}

impl SimDevice {
    fn mutate<R>(&self, f: impl FnOnce(&mut SimDeviceState) -> R) -> R {
        let mut map = self.shared.device_state.lock();
        f(map.entry(self.descriptor.id).or_default())
    }
}

impl CameraDevice for SimDevice {
    fn lens(&self) -> LensId {
        self.descriptor.id
    }

    fn frame_size(&self) -> (u32, u32) {
        self.size
    }

    fn frame_rate(&self) -> u32 {
        30
    }

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Rgba
    }

    fn optics(&self) -> DeviceOptics {
        DeviceOptics {
            aperture: Some(1.8),
            pixel_array: Some((4032, 3024)),
            horizontal_fov_deg: Some(68.0),
        }
    }

    fn telemetry(&self) -> ExposureTelemetry {
        self.shared
            .telemetry
            .lock()
            .get(&self.descriptor.id.position)
            .copied()
            .unwrap_or_default()
    }

    fn zoom_range(&self) -> (f32, f32) {
        sim_zoom_range(self.descriptor.id)
    }

    fn zoom(&self) -> f32 {
        self.mutate(|s| s.zoom)
    }

    fn set_zoom(&mut self, level: f32) {
        self.mutate(|s| s.zoom = level);
    }

    fn set_torch(&mut self, on: bool) -> bool {
        if !self.descriptor.has_torch {
            return false;
        }
        self.mutate(|s| s.torch_on = on);
        true
    }

    fn set_focus_point(&mut self, point: SensorPoint) -> bool {
        if !self.descriptor.supports_focus_point {
            return false;
        }
        self.mutate(|s| {
            s.focus_point = Some(point);
            s.continuous_auto = false;
        });
        true
    }

    fn set_exposure_point(&mut self, point: SensorPoint) -> bool {
        if !self.descriptor.supports_exposure_point {
            return false;
        }
        self.mutate(|s| {
            s.exposure_point = Some(point);
            s.continuous_auto = false;
        });
        true
    }

    fn set_white_balance_auto(&mut self) -> bool {
        true
    }

    fn reset_auto(&mut self) -> bool {
        self.mutate(|s| {
            s.focus_point = None;
            s.exposure_point = None;
            s.continuous_auto = true;
        });
        true
    }

    fn set_mirrored(&mut self, mirrored: bool) -> bool {
        self.mutate(|s| s.mirrored = mirrored);
        true
    }

    fn start_stream(&mut self, epoch: u64, frames: FrameSender) -> Result<(), CameraError> {
        self.stop_stream();

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let shared = Arc::clone(&self.shared);
        let lens = self.descriptor.id;
        let clock = self.shared.clock;
        let interval = *self.shared.frame_interval.lock();
        let (width, height) = self.size;
        let bytes = PixelFormat::Rgba.frame_bytes(width, height);

        // Emit before sleeping so the first frame lands immediately.
        let thread = std::thread::spawn(move || {
            while !stop_flag.load(Ordering::SeqCst) {
                if shared.stalled_lenses.lock().contains(&lens) {
                    std::thread::sleep(interval);
                    continue;
                }
                let frame = VideoFrame {
                    data: vec![0x40; bytes],
                    width,
                    height,
                    pts: clock.now(),
                    epoch,
                };
                if frames.send(frame).is_err() {
                    break;
                }
                std::thread::sleep(interval);
            }
        });

        self.stop = Some(stop);
        self.thread = Some(thread);
        Ok(())
    }

    fn stop_stream(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.store(true, Ordering::SeqCst);
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        self.stop_stream();
    }
}

/// Silence generator standing in for a microphone: 48 kHz mono, one chunk
/// every 20 ms.
struct SimMicrophone {
    clock: CaptureClock,
    stop: Option<Arc<AtomicBool>>,
    thread: Option<JoinHandle<()>>,
}

impl AudioSource for SimMicrophone {
    fn start(&mut self, chunks: AudioSender) -> Result<(), CameraError> {
        self.stop();

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let clock = self.clock;

        let thread = std::thread::spawn(move || {
            while !stop_flag.load(Ordering::SeqCst) {
                let chunk = AudioChunk {
                    samples: vec![0.0; 960],
                    sample_rate: 48_000,
                    channels: 1,
                    pts: clock.now(),
                };
                if chunks.send(chunk).is_err() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
        });

        self.stop = Some(stop);
        self.thread = Some(thread);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.store(true, Ordering::SeqCst);
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SimMicrophone {
    fn drop(&mut self) {
        AudioSource::stop(self);
    }
}

#[derive(Default)]
struct WriterLogInner {
    specs: Vec<WriterSpec>,
    video_pts: Vec<Duration>,
    audio_pts: Vec<Duration>,
    finalized: usize,
    cancelled: usize,
}

struct SimWriterShared {
    fail_open: AtomicBool,
    fail_finalize: AtomicBool,
    log: Mutex<WriterLogInner>,
}

/// Writer factory that produces stub containers on disk and logs every
/// append for assertions.
pub struct SimWriterFactory {
    shared: Arc<SimWriterShared>,
}

impl SimWriterFactory {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SimWriterShared {
                fail_open: AtomicBool::new(false),
                fail_finalize: AtomicBool::new(false),
                log: Mutex::new(WriterLogInner::default()),
            }),
        }
    }

    pub fn handle(&self) -> SimWriterLog {
        SimWriterLog {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Default for SimWriterFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl WriterFactory for SimWriterFactory {
    fn open(&self, spec: &WriterSpec) -> Result<Box<dyn MediaWriter>, EncoderError> {
        if self.shared.fail_open.load(Ordering::SeqCst) {
            return Err(EncoderError::Spawn("simulated open failure".into()));
        }
        if let Some(dir) = spec.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut file = File::create(&spec.path)?;
        file.write_all(b"SIMCLIP0")?;

        self.shared.log.lock().specs.push(spec.clone());
        Ok(Box::new(SimWriter {
            shared: Arc::clone(&self.shared),
            spec: spec.clone(),
            path: spec.path.clone(),
            file,
        }))
    }
}

/// Assertion-side view of everything writers were asked to do.
#[derive(Clone)]
pub struct SimWriterLog {
    shared: Arc<SimWriterShared>,
}

impl SimWriterLog {
    pub fn set_fail_open(&self, fail: bool) {
        self.shared.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_finalize(&self, fail: bool) {
        self.shared.fail_finalize.store(fail, Ordering::SeqCst);
    }

    /// Specs of every writer opened so far.
    pub fn specs(&self) -> Vec<WriterSpec> {
        self.shared.log.lock().specs.clone()
    }

    /// Rebased video timestamps in append order.
    pub fn video_pts(&self) -> Vec<Duration> {
        self.shared.log.lock().video_pts.clone()
    }

    /// Rebased audio timestamps in append order.
    pub fn audio_pts(&self) -> Vec<Duration> {
        self.shared.log.lock().audio_pts.clone()
    }

    pub fn finalized(&self) -> usize {
        self.shared.log.lock().finalized
    }

    pub fn cancelled(&self) -> usize {
        self.shared.log.lock().cancelled
    }
}

struct SimWriter {
    shared: Arc<SimWriterShared>,
    spec: WriterSpec,
    path: PathBuf,
    file: File,
}

impl MediaWriter for SimWriter {
    fn append_video(&mut self, frame: &VideoFrame, pts: Duration) -> Result<(), EncoderError> {
        let record = (pts.as_micros() as u64).to_le_bytes();
        self.file.write_all(&record)?;
        self.file.write_all(&(frame.data.len() as u64).to_le_bytes())?;
        self.shared.log.lock().video_pts.push(pts);
        Ok(())
    }

    fn append_audio(&mut self, chunk: &AudioChunk, pts: Duration) -> Result<(), EncoderError> {
        let record = (pts.as_micros() as u64).to_le_bytes();
        self.file.write_all(&record)?;
        self.file
            .write_all(&(chunk.samples.len() as u64).to_le_bytes())?;
        self.shared.log.lock().audio_pts.push(pts);
        Ok(())
    }

    fn finalize(mut self: Box<Self>) -> Result<WrittenTracks, EncoderError> {
        self.file.flush()?;
        if self.shared.fail_finalize.load(Ordering::SeqCst) {
            return Err(EncoderError::Failed {
                status: "sim".into(),
                stderr: "simulated finalize failure".into(),
            });
        }
        self.shared.log.lock().finalized += 1;
        let (width, height) = self.spec.output_size();
        Ok(WrittenTracks { width, height })
    }

    fn cancel(self: Box<Self>) {
        let _ = std::fs::remove_file(&self.path);
        self.shared.log.lock().cancelled += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_open_rejects_presets_above_cap() {
        let backend = SimBackend::new(vec![
            SimLens::new(LensDescriptor::physical(LensId::BACK_WIDE))
                .with_max_preset(QualityPreset::Medium),
        ]);

        let err = backend
            .open(LensId::BACK_WIDE, QualityPreset::High)
            .await
            .err();
        assert!(matches!(err, Some(CameraError::PresetRejected { .. })));

        assert!(backend
            .open(LensId::BACK_WIDE, QualityPreset::Low)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_device_streams_tagged_frames() {
        let backend = SimBackend::phone();
        let mut device = backend
            .open(LensId::BACK_WIDE, QualityPreset::High)
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        device.start_stream(7, tx).unwrap();
        let frame = rx.recv().await.unwrap();
        device.stop_stream();

        assert_eq!(frame.epoch, 7);
        assert_eq!((frame.width, frame.height), sim_frame_size(QualityPreset::High));
        assert_eq!(
            frame.data.len(),
            PixelFormat::Rgba.frame_bytes(frame.width, frame.height)
        );
    }

    #[tokio::test]
    async fn test_device_state_survives_close() {
        let backend = SimBackend::phone();
        let handle = backend.handle();
        {
            let mut device = backend
                .open(LensId::BACK_WIDE, QualityPreset::High)
                .await
                .unwrap();
            assert!(device.set_torch(true));
            device.set_zoom(3.0);
        }
        assert!(handle.torch_on(LensId::BACK_WIDE));
        assert_eq!(handle.zoom(LensId::BACK_WIDE), 3.0);
    }

    #[test]
    fn test_front_lens_has_no_focus_point() {
        let backend = SimBackend::phone();
        let front = backend
            .enumerate()
            .into_iter()
            .find(|d| d.id == LensId::FRONT_WIDE)
            .unwrap();
        assert!(!front.supports_focus_point);
        assert!(front.supports_exposure_point);
        assert!(!front.has_torch);
    }
}
