//! Camera controller
//!
//! The public surface of the crate. One controller owns the lens catalog,
//! the frame pipeline and at most one active session; callers initialize a
//! lens, switch between lenses, record clips, drive the interactive
//! controls and observe everything through state snapshots and the event
//! channel. Configuration operations serialize on the session lock, which
//! doubles as the device configuration lock.

use crate::catalog::{DeviceCatalog, LensId};
use crate::controls::flash::flash_available;
use crate::controls::metering::{self, display_to_sensor};
use crate::controls::zoom;
use crate::controls::{FlashEngine, MeteringEngine};
use crate::encoder::{
    allocate_output_path, resolve_output_dir, FfmpegWriterFactory, RecordingOptions, WriterFactory,
    WriterSpec,
};
use crate::error::{CameraError, CameraResult};
use crate::hardware::webcam::NokhwaBackend;
use crate::hardware::{CameraBackend, RendererHooks, ScreenBrightness, VideoFrame};
use crate::pipeline::{self, PipelineCommand, PipelineHandles};
use crate::relay::FrameRelay;
use crate::session::preset::QualityPreset;
use crate::session::{self, ActiveSession};
use crate::state::{CaptureState, ControllerEvent, FlashMode, RecordingResult, ZoomRange};
use parking_lot::Mutex as ParkingMutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;

/// Controller tunables, defaulted for production use.
#[derive(Debug, Clone, Copy)]
pub struct ControllerConfig {
    /// How long a tapped metering point holds before continuous auto
    /// returns.
    pub metering_reset_delay: Duration,

    /// How long a lens switch waits for the first frame of the new stream
    /// before the switch is failed and the previous lens restored.
    pub switch_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            metering_reset_delay: metering::DEFAULT_RESET_DELAY,
            switch_timeout: Duration::from_secs(5),
        }
    }
}

/// Handle to the capture stack. Cheap to clone; all clones drive the same
/// session.
#[derive(Clone)]
pub struct CameraController {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Box<dyn CameraBackend>,
    writers: Arc<dyn WriterFactory>,
    hooks: Arc<dyn RendererHooks>,
    brightness: Option<Arc<dyn ScreenBrightness>>,
    catalog: DeviceCatalog,
    config: ControllerConfig,

    /// The active session, if any. Also the device configuration lock:
    /// every operation that touches the device holds it.
    session: Mutex<Option<ActiveSession>>,

    pipeline: PipelineHandles,
    relay: Arc<FrameRelay>,

    /// Mirrors whether the pipeline holds a live recording.
    recording_flag: Arc<AtomicBool>,

    preview_paused: AtomicBool,
    metering: MeteringEngine,

    /// Armed max-duration stop, when a recording carries one.
    deadline: ParkingMutex<Option<JoinHandle<()>>>,

    events: broadcast::Sender<ControllerEvent>,

    /// Stream generation counter; bumped for every stream (re)start.
    next_epoch: AtomicU64,
}

impl CameraController {
    /// Build a controller over explicit seams. Must be called on a tokio
    /// runtime; the frame worker spawns immediately.
    pub fn new(
        backend: Box<dyn CameraBackend>,
        writers: Arc<dyn WriterFactory>,
        hooks: Arc<dyn RendererHooks>,
        brightness: Option<Arc<dyn ScreenBrightness>>,
        config: ControllerConfig,
    ) -> Self {
        let catalog = DeviceCatalog::from_hardware(backend.enumerate());
        tracing::info!("camera catalog: {} lens(es)", catalog.descriptors().len());

        let relay = Arc::new(FrameRelay::new());
        let recording_flag = Arc::new(AtomicBool::new(false));
        let (events, _) = broadcast::channel(100);
        let pipeline = pipeline::spawn(
            Arc::clone(&relay),
            Arc::clone(&hooks),
            Arc::clone(&recording_flag),
        );

        Self {
            inner: Arc::new(Inner {
                backend,
                writers,
                hooks,
                brightness,
                catalog,
                config,
                session: Mutex::new(None),
                pipeline,
                relay,
                recording_flag,
                preview_paused: AtomicBool::new(false),
                metering: MeteringEngine::new(config.metering_reset_delay),
                deadline: ParkingMutex::new(None),
                events,
                next_epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Production wiring: nokhwa cameras, cpal audio, FFmpeg writers.
    pub fn production(
        hooks: Arc<dyn RendererHooks>,
        brightness: Option<Arc<dyn ScreenBrightness>>,
    ) -> Self {
        Self::new(
            Box::new(NokhwaBackend::new()),
            Arc::new(FfmpegWriterFactory),
            hooks,
            brightness,
            ControllerConfig::default(),
        )
    }

    /// Open `lens` at `preset` and start the preview.
    ///
    /// Resolves the lens through the fallback chain and the preset through
    /// the quality ladder, so the session that comes up may differ from the
    /// request; the returned snapshot is authoritative. Audio input failure
    /// is not fatal, it only loses the recording's audio track.
    pub async fn initialize(
        &self,
        lens: LensId,
        preset: QualityPreset,
        allow_screen_flash: bool,
        mirror_front: bool,
    ) -> CameraResult<CaptureState> {
        let inner = &self.inner;
        let mut guard = inner.session.lock().await;
        if guard.is_some() {
            return Err(CameraError::AlreadyInitialized);
        }

        let descriptor = session::resolve_lens(&inner.catalog, lens)?;
        let epoch = inner.next_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let (device, applied, metadata) = session::wire_input(
            inner.backend.as_ref(),
            descriptor,
            preset,
            epoch,
            inner.pipeline.frames.clone(),
            mirror_front,
        )
        .await?;

        let audio = match inner.backend.open_audio().await {
            Ok(mut source) => match source.start(inner.pipeline.audio.clone()) {
                Ok(()) => Some(source),
                Err(e) => {
                    tracing::warn!("audio capture unavailable: {e}");
                    None
                }
            },
            Err(e) => {
                tracing::warn!("audio capture unavailable: {e}");
                None
            }
        };

        let texture = inner.hooks.register_texture();
        let _ = inner
            .pipeline
            .commands
            .send(PipelineCommand::SetTexture(Some(texture)));

        let session = ActiveSession {
            descriptor,
            preset: applied,
            device,
            audio,
            flash: FlashEngine::new(inner.brightness.clone()),
            metadata,
            texture,
            allow_screen_flash,
            mirror_front,
        };
        tracing::info!(
            "camera initialized: {} at {applied} (epoch {epoch}, texture {texture})",
            descriptor.id
        );
        let state = inner.snapshot_with(Some(&session));
        *guard = Some(session);

        inner.writers.prewarm();
        Ok(state)
    }

    /// Swap the active lens, keeping audio, texture and recording running.
    ///
    /// The new stream is wired under a fresh epoch and the call waits for
    /// its first frame, so a completed switch means the preview already
    /// shows the new lens. A stream that stays silent past the configured
    /// timeout fails the switch. On failure the previous lens is restored
    /// and the original error returned.
    pub async fn switch_camera(&self, lens: LensId) -> CameraResult<CaptureState> {
        let inner = &self.inner;
        let mut guard = inner.session.lock().await;
        let Some(mut session) = guard.take() else {
            return Err(CameraError::NotInitialized);
        };

        let descriptor = match session::resolve_lens(&inner.catalog, lens) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                *guard = Some(session);
                return Err(e);
            }
        };
        if descriptor.id == session.descriptor.id {
            let state = inner.snapshot_with(Some(&session));
            *guard = Some(session);
            return Ok(state);
        }

        tracing::info!("switching {} -> {}", session.descriptor.id, descriptor.id);

        // No light source crosses a lens switch.
        session
            .flash
            .quiesce(&session.descriptor, session.device.as_mut());
        session.device.stop_stream();

        let ActiveSession {
            descriptor: old_descriptor,
            preset,
            device: old_device,
            audio,
            flash,
            texture,
            allow_screen_flash,
            mirror_front,
            ..
        } = session;
        // Release the camera before its replacement opens.
        drop(old_device);

        let epoch = inner.next_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let (done_tx, done_rx) = oneshot::channel();
        // Register the gate before the stream exists so its first frame
        // cannot slip past.
        let _ = inner.pipeline.commands.send(PipelineCommand::AwaitEpoch {
            epoch,
            done: done_tx,
        });

        // A switch only counts once the preview shows the new lens; every
        // failure from here on restores the previous one.
        let (audio, flash, switch_err) = match session::wire_input(
            inner.backend.as_ref(),
            descriptor,
            preset,
            epoch,
            inner.pipeline.frames.clone(),
            mirror_front,
        )
        .await
        {
            Ok((device, applied, metadata)) => {
                let mut session = ActiveSession {
                    descriptor,
                    preset: applied,
                    device,
                    audio,
                    flash,
                    metadata,
                    texture,
                    allow_screen_flash,
                    mirror_front,
                };
                match tokio::time::timeout(inner.config.switch_timeout, done_rx).await {
                    Ok(Ok(())) => {
                        tracing::info!("switched to {} at {applied}", descriptor.id);
                        let state = inner.snapshot_with(Some(&session));
                        *guard = Some(session);
                        return Ok(state);
                    }
                    Ok(Err(_)) | Err(_) => {
                        session.device.stop_stream();
                        let ActiveSession {
                            device,
                            audio,
                            flash,
                            ..
                        } = session;
                        drop(device);
                        let err = CameraError::InputRejected {
                            lens: descriptor.id,
                            reason: format!(
                                "no frame within {:?}",
                                inner.config.switch_timeout
                            ),
                        };
                        (audio, flash, err)
                    }
                }
            }
            Err(switch_err) => (audio, flash, switch_err),
        };

        tracing::warn!(
            "switch to {} failed: {switch_err}, restoring {}",
            descriptor.id,
            old_descriptor.id
        );
        let restore_epoch = inner.next_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        match session::wire_input(
            inner.backend.as_ref(),
            old_descriptor,
            preset,
            restore_epoch,
            inner.pipeline.frames.clone(),
            mirror_front,
        )
        .await
        {
            Ok((device, applied, metadata)) => {
                *guard = Some(ActiveSession {
                    descriptor: old_descriptor,
                    preset: applied,
                    device,
                    audio,
                    flash,
                    metadata,
                    texture,
                    allow_screen_flash,
                    mirror_front,
                });
            }
            Err(restore_err) => {
                tracing::error!(
                    "failed to restore {} after switch failure: {restore_err}",
                    old_descriptor.id
                );
                inner.release_output(texture, audio);
            }
        }
        Err(switch_err)
    }

    /// Start recording the active session to a new file.
    ///
    /// The file lands in the directory `options` resolves to and the first
    /// written video frame zeroes the clip timeline. With `max_duration`
    /// set, a deadline stops the recording and emits
    /// [`ControllerEvent::RecordingAutoStopped`].
    pub async fn start_recording(&self, options: RecordingOptions) -> CameraResult<()> {
        let inner = &self.inner;
        let mut guard = inner.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return Err(CameraError::NotInitialized);
        };
        if inner.recording_flag.load(Ordering::SeqCst) {
            return Err(CameraError::AlreadyRecording);
        }

        let dir = resolve_output_dir(&options);
        let path = allocate_output_path(&dir)?;
        let (width, height) = session.device.frame_size();
        let spec = WriterSpec {
            path,
            source_width: width,
            source_height: height,
            fps: session.device.frame_rate(),
            pixel_format: session.device.pixel_format(),
            portrait: true,
        };
        let writer = inner.writers.open(&spec)?;

        let (reply, reply_rx) = oneshot::channel();
        inner
            .pipeline
            .commands
            .send(PipelineCommand::StartRecording {
                writer,
                spec,
                reply,
            })
            .map_err(|_| CameraError::SessionClosed)?;
        reply_rx.await.map_err(|_| CameraError::SessionClosed)??;

        // One darkness check against live telemetry per recording.
        let ActiveSession {
            descriptor,
            device,
            flash,
            allow_screen_flash,
            ..
        } = session;
        flash.on_recording_start(descriptor, *allow_screen_flash, device.as_mut());

        if let Some(max) = options.max_duration {
            Inner::arm_deadline(inner, max);
        }
        Ok(())
    }

    /// Stop the running recording and wait for the finished file.
    pub async fn stop_recording(&self) -> CameraResult<RecordingResult> {
        if let Some(task) = self.inner.deadline.lock().take() {
            task.abort();
        }
        Inner::finish_recording(&self.inner).await
    }

    /// Select a flash mode for the active lens. Returns whether the lens
    /// can honor it; an unsupported mode changes nothing.
    pub async fn set_flash_mode(&self, mode: FlashMode) -> bool {
        let mut guard = self.inner.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return false;
        };
        let ActiveSession {
            descriptor,
            device,
            flash,
            allow_screen_flash,
            ..
        } = session;
        flash.set_mode(mode, descriptor, *allow_screen_flash, device.as_mut())
    }

    /// Lock focus to a display-space point. Continuous auto returns after
    /// the metering delay.
    pub async fn set_focus_point(&self, x: f32, y: f32) -> bool {
        let point = display_to_sensor(x, y);
        {
            let mut guard = self.inner.session.lock().await;
            let Some(session) = guard.as_mut() else {
                return false;
            };
            if !session.descriptor.supports_focus_point {
                return false;
            }
            if !session.device.set_focus_point(point) {
                return false;
            }
            let _ = session.device.set_white_balance_auto();
            tracing::debug!(
                "focus point ({:.3}, {:.3}) on {}",
                point.x,
                point.y,
                session.descriptor.id
            );
        }
        self.schedule_metering_reset();
        true
    }

    /// Lock exposure to a display-space point. Continuous auto returns
    /// after the metering delay.
    pub async fn set_exposure_point(&self, x: f32, y: f32) -> bool {
        let point = display_to_sensor(x, y);
        {
            let mut guard = self.inner.session.lock().await;
            let Some(session) = guard.as_mut() else {
                return false;
            };
            if !session.descriptor.supports_exposure_point {
                return false;
            }
            if !session.device.set_exposure_point(point) {
                return false;
            }
            let _ = session.device.set_white_balance_auto();
            tracing::debug!(
                "exposure point ({:.3}, {:.3}) on {}",
                point.x,
                point.y,
                session.descriptor.id
            );
        }
        self.schedule_metering_reset();
        true
    }

    /// Drop any held metering point and return to continuous auto now.
    pub async fn cancel_metering(&self) {
        self.inner.metering.cancel_schedule();
        let mut guard = self.inner.session.lock().await;
        if let Some(session) = guard.as_mut() {
            let _ = session.device.reset_auto();
        }
    }

    /// Apply a total zoom level, clamped to the device range. Returns the
    /// level actually in effect.
    pub async fn set_zoom(&self, level: f32) -> f32 {
        let mut guard = self.inner.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return zoom::MIN_ZOOM;
        };
        let range = zoom::sanitize_range(session.device.zoom_range());
        let applied = zoom::clamp_level(range, level);
        session.device.set_zoom(applied);
        applied
    }

    /// Freeze the preview on its current frame. Capture and recording keep
    /// running.
    pub fn pause_preview(&self) {
        self.inner.preview_paused.store(true, Ordering::SeqCst);
        let _ = self
            .inner
            .pipeline
            .commands
            .send(PipelineCommand::SetPreviewPaused(true));
        tracing::debug!("preview paused");
    }

    pub fn resume_preview(&self) {
        self.inner.preview_paused.store(false, Ordering::SeqCst);
        let _ = self
            .inner
            .pipeline
            .commands
            .send(PipelineCommand::SetPreviewPaused(false));
        tracing::debug!("preview resumed");
    }

    /// Most recent preview frame, shared with the renderer.
    pub fn latest_frame(&self) -> Option<Arc<VideoFrame>> {
        self.inner.relay.latest()
    }

    /// Subscribe to controller events.
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.inner.events.subscribe()
    }

    /// Every lens the catalog exposes, derived entries included.
    pub fn available_lenses(&self) -> Vec<LensId> {
        self.inner.catalog.available()
    }

    /// Consistent snapshot of the controller.
    pub async fn state(&self) -> CaptureState {
        let guard = self.inner.session.lock().await;
        self.inner.snapshot_with(guard.as_ref())
    }

    /// Release the session: cancel any recording, stop capture and free the
    /// renderer texture. Idempotent; a released controller can initialize
    /// again.
    pub async fn dispose(&self) {
        let inner = &self.inner;
        // Serialized with start_recording on the session lock: a start that
        // won the lock has its recording registered before the cancel below
        // runs, a start that lost finds the session gone.
        let mut guard = inner.session.lock().await;
        if let Some(task) = inner.deadline.lock().take() {
            task.abort();
        }
        inner.metering.cancel_schedule();

        let (reply, reply_rx) = oneshot::channel();
        if inner
            .pipeline
            .commands
            .send(PipelineCommand::CancelRecording { reply })
            .is_ok()
        {
            let _ = reply_rx.await;
        }

        let Some(mut session) = guard.take() else {
            return;
        };
        session
            .flash
            .quiesce(&session.descriptor, session.device.as_mut());
        session.device.stop_stream();
        let ActiveSession {
            device,
            audio,
            texture,
            ..
        } = session;
        drop(device);
        inner.release_output(texture, audio);
        inner.preview_paused.store(false, Ordering::SeqCst);
        let _ = inner
            .pipeline
            .commands
            .send(PipelineCommand::SetPreviewPaused(false));
        tracing::info!("camera released");
    }

    fn schedule_metering_reset(&self) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.metering.schedule_reset(async move {
            let Some(inner) = weak.upgrade() else { return };
            let mut guard = inner.session.lock().await;
            if let Some(session) = guard.as_mut() {
                let _ = session.device.reset_auto();
                tracing::debug!("metering returned to continuous auto");
            }
        });
    }
}

impl Inner {
    /// Issue the stop, wait for the finished file, then put recording-time
    /// light out. A `NotRecording` outcome touches nothing.
    async fn finish_recording(inner: &Arc<Inner>) -> CameraResult<RecordingResult> {
        let (reply, reply_rx) = oneshot::channel();
        inner
            .pipeline
            .commands
            .send(PipelineCommand::StopRecording { reply })
            .map_err(|_| CameraError::SessionClosed)?;
        let result = match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(CameraError::SessionClosed),
        };

        if !matches!(result, Err(CameraError::NotRecording)) {
            let mut guard = inner.session.lock().await;
            if let Some(session) = guard.as_mut() {
                let ActiveSession {
                    descriptor,
                    device,
                    flash,
                    ..
                } = session;
                flash.on_recording_stop(descriptor, device.as_mut());
            }
        }
        result
    }

    /// Arm the max-duration stop for the recording that just started.
    fn arm_deadline(inner: &Arc<Inner>, max: Duration) {
        let weak = Arc::downgrade(inner);
        let task = tokio::spawn(async move {
            tokio::time::sleep(max).await;
            let Some(inner) = weak.upgrade() else { return };
            // Untrack without aborting; this task is the one running.
            inner.deadline.lock().take();
            tracing::info!("max duration reached, stopping recording");
            match Inner::finish_recording(&inner).await {
                Ok(result) => {
                    let _ = inner
                        .events
                        .send(ControllerEvent::RecordingAutoStopped(result));
                }
                // A manual stop got there first.
                Err(CameraError::NotRecording) => {}
                Err(e) => {
                    tracing::error!("deadline stop failed: {e}");
                    let _ = inner.events.send(ControllerEvent::RecordingError(e.to_string()));
                }
            }
        });
        if let Some(previous) = inner.deadline.lock().replace(task) {
            previous.abort();
        }
    }

    /// Drop renderer and audio wiring once no session remains.
    fn release_output(
        &self,
        texture: u64,
        audio: Option<Box<dyn crate::hardware::AudioSource>>,
    ) {
        if let Some(mut audio) = audio {
            audio.stop();
        }
        self.hooks.unregister_texture(texture);
        let _ = self.pipeline.commands.send(PipelineCommand::SetTexture(None));
    }

    fn snapshot_with(&self, session: Option<&ActiveSession>) -> CaptureState {
        let available_lenses = self.catalog.available();
        let has_front_lens = self.catalog.has_front();
        let has_back_lens = self.catalog.has_back();
        let preview_paused = self.preview_paused.load(Ordering::SeqCst);

        let Some(session) = session else {
            return CaptureState {
                initialized: false,
                is_recording: false,
                preview_paused,
                lens: None,
                available_lenses,
                quality_preset: None,
                flash_mode: FlashMode::Off,
                zoom: zoom::MIN_ZOOM,
                zoom_range: ZoomRange::default(),
                aspect_ratio: 0.0,
                preview_width: 0,
                preview_height: 0,
                has_flash: false,
                has_front_lens,
                has_back_lens,
                supports_focus_point: false,
                supports_exposure_point: false,
                texture_id: None,
                metadata: None,
            };
        };

        // The preview presents portrait regardless of sensor orientation.
        let (width, height) = session.device.frame_size();
        let preview_width = width.min(height);
        let preview_height = width.max(height);
        let aspect_ratio = if preview_height == 0 {
            0.0
        } else {
            preview_width as f32 / preview_height as f32
        };

        CaptureState {
            initialized: true,
            is_recording: self.recording_flag.load(Ordering::SeqCst),
            preview_paused,
            lens: Some(session.descriptor.id),
            available_lenses,
            quality_preset: Some(session.preset),
            flash_mode: session.flash.mode(),
            zoom: session.device.zoom(),
            zoom_range: zoom::sanitize_range(session.device.zoom_range()),
            aspect_ratio,
            preview_width,
            preview_height,
            has_flash: flash_available(
                &session.descriptor,
                session.allow_screen_flash,
                self.brightness.is_some(),
            ),
            has_front_lens,
            has_back_lens,
            supports_focus_point: session.descriptor.supports_focus_point,
            supports_exposure_point: session.descriptor.supports_exposure_point,
            texture_id: Some(session.texture),
            metadata: Some(session.metadata),
        }
    }
}
