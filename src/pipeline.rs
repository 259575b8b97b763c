//! Frame pipeline
//!
//! One task owns the media fan-out. Every video frame, audio chunk and
//! recording command crosses it, so starting, writing and stopping a
//! recording serialize by construction and no append can race a finalize.
//! The task never blocks: finalize and cancel are handed to blocking tasks
//! and replied to from there.

use crate::encoder::{MediaWriter, WriterSpec};
use crate::error::{CameraError, EncoderError};
use crate::hardware::{AudioChunk, AudioSender, FrameSender, RendererHooks, VideoFrame};
use crate::relay::FrameRelay;
use crate::state::RecordingResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

/// Commands the controller sends the worker.
pub(crate) enum PipelineCommand {
    StartRecording {
        writer: Box<dyn MediaWriter>,
        spec: WriterSpec,
        reply: oneshot::Sender<Result<(), CameraError>>,
    },
    StopRecording {
        reply: oneshot::Sender<Result<RecordingResult, CameraError>>,
    },
    CancelRecording {
        reply: oneshot::Sender<()>,
    },

    /// Resolve `done` once a frame of at least `epoch` has been seen.
    AwaitEpoch {
        epoch: u64,
        done: oneshot::Sender<()>,
    },

    SetPreviewPaused(bool),

    /// Bind or unbind the renderer texture. Unbinding also clears the
    /// preview relay, so no frame outlives its renderer.
    SetTexture(Option<u64>),
}

/// Senders into the worker. Devices get clones of `frames` and `audio`.
#[derive(Clone)]
pub(crate) struct PipelineHandles {
    pub commands: mpsc::UnboundedSender<PipelineCommand>,
    pub frames: FrameSender,
    pub audio: AudioSender,
}

/// Spawn the worker onto the current runtime.
pub(crate) fn spawn(
    relay: Arc<FrameRelay>,
    hooks: Arc<dyn RendererHooks>,
    recording_flag: Arc<AtomicBool>,
) -> PipelineHandles {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let (audio_tx, audio_rx) = mpsc::unbounded_channel();

    let pipeline = Pipeline {
        relay,
        hooks,
        recording_flag,
        recording: None,
        pending_epoch: None,
        preview_paused: false,
        texture: None,
    };
    tokio::spawn(run(pipeline, command_rx, frame_rx, audio_rx));

    PipelineHandles {
        commands: command_tx,
        frames: frame_tx,
        audio: audio_tx,
    }
}

struct ActiveRecording {
    writer: Box<dyn MediaWriter>,
    spec: WriterSpec,

    /// Capture timestamp of the first written frame. Everything is rebased
    /// against it; audio arriving before it is dropped.
    anchor: Option<Duration>,

    started: Instant,
    video_frames: u64,
    audio_chunks: u64,
    dropped_misfit: u64,

    /// First append failure. Set once; later media is discarded and stop
    /// reports it.
    write_error: Option<EncoderError>,
}

struct Pipeline {
    relay: Arc<FrameRelay>,
    hooks: Arc<dyn RendererHooks>,
    recording_flag: Arc<AtomicBool>,
    recording: Option<ActiveRecording>,
    pending_epoch: Option<(u64, oneshot::Sender<()>)>,
    preview_paused: bool,
    texture: Option<u64>,
}

async fn run(
    mut pipeline: Pipeline,
    mut commands: mpsc::UnboundedReceiver<PipelineCommand>,
    mut frames: mpsc::UnboundedReceiver<VideoFrame>,
    mut audio: mpsc::UnboundedReceiver<AudioChunk>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => pipeline.on_command(command),
                None => break,
            },
            frame = frames.recv() => match frame {
                Some(frame) => pipeline.on_frame(frame),
                None => break,
            },
            chunk = audio.recv() => match chunk {
                Some(chunk) => pipeline.on_audio(chunk),
                None => break,
            },
        }
    }

    // The controller dropped its handles. Nothing can stop a recording any
    // more, so fold whatever is still open.
    pipeline.recording_flag.store(false, Ordering::SeqCst);
    if let Some(active) = pipeline.recording.take() {
        tracing::warn!("pipeline closing with a live recording, cancelling it");
        let writer = active.writer;
        let _ = tokio::task::spawn_blocking(move || writer.cancel());
    }
    tracing::debug!("frame pipeline exited");
}

impl Pipeline {
    fn on_command(&mut self, command: PipelineCommand) {
        match command {
            PipelineCommand::StartRecording {
                writer,
                spec,
                reply,
            } => {
                if self.recording.is_some() {
                    tokio::task::spawn_blocking(move || writer.cancel());
                    let _ = reply.send(Err(CameraError::AlreadyRecording));
                    return;
                }
                tracing::info!(
                    "recording started: {}x{} @ {}fps -> {}",
                    spec.source_width,
                    spec.source_height,
                    spec.fps,
                    spec.path.display()
                );
                self.recording = Some(ActiveRecording {
                    writer,
                    spec,
                    anchor: None,
                    started: Instant::now(),
                    video_frames: 0,
                    audio_chunks: 0,
                    dropped_misfit: 0,
                    write_error: None,
                });
                self.recording_flag.store(true, Ordering::SeqCst);
                let _ = reply.send(Ok(()));
            }
            PipelineCommand::StopRecording { reply } => self.stop_recording(reply),
            PipelineCommand::CancelRecording { reply } => {
                let Some(active) = self.recording.take() else {
                    let _ = reply.send(());
                    return;
                };
                self.recording_flag.store(false, Ordering::SeqCst);
                let writer = active.writer;
                // Reply once the teardown really finished, from off-worker.
                tokio::spawn(async move {
                    let _ = tokio::task::spawn_blocking(move || writer.cancel()).await;
                    let _ = reply.send(());
                });
                tracing::info!("recording cancelled");
            }
            PipelineCommand::AwaitEpoch { epoch, done } => {
                self.pending_epoch = Some((epoch, done));
            }
            PipelineCommand::SetPreviewPaused(paused) => {
                self.preview_paused = paused;
            }
            PipelineCommand::SetTexture(texture) => {
                if texture.is_none() {
                    self.relay.clear();
                }
                self.texture = texture;
            }
        }
    }

    fn stop_recording(&mut self, reply: oneshot::Sender<Result<RecordingResult, CameraError>>) {
        let Some(active) = self.recording.take() else {
            let _ = reply.send(Err(CameraError::NotRecording));
            return;
        };
        self.recording_flag.store(false, Ordering::SeqCst);

        let ActiveRecording {
            writer,
            spec,
            started,
            video_frames,
            audio_chunks,
            dropped_misfit,
            write_error,
            ..
        } = active;
        tracing::info!(
            "recording stopping after {video_frames} video frames, \
             {audio_chunks} audio chunks ({dropped_misfit} dropped)"
        );

        if let Some(e) = write_error {
            tokio::task::spawn_blocking(move || writer.cancel());
            let _ = reply.send(Err(CameraError::Encoder(e)));
            return;
        }

        let duration = started.elapsed();
        // Finalize waits on the container trailer; keep it off this task so
        // frames of a follow-up recording are never stalled behind it.
        tokio::spawn(async move {
            let finalized = tokio::task::spawn_blocking(move || writer.finalize()).await;
            let result = match finalized {
                Ok(Ok(tracks)) => Ok(RecordingResult {
                    path: spec.path.display().to_string(),
                    duration_ms: duration.as_millis() as u64,
                    width: tracks.width,
                    height: tracks.height,
                }),
                Ok(Err(e)) => Err(CameraError::Encoder(e)),
                Err(e) => Err(CameraError::Internal(format!("finalize task failed: {e}"))),
            };
            let _ = reply.send(result);
        });
    }

    fn on_frame(&mut self, frame: VideoFrame) {
        if let Some(active) = self.recording.as_mut() {
            if active.write_error.is_none() {
                let fits = frame.width == active.spec.source_width
                    && frame.height == active.spec.source_height
                    && frame.data.len() == active.spec.frame_bytes();
                if fits {
                    let anchor = *active.anchor.get_or_insert(frame.pts);
                    let pts = frame.pts.saturating_sub(anchor);
                    match active.writer.append_video(&frame, pts) {
                        Ok(()) => active.video_frames += 1,
                        Err(e) => {
                            tracing::error!("video append failed: {e}");
                            active.write_error = Some(e);
                        }
                    }
                } else {
                    if active.dropped_misfit == 0 {
                        tracing::warn!(
                            "dropping {}x{} frame, recording expects {}x{}",
                            frame.width,
                            frame.height,
                            active.spec.source_width,
                            active.spec.source_height
                        );
                    }
                    active.dropped_misfit += 1;
                }
            }
        }

        // The relay only feeds a bound renderer; frames arriving with no
        // texture (or after an unbind raced them) are preview no-ops.
        let frame = Arc::new(frame);
        if !self.preview_paused {
            if let Some(texture) = self.texture {
                self.relay.install(Arc::clone(&frame));
                self.hooks.on_frame_available(texture);
            }
        }

        if self
            .pending_epoch
            .as_ref()
            .is_some_and(|(epoch, _)| frame.epoch >= *epoch)
        {
            if let Some((_, done)) = self.pending_epoch.take() {
                let _ = done.send(());
            }
        }
    }

    fn on_audio(&mut self, chunk: AudioChunk) {
        let Some(active) = self.recording.as_mut() else {
            return;
        };
        if active.write_error.is_some() {
            return;
        }
        // No timeline until the first video frame lands.
        let Some(anchor) = active.anchor else { return };
        let Some(pts) = chunk.pts.checked_sub(anchor) else {
            return;
        };
        match active.writer.append_audio(&chunk, pts) {
            Ok(()) => active.audio_chunks += 1,
            Err(e) => {
                tracing::error!("audio append failed: {e}");
                active.write_error = Some(e);
            }
        }
    }
}
