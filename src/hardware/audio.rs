//! Microphone capture
//!
//! Default-input capture through cpal. The stream handle is not Send, so a
//! dedicated thread owns it for the whole run and forwards each callback
//! into the pipeline's audio channel as f32 chunks.

use crate::error::CameraError;
use crate::hardware::{AudioChunk, AudioSender, AudioSource, CaptureClock};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

fn stream_error(e: cpal::StreamError) {
    tracing::warn!("audio stream error: {e}");
}

/// Default audio input as an `AudioSource`.
pub struct CpalMicrophone {
    clock: CaptureClock,
    stop: Option<Arc<AtomicBool>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalMicrophone {
    pub fn new(clock: CaptureClock) -> Self {
        Self {
            clock,
            stop: None,
            thread: None,
        }
    }
}

impl AudioSource for CpalMicrophone {
    fn start(&mut self, chunks: AudioSender) -> Result<(), CameraError> {
        self.stop();

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let clock = self.clock;
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), String>>();

        let thread = std::thread::spawn(move || {
            let host = cpal::default_host();
            let Some(device) = host.default_input_device() else {
                let _ = ready_tx.send(Err("no default input device".into()));
                return;
            };
            let supported = match device.default_input_config() {
                Ok(config) => config,
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("no default input config: {e}")));
                    return;
                }
            };

            let sample_format = supported.sample_format();
            let sample_rate = supported.sample_rate().0;
            let channels = supported.channels();
            let config: cpal::StreamConfig = supported.into();

            let stream = match sample_format {
                SampleFormat::F32 => {
                    let tx = chunks.clone();
                    device.build_input_stream(
                        &config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            let _ = tx.send(AudioChunk {
                                samples: data.to_vec(),
                                sample_rate,
                                channels,
                                pts: clock.now(),
                            });
                        },
                        stream_error,
                        None,
                    )
                }
                SampleFormat::I16 => {
                    let tx = chunks.clone();
                    device.build_input_stream(
                        &config,
                        move |data: &[i16], _: &cpal::InputCallbackInfo| {
                            let samples = data.iter().map(|&v| v as f32 / 32_768.0).collect();
                            let _ = tx.send(AudioChunk {
                                samples,
                                sample_rate,
                                channels,
                                pts: clock.now(),
                            });
                        },
                        stream_error,
                        None,
                    )
                }
                SampleFormat::U16 => {
                    let tx = chunks.clone();
                    device.build_input_stream(
                        &config,
                        move |data: &[u16], _: &cpal::InputCallbackInfo| {
                            let samples = data
                                .iter()
                                .map(|&v| (v as f32 - 32_768.0) / 32_768.0)
                                .collect();
                            let _ = tx.send(AudioChunk {
                                samples,
                                sample_rate,
                                channels,
                                pts: clock.now(),
                            });
                        },
                        stream_error,
                        None,
                    )
                }
                other => {
                    let _ = ready_tx.send(Err(format!("unsupported sample format {other:?}")));
                    return;
                }
            };

            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("failed to build input stream: {e}")));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(format!("failed to start input stream: {e}")));
                return;
            }
            let _ = ready_tx.send(Ok(()));
            tracing::info!(
                "audio capture running: {} Hz, {} channel(s), {:?}",
                sample_rate,
                channels,
                sample_format
            );

            while !stop_flag.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(50));
            }
            drop(stream);
            tracing::debug!("audio capture thread exiting");
        });

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {
                self.stop = Some(stop);
                self.thread = Some(thread);
                Ok(())
            }
            Ok(Err(reason)) => {
                let _ = thread.join();
                Err(CameraError::AudioUnavailable(reason))
            }
            Err(_) => {
                // Let the thread tear itself down whenever it comes up.
                stop.store(true, Ordering::SeqCst);
                Err(CameraError::AudioUnavailable(
                    "input stream did not start in time".into(),
                ))
            }
        }
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

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        AudioSource::stop(self);
    }
}
