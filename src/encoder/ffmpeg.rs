//! FFmpeg container writer
//!
//! Video goes to an ffmpeg child as raw frames over stdin and is encoded to
//! H.264 in real time. Video timing is frame-count based at the declared
//! rate. Audio is staged to a WAV file next to the output and muxed in at
//! finalize with the measured start offset, after which the muxed container
//! replaces the video-only one and ffprobe reads the finished track
//! dimensions back.

use super::{MediaWriter, WriterFactory, WriterSpec, WrittenTracks};
use crate::error::EncoderError;
use crate::hardware::{AudioChunk, VideoFrame};
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

/// Opens `FfmpegWriter`s. Requires `ffmpeg` and `ffprobe` on PATH.
pub struct FfmpegWriterFactory;

impl WriterFactory for FfmpegWriterFactory {
    fn open(&self, spec: &WriterSpec) -> Result<Box<dyn MediaWriter>, EncoderError> {
        Ok(Box::new(FfmpegWriter::open(spec)?))
    }

    /// Spin up and cancel a throwaway encode so the first real recording
    /// does not pay the ffmpeg cold start.
    fn prewarm(&self) {
        std::thread::spawn(|| {
            let dir = match tempfile::tempdir() {
                Ok(dir) => dir,
                Err(e) => {
                    tracing::debug!("encoder warmup skipped: {e}");
                    return;
                }
            };
            let spec = WriterSpec {
                path: dir.path().join("warmup.mp4"),
                source_width: 192,
                source_height: 144,
                fps: 30,
                pixel_format: crate::hardware::PixelFormat::Rgba,
                portrait: false,
            };
            match FfmpegWriter::open(&spec) {
                Ok(writer) => {
                    Box::new(writer).cancel();
                    tracing::debug!("encoder warmup done");
                }
                Err(e) => tracing::debug!("encoder warmup failed: {e}"),
            }
        });
    }
}

/// Arguments for the real-time H.264 encode.
fn video_args(spec: &WriterSpec) -> Vec<String> {
    let fps = spec.fps.max(1);
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pixel_format".into(),
        spec.pixel_format.ffmpeg_name().into(),
        "-video_size".into(),
        format!("{}x{}", spec.source_width, spec.source_height),
        "-framerate".into(),
        fps.to_string(),
        "-i".into(),
        "-".into(),
    ];
    if spec.portrait && spec.source_width > spec.source_height {
        args.push("-vf".into());
        args.push("transpose=1".into());
    }
    args.extend([
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "veryfast".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-crf".into(),
        "18".into(),
        "-g".into(),
        (fps * 2).to_string(),
        "-movflags".into(),
        "+faststart".into(),
        spec.path.to_string_lossy().into_owned(),
    ]);
    args
}

/// Arguments to mux the staged mono audio under the encoded video.
fn mux_args(video: &Path, wav: &Path, offset: Duration, out: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-i".into(),
        video.to_string_lossy().into_owned(),
        "-itsoffset".into(),
        format!("{:.3}", offset.as_secs_f64()),
        "-i".into(),
        wav.to_string_lossy().into_owned(),
        "-map".into(),
        "0:v:0".into(),
        "-map".into(),
        "1:a:0".into(),
        "-c:v".into(),
        "copy".into(),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        "128k".into(),
        "-ac".into(),
        "1".into(),
        "-shortest".into(),
        "-movflags".into(),
        "+faststart".into(),
        out.to_string_lossy().into_owned(),
    ]
}

/// 44-byte RIFF header for mono 32-bit float PCM.
fn wav_header(sample_rate: u32, data_bytes: u32) -> [u8; 44] {
    let mut header = [0u8; 44];
    let byte_rate = sample_rate * 4;
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&(36 + data_bytes).to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&3u16.to_le_bytes()); // IEEE float
    header[22..24].copy_from_slice(&1u16.to_le_bytes()); // mono
    header[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&4u16.to_le_bytes()); // block align
    header[34..36].copy_from_slice(&32u16.to_le_bytes()); // bits per sample
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_bytes.to_le_bytes());
    header
}

/// Float WAV staging file for the audio track.
struct WavSink {
    file: File,
    path: PathBuf,
    sample_rate: u32,
    data_bytes: u32,
}

impl WavSink {
    fn create(path: PathBuf, sample_rate: u32) -> Result<Self, EncoderError> {
        let mut file = File::create(&path)?;
        // Placeholder sizes, fixed up on close.
        file.write_all(&wav_header(sample_rate, 0))?;
        Ok(Self {
            file,
            path,
            sample_rate,
            data_bytes: 0,
        })
    }

    /// Downmix to mono and append.
    fn write_chunk(&mut self, chunk: &AudioChunk) -> Result<(), EncoderError> {
        let channels = chunk.channels.max(1) as usize;
        let mut bytes = Vec::with_capacity((chunk.samples.len() / channels) * 4);
        for frame in chunk.samples.chunks_exact(channels) {
            let sum: f32 = frame.iter().sum();
            bytes.extend_from_slice(&(sum / channels as f32).to_le_bytes());
        }
        self.file.write_all(&bytes)?;
        self.data_bytes += bytes.len() as u32;
        Ok(())
    }

    /// Rewrite the header with real sizes and hand the path back.
    fn close(mut self) -> Result<PathBuf, EncoderError> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file
            .write_all(&wav_header(self.sample_rate, self.data_bytes))?;
        self.file.flush()?;
        Ok(self.path)
    }
}

/// Real-time H.264/AAC writer over an ffmpeg child process.
pub struct FfmpegWriter {
    spec: WriterSpec,
    process: Option<Child>,
    wav: Option<WavSink>,

    /// Timeline position of the first audio sample, used as the mux offset.
    audio_offset: Option<Duration>,

    video_frames: u64,
    finished: bool,
}

impl FfmpegWriter {
    pub fn open(spec: &WriterSpec) -> Result<Self, EncoderError> {
        if let Some(dir) = spec.path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let process = Command::new("ffmpeg")
            .args(video_args(spec))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EncoderError::Spawn(format!("ffmpeg: {e}")))?;

        let (out_width, out_height) = spec.output_size();
        tracing::info!(
            "started ffmpeg writer: {}x{} @ {}fps -> {}x{} {}",
            spec.source_width,
            spec.source_height,
            spec.fps,
            out_width,
            out_height,
            spec.path.display()
        );

        Ok(Self {
            spec: spec.clone(),
            process: Some(process),
            wav: None,
            audio_offset: None,
            video_frames: 0,
            finished: false,
        })
    }

    fn wav_path(&self) -> PathBuf {
        self.spec.path.with_extension("wav")
    }
}

impl MediaWriter for FfmpegWriter {
    fn append_video(&mut self, frame: &VideoFrame, _pts: Duration) -> Result<(), EncoderError> {
        if self.finished {
            return Err(EncoderError::Finished);
        }
        let process = self.process.as_mut().ok_or(EncoderError::Finished)?;
        let stdin = process.stdin.as_mut().ok_or(EncoderError::Finished)?;
        stdin.write_all(&frame.data)?;
        self.video_frames += 1;
        Ok(())
    }

    fn append_audio(&mut self, chunk: &AudioChunk, pts: Duration) -> Result<(), EncoderError> {
        if self.finished {
            return Err(EncoderError::Finished);
        }
        if self.wav.is_none() {
            self.wav = Some(WavSink::create(self.wav_path(), chunk.sample_rate)?);
        }
        if self.audio_offset.is_none() {
            self.audio_offset = Some(pts);
        }
        self.wav
            .as_mut()
            .ok_or(EncoderError::Finished)?
            .write_chunk(chunk)
    }

    fn finalize(mut self: Box<Self>) -> Result<WrittenTracks, EncoderError> {
        self.finished = true;
        let Some(mut process) = self.process.take() else {
            return Err(EncoderError::Finished);
        };

        // Close stdin to signal EOF, then wait for the trailer.
        drop(process.stdin.take());
        let output = process.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(EncoderError::Failed {
                status: output.status.to_string(),
                stderr,
            });
        }
        tracing::info!(
            "ffmpeg finished: {} frames, {}",
            self.video_frames,
            self.spec.path.display()
        );

        if let Some(wav) = self.wav.take() {
            let offset = self.audio_offset.unwrap_or_default();
            let wav_path = wav.close()?;
            mux_audio(&self.spec.path, &wav_path, offset)?;
            let _ = std::fs::remove_file(&wav_path);
        }

        let (width, height) = match probe_dimensions(&self.spec.path) {
            Ok(size) => size,
            Err(e) => {
                tracing::warn!("ffprobe read-back failed: {e}, reporting requested dimensions");
                self.spec.output_size()
            }
        };
        Ok(WrittenTracks { width, height })
    }

    fn cancel(mut self: Box<Self>) {
        self.finished = true;
        if let Some(mut process) = self.process.take() {
            let _ = process.kill();
            let _ = process.wait();
        }
        if let Some(wav) = self.wav.take() {
            let _ = std::fs::remove_file(&wav.path);
        }
        let _ = std::fs::remove_file(&self.spec.path);
        tracing::info!("ffmpeg writer cancelled: {}", self.spec.path.display());
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        // finalize/cancel take the child on the normal paths; any other exit
        // must not leave one running.
        if let Some(mut process) = self.process.take() {
            let _ = process.kill();
            let _ = process.wait();
        }
    }
}

/// Mux the staged WAV under the video, replacing the container in place.
fn mux_audio(video: &Path, wav: &Path, offset: Duration) -> Result<(), EncoderError> {
    let muxed = video.with_extension("mux.mp4");
    let output = Command::new("ffmpeg")
        .args(mux_args(video, wav, offset, &muxed))
        .output()
        .map_err(|e| EncoderError::Spawn(format!("ffmpeg mux: {e}")))?;

    if !output.status.success() {
        let _ = std::fs::remove_file(&muxed);
        return Err(EncoderError::Failed {
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    std::fs::rename(&muxed, video)?;
    Ok(())
}

/// Read the written video track dimensions back.
fn probe_dimensions(path: &Path) -> Result<(u32, u32), EncoderError> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=s=x:p=0",
        ])
        .arg(path)
        .output()
        .map_err(|e| EncoderError::Spawn(format!("ffprobe: {e}")))?;

    if !output.status.success() {
        return Err(EncoderError::Failed {
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let text = String::from_utf8_lossy(&output.stdout);
    let mut parts = text.trim().split('x');
    let width = parts.next().and_then(|v| v.trim().parse().ok());
    let height = parts.next().and_then(|v| v.trim().parse().ok());
    match (width, height) {
        (Some(width), Some(height)) => Ok((width, height)),
        _ => Err(EncoderError::Failed {
            status: "ffprobe".into(),
            stderr: format!("unparsable dimensions: {:?}", text.trim()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::PixelFormat;

    fn spec(width: u32, height: u32, portrait: bool) -> WriterSpec {
        WriterSpec {
            path: PathBuf::from("/tmp/clip.mp4"),
            source_width: width,
            source_height: height,
            fps: 30,
            pixel_format: PixelFormat::Rgba,
            portrait,
        }
    }

    #[test]
    fn test_video_args_transpose_landscape_only() {
        let landscape = video_args(&spec(1280, 720, true));
        let transpose = landscape.iter().position(|a| a == "-vf").unwrap();
        assert_eq!(landscape[transpose + 1], "transpose=1");

        let portrait_source = video_args(&spec(720, 1280, true));
        assert!(!portrait_source.iter().any(|a| a == "-vf"));

        let no_rotation = video_args(&spec(1280, 720, false));
        assert!(!no_rotation.iter().any(|a| a == "-vf"));
    }

    #[test]
    fn test_video_args_shape() {
        let args = video_args(&spec(640, 480, false));
        assert_eq!(args[0], "-y");
        assert!(args.windows(2).any(|w| w == ["-pixel_format", "rgba"]));
        assert!(args.windows(2).any(|w| w == ["-video_size", "640x480"]));
        assert!(args.windows(2).any(|w| w == ["-g", "60"]));
        assert_eq!(args.last().unwrap(), "/tmp/clip.mp4");
    }

    #[test]
    fn test_video_args_zero_fps_pinned() {
        let mut zero = spec(640, 480, false);
        zero.fps = 0;
        let args = video_args(&zero);
        assert!(args.windows(2).any(|w| w == ["-framerate", "1"]));
    }

    #[test]
    fn test_mux_args_offset_and_mono() {
        let args = mux_args(
            Path::new("v.mp4"),
            Path::new("a.wav"),
            Duration::from_millis(500),
            Path::new("out.mp4"),
        );
        assert!(args.windows(2).any(|w| w == ["-itsoffset", "0.500"]));
        assert!(args.windows(2).any(|w| w == ["-ac", "1"]));
        assert!(args.windows(2).any(|w| w == ["-c:v", "copy"]));
        assert!(args.contains(&"-shortest".to_string()));
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn test_wav_header_layout() {
        let header = wav_header(48_000, 960);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(u32::from_le_bytes(header[4..8].try_into().unwrap()), 996);
        // IEEE float, mono, 32 bit.
        assert_eq!(u16::from_le_bytes(header[20..22].try_into().unwrap()), 3);
        assert_eq!(u16::from_le_bytes(header[22..24].try_into().unwrap()), 1);
        assert_eq!(u16::from_le_bytes(header[34..36].try_into().unwrap()), 32);
        assert_eq!(
            u32::from_le_bytes(header[24..28].try_into().unwrap()),
            48_000
        );
        assert_eq!(u32::from_le_bytes(header[40..44].try_into().unwrap()), 960);
    }

    #[test]
    fn test_wav_sink_downmixes_and_fixes_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stage.wav");
        let mut sink = WavSink::create(path.clone(), 48_000).unwrap();

        let chunk = AudioChunk {
            samples: vec![0.5, -0.5, 1.0, 0.0],
            sample_rate: 48_000,
            channels: 2,
            pts: Duration::ZERO,
        };
        sink.write_chunk(&chunk).unwrap();
        let closed = sink.close().unwrap();

        let bytes = std::fs::read(&closed).unwrap();
        // Two mono samples behind the 44-byte header.
        assert_eq!(bytes.len(), 44 + 8);
        assert_eq!(u32::from_le_bytes(bytes[40..44].try_into().unwrap()), 8);
        let first = f32::from_le_bytes(bytes[44..48].try_into().unwrap());
        let second = f32::from_le_bytes(bytes[48..52].try_into().unwrap());
        assert_eq!(first, 0.0);
        assert_eq!(second, 0.5);
    }
}
