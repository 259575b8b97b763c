//! Recording writers
//!
//! The pipeline talks to the container writer through `MediaWriter`. The
//! FFmpeg implementation lives in `ffmpeg.rs`; tests substitute their own
//! factory. Output paths are named by millisecond timestamp and suffixed
//! when taken, so two recordings can never collide on disk.

pub mod ffmpeg;

pub use ffmpeg::FfmpegWriterFactory;

use crate::error::EncoderError;
use crate::hardware::{AudioChunk, PixelFormat, VideoFrame};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Fixed parameters of one recording, decided at start.
#[derive(Debug, Clone, PartialEq)]
pub struct WriterSpec {
    pub path: PathBuf,

    /// Source frame dimensions as captured.
    pub source_width: u32,
    pub source_height: u32,

    pub fps: u32,
    pub pixel_format: PixelFormat,

    /// Rotate the encoded video to portrait when the source is landscape.
    pub portrait: bool,
}

impl WriterSpec {
    /// Output dimensions after the portrait rotation.
    pub fn output_size(&self) -> (u32, u32) {
        if self.portrait && self.source_width > self.source_height {
            (self.source_height, self.source_width)
        } else {
            (self.source_width, self.source_height)
        }
    }

    /// Bytes one source frame must occupy to be accepted.
    pub fn frame_bytes(&self) -> usize {
        self.pixel_format
            .frame_bytes(self.source_width, self.source_height)
    }
}

/// Dimensions read back from the finished container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrittenTracks {
    pub width: u32,
    pub height: u32,
}

/// A live container writer.
///
/// Appends arrive from the frame worker with timestamps already rebased
/// onto the recording timeline. `finalize` and `cancel` may block; the
/// worker hands them to a blocking task.
pub trait MediaWriter: Send {
    fn append_video(&mut self, frame: &VideoFrame, pts: Duration) -> Result<(), EncoderError>;

    fn append_audio(&mut self, chunk: &AudioChunk, pts: Duration) -> Result<(), EncoderError>;

    /// Close inputs, wait for the container, read the written track
    /// dimensions back.
    fn finalize(self: Box<Self>) -> Result<WrittenTracks, EncoderError>;

    /// Tear down without producing a usable file.
    fn cancel(self: Box<Self>);
}

/// Opens writers. The production factory spawns FFmpeg; the simulated one
/// writes stub containers.
pub trait WriterFactory: Send + Sync {
    fn open(&self, spec: &WriterSpec) -> Result<Box<dyn MediaWriter>, EncoderError>;

    /// Warm whatever the first `open` would otherwise pay for. Called once
    /// per session, must not block the caller, and failures stay internal.
    fn prewarm(&self) {}
}

/// Caller options for one recording.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingOptions {
    /// Stop automatically once this much wall-clock time has passed.
    pub max_duration: Option<Duration>,

    /// Write under the OS temp directory instead of the user's videos
    /// directory.
    pub use_temporary_storage: bool,

    /// Exact directory to write into; overrides the storage flag.
    pub output_directory: Option<PathBuf>,
}

/// Directory a new recording lands in: the caller's choice, else temp
/// storage, else the user videos directory, else temp as the last resort.
pub fn resolve_output_dir(options: &RecordingOptions) -> PathBuf {
    if let Some(dir) = &options.output_directory {
        return dir.clone();
    }
    if options.use_temporary_storage {
        return std::env::temp_dir();
    }
    UserDirs::new()
        .and_then(|dirs| dirs.video_dir().map(Path::to_path_buf))
        .unwrap_or_else(std::env::temp_dir)
}

/// Allocate a millisecond-timestamp output path inside `dir`, appending a
/// numeric suffix while the name is taken.
pub fn allocate_output_path(dir: &Path) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let stamp = chrono::Utc::now().timestamp_millis();
    let mut path = dir.join(format!("{stamp}.mp4"));
    let mut suffix = 1u32;
    while path.exists() {
        path = dir.join(format!("{stamp}-{suffix}.mp4"));
        suffix += 1;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(width: u32, height: u32, portrait: bool) -> WriterSpec {
        WriterSpec {
            path: PathBuf::from("out.mp4"),
            source_width: width,
            source_height: height,
            fps: 30,
            pixel_format: PixelFormat::Rgba,
            portrait,
        }
    }

    #[test]
    fn test_output_size_rotates_landscape_sources() {
        assert_eq!(spec(1280, 720, true).output_size(), (720, 1280));
        assert_eq!(spec(1280, 720, false).output_size(), (1280, 720));
        // Already-portrait sources pass through.
        assert_eq!(spec(720, 1280, true).output_size(), (720, 1280));
    }

    #[test]
    fn test_allocate_suffixes_taken_names() {
        let dir = tempfile::tempdir().unwrap();

        let first = allocate_output_path(dir.path()).unwrap();
        std::fs::write(&first, b"x").unwrap();

        // Pre-create the next few stamps too, so even a slow clock tick
        // cannot hand the second call a fresh name.
        let stamp: i64 = first
            .file_stem()
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        for offset in 0..50 {
            let _ = std::fs::write(dir.path().join(format!("{}.mp4", stamp + offset)), b"x");
        }

        let second = allocate_output_path(dir.path()).unwrap();
        assert_ne!(first, second);
        assert!(!second.exists());
    }

    #[test]
    fn test_allocate_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("clips/today");
        let path = allocate_output_path(&nested).unwrap();
        assert!(path.starts_with(&nested));
        assert!(nested.is_dir());
    }

    #[test]
    fn test_resolve_output_dir_precedence() {
        let explicit = RecordingOptions {
            output_directory: Some(PathBuf::from("/tmp/clips")),
            use_temporary_storage: true,
            ..RecordingOptions::default()
        };
        assert_eq!(resolve_output_dir(&explicit), PathBuf::from("/tmp/clips"));

        let temp = RecordingOptions {
            use_temporary_storage: true,
            ..RecordingOptions::default()
        };
        assert_eq!(resolve_output_dir(&temp), std::env::temp_dir());
    }
}
