//! Error types for the camera controller
//!
//! Two domains: `CameraError` is what the controller surface returns,
//! `EncoderError` covers the container writer. Capability gaps are not
//! errors; operations like a torch toggle on a lens without one report
//! `false` instead of failing.

use crate::catalog::LensId;
use crate::session::preset::QualityPreset;
use thiserror::Error;

/// Errors raised by the container writer.
#[derive(Error, Debug)]
pub enum EncoderError {
    /// The encoder process could not be launched.
    #[error("failed to start encoder: {0}")]
    Spawn(String),

    /// Writing media data to the encoder failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The encoder exited unsuccessfully while finalizing.
    #[error("encoder exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    /// An append was issued after the writer finished.
    #[error("writer already finished")]
    Finished,
}

/// Errors returned by controller operations.
#[derive(Error, Debug)]
pub enum CameraError {
    /// No usable camera hardware, even after lens fallback.
    #[error("no camera device available")]
    NoDevice,

    /// The requested lens is not in the catalog.
    #[error("no camera device for lens {lens}")]
    NoDeviceForLens { lens: LensId },

    /// The hardware refused the lens as a session input.
    #[error("lens {lens} rejected by the capture session: {reason}")]
    InputRejected { lens: LensId, reason: String },

    /// The hardware refused the quality preset, including every fallback
    /// below it.
    #[error("quality preset {preset} rejected for lens {lens}")]
    PresetRejected { preset: QualityPreset, lens: LensId },

    /// The default audio input could not be opened.
    #[error("audio input unavailable: {0}")]
    AudioUnavailable(String),

    #[error("controller already initialized")]
    AlreadyInitialized,

    #[error("controller not initialized")]
    NotInitialized,

    #[error("already recording")]
    AlreadyRecording,

    #[error("not recording")]
    NotRecording,

    /// The controller was released while the operation was in flight.
    #[error("controller released")]
    SessionClosed,

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Encoder(#[from] EncoderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CameraResult<T> = Result<T, CameraError>;
