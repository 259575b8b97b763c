//! camcore - camera capture and recording controller.
//!
//! Lens discovery and selection, a live preview relay toward an embedding
//! renderer, real-time H.264/AAC recording and the interactive capture
//! controls (flash, tap-to-meter, zoom), all behind one async controller.
//! Hardware sits behind trait seams, so the whole stack runs against real
//! devices or against the simulated backend in `hardware::sim`.

pub mod catalog;
pub mod controller;
pub mod controls;
pub mod encoder;
pub mod error;
pub mod hardware;
pub mod session;
pub mod state;

mod pipeline;
mod relay;

pub use catalog::{DeviceCatalog, LensDescriptor, LensId, LensKind, LensPosition};
pub use controller::{CameraController, ControllerConfig};
pub use encoder::RecordingOptions;
pub use error::{CameraError, CameraResult, EncoderError};
pub use hardware::{RendererHooks, ScreenBrightness, VideoFrame};
pub use session::preset::QualityPreset;
pub use state::{
    CaptureState, ControllerEvent, FlashMode, LensMetadata, RecordingResult, ZoomRange,
};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the tracing subscriber for binaries embedding the controller.
/// `RUST_LOG` overrides the default filter.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camcore=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
