//! Interactive controls: flash, metering, zoom.

pub mod flash;
pub mod metering;
pub mod zoom;

pub use flash::FlashEngine;
pub use metering::MeteringEngine;
