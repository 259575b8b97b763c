//! Tap-to-focus and tap-to-expose
//!
//! Converts normalized portrait display taps into sensor coordinates and
//! schedules the timed return to continuous auto. Each new tap replaces the
//! previous schedule; the old timer is explicitly aborted, never orphaned.

use crate::hardware::SensorPoint;
use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Default interval after which metering returns to continuous auto.
pub const DEFAULT_RESET_DELAY: Duration = Duration::from_secs(3);

/// Map a display tap to sensor coordinates.
///
/// The sensor scans landscape while the display is portrait, a quarter turn
/// apart, so display (x, y) lands on sensor (y, 1 - x). Out-of-range input
/// is clamped onto the display edge first.
pub fn display_to_sensor(x: f32, y: f32) -> SensorPoint {
    let clamp = |v: f32| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.5 };
    let x = clamp(x);
    let y = clamp(y);
    SensorPoint { x: y, y: 1.0 - x }
}

/// Owns the single pending return-to-auto timer.
pub struct MeteringEngine {
    reset_delay: Duration,
    reset_task: Mutex<Option<JoinHandle<()>>>,
}

impl MeteringEngine {
    pub fn new(reset_delay: Duration) -> Self {
        Self {
            reset_delay,
            reset_task: Mutex::new(None),
        }
    }

    pub fn reset_delay(&self) -> Duration {
        self.reset_delay
    }

    /// Schedule `reset` to run after the configured delay, replacing any
    /// pending schedule.
    pub fn schedule_reset<F>(&self, reset: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = self.reset_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            reset.await;
        });

        if let Some(previous) = self.reset_task.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Abort the pending schedule, if any.
    pub fn cancel_schedule(&self) {
        if let Some(task) = self.reset_task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for MeteringEngine {
    fn drop(&mut self) {
        self.cancel_schedule();
    }
}
