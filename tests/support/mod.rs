//! Shared fixtures for the controller integration tests.
#![allow(dead_code)]

use camcore::hardware::sim::{SimBackend, SimHandle, SimWriterFactory, SimWriterLog};
use camcore::hardware::{RendererHooks, ScreenBrightness};
use camcore::{CameraController, ControllerConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Renderer double counting texture traffic.
pub struct TestHooks {
    next_texture: AtomicU64,
    notified: AtomicU64,
    unregistered: Mutex<Vec<u64>>,
}

impl TestHooks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_texture: AtomicU64::new(1),
            notified: AtomicU64::new(0),
            unregistered: Mutex::new(Vec::new()),
        })
    }

    pub fn notifications(&self) -> u64 {
        self.notified.load(Ordering::SeqCst)
    }

    pub fn unregistered(&self) -> Vec<u64> {
        self.unregistered.lock().clone()
    }
}

impl RendererHooks for TestHooks {
    fn register_texture(&self) -> u64 {
        self.next_texture.fetch_add(1, Ordering::SeqCst)
    }

    fn on_frame_available(&self, _texture: u64) {
        self.notified.fetch_add(1, Ordering::SeqCst);
    }

    fn unregister_texture(&self, texture: u64) {
        self.unregistered.lock().push(texture);
    }
}

/// Brightness double remembering every level set.
pub struct TestBrightness {
    level: Mutex<f32>,
    history: Mutex<Vec<f32>>,
}

impl TestBrightness {
    pub fn new(level: f32) -> Arc<Self> {
        Arc::new(Self {
            level: Mutex::new(level),
            history: Mutex::new(Vec::new()),
        })
    }

    pub fn current(&self) -> f32 {
        *self.level.lock()
    }

    pub fn history(&self) -> Vec<f32> {
        self.history.lock().clone()
    }
}

impl ScreenBrightness for TestBrightness {
    fn brightness(&self) -> f32 {
        *self.level.lock()
    }

    fn set_brightness(&self, level: f32) {
        *self.level.lock() = level;
        self.history.lock().push(level);
    }
}

/// Timers short enough that tests settle in tens of milliseconds.
pub fn fast_config() -> ControllerConfig {
    ControllerConfig {
        metering_reset_delay: Duration::from_millis(200),
        switch_timeout: Duration::from_millis(500),
    }
}

pub struct Fixture {
    pub controller: CameraController,
    pub hw: SimHandle,
    pub writers: SimWriterLog,
    pub hooks: Arc<TestHooks>,
    pub brightness: Arc<TestBrightness>,
}

/// Controller over the phone-layout simulator.
pub fn phone_fixture() -> Fixture {
    fixture_with(SimBackend::phone())
}

pub fn fixture_with(backend: SimBackend) -> Fixture {
    let hw = backend.handle();
    let factory = SimWriterFactory::new();
    let writers = factory.handle();
    let hooks = TestHooks::new();
    let brightness = TestBrightness::new(0.5);
    let controller = CameraController::new(
        Box::new(backend),
        Arc::new(factory),
        hooks.clone(),
        Some(brightness.clone() as Arc<dyn ScreenBrightness>),
        fast_config(),
    );
    Fixture {
        controller,
        hw,
        writers,
        hooks,
        brightness,
    }
}
