//! End-to-end controller tests over the simulated hardware.

mod support;

use camcore::hardware::sim::{SimBackend, SimLens};
use camcore::hardware::SensorPoint;
use camcore::{
    CameraError, ControllerEvent, FlashMode, LensDescriptor, LensId, LensKind, LensPosition,
    QualityPreset, RecordingOptions,
};
use std::time::Duration;
use support::{fixture_with, phone_fixture};

const BACK_TELEPHOTO: LensId = LensId {
    position: LensPosition::Back,
    kind: LensKind::Telephoto,
};

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test]
async fn test_initialize_reports_the_live_session() {
    let fx = phone_fixture();
    let state = fx
        .controller
        .initialize(LensId::BACK_WIDE, QualityPreset::High, true, false)
        .await
        .unwrap();

    assert!(state.initialized);
    assert_eq!(state.lens, Some(LensId::BACK_WIDE));
    assert_eq!(state.quality_preset, Some(QualityPreset::High));
    // The 128x96 landscape source presents as a portrait preview.
    assert_eq!((state.preview_width, state.preview_height), (96, 128));
    assert!((state.aspect_ratio - 0.75).abs() < 1e-6);
    assert_eq!(state.texture_id, Some(1));
    assert_eq!(state.zoom_range.max, 6.0);
    assert!(state.has_flash);
    assert!(state.supports_focus_point);
    assert!(state.has_front_lens);
    assert!(state.has_back_lens);
    assert!(state.metadata.unwrap().focal_length_35mm.is_some());

    // The autofocus ultra-wide earns the derived macro entry.
    assert!(state.available_lenses.contains(&LensId::BACK_MACRO));
    assert_eq!(fx.controller.available_lenses().len(), 5);
}

#[tokio::test]
async fn test_preview_frames_reach_relay_and_renderer() {
    let fx = phone_fixture();
    fx.controller
        .initialize(LensId::BACK_WIDE, QualityPreset::High, true, false)
        .await
        .unwrap();
    sleep_ms(80).await;

    let frame = fx.controller.latest_frame().unwrap();
    assert_eq!((frame.width, frame.height), (128, 96));
    assert_eq!(frame.epoch, 1);
    assert!(fx.hooks.notifications() > 0);
}

#[tokio::test]
async fn test_missing_lens_falls_back_to_back_wide() {
    let fx = fixture_with(SimBackend::new(vec![
        SimLens::new(LensDescriptor::physical(LensId::BACK_WIDE)),
        SimLens::new(LensDescriptor::physical(LensId::FRONT_WIDE)),
    ]));

    let state = fx
        .controller
        .initialize(BACK_TELEPHOTO, QualityPreset::High, true, false)
        .await
        .unwrap();
    assert_eq!(state.lens, Some(LensId::BACK_WIDE));
}

#[tokio::test]
async fn test_front_only_device_falls_back_to_front_wide() {
    let fx = fixture_with(SimBackend::new(vec![SimLens::new(
        LensDescriptor::physical(LensId::FRONT_WIDE),
    )]));

    let state = fx
        .controller
        .initialize(LensId::BACK_WIDE, QualityPreset::High, true, false)
        .await
        .unwrap();
    assert_eq!(state.lens, Some(LensId::FRONT_WIDE));
    assert!(!state.has_back_lens);
}

#[tokio::test]
async fn test_no_hardware_reports_no_device() {
    let fx = fixture_with(SimBackend::new(Vec::new()));
    let err = fx
        .controller
        .initialize(LensId::BACK_WIDE, QualityPreset::High, true, false)
        .await
        .unwrap_err();
    assert!(matches!(err, CameraError::NoDevice));
}

#[tokio::test]
async fn test_preset_ladder_settles_on_accepted_tier() {
    let fx = fixture_with(SimBackend::new(vec![SimLens::new(
        LensDescriptor::physical(LensId::BACK_WIDE),
    )
    .with_max_preset(QualityPreset::Medium)]));

    let state = fx
        .controller
        .initialize(LensId::BACK_WIDE, QualityPreset::Max, true, false)
        .await
        .unwrap();
    assert_eq!(state.quality_preset, Some(QualityPreset::Medium));
    assert_eq!((state.preview_width, state.preview_height), (72, 96));
}

#[tokio::test]
async fn test_initialize_twice_errors_until_disposed() {
    let fx = phone_fixture();
    fx.controller
        .initialize(LensId::BACK_WIDE, QualityPreset::High, true, false)
        .await
        .unwrap();

    let err = fx
        .controller
        .initialize(LensId::BACK_WIDE, QualityPreset::High, true, false)
        .await
        .unwrap_err();
    assert!(matches!(err, CameraError::AlreadyInitialized));

    fx.controller.dispose().await;
    fx.controller
        .initialize(LensId::BACK_WIDE, QualityPreset::High, true, false)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_switch_round_trip_between_positions() {
    let fx = phone_fixture();
    fx.controller
        .initialize(LensId::BACK_WIDE, QualityPreset::High, true, true)
        .await
        .unwrap();

    let front = fx.controller.switch_camera(LensId::FRONT_WIDE).await.unwrap();
    assert_eq!(front.lens, Some(LensId::FRONT_WIDE));
    assert!(!front.supports_focus_point);
    assert!(front.supports_exposure_point);
    // The texture survives the switch; only the stream behind it changes.
    assert_eq!(front.texture_id, Some(1));
    assert!(fx.hw.mirrored(LensId::FRONT_WIDE));

    let back = fx.controller.switch_camera(LensId::BACK_WIDE).await.unwrap();
    assert_eq!(back.lens, Some(LensId::BACK_WIDE));
    assert_eq!(back.texture_id, Some(1));
    assert!(fx.hooks.unregistered().is_empty());
}

#[tokio::test]
async fn test_switch_to_same_lens_is_a_no_op() {
    let fx = phone_fixture();
    let before = fx
        .controller
        .initialize(LensId::BACK_WIDE, QualityPreset::High, true, false)
        .await
        .unwrap();
    let after = fx.controller.switch_camera(LensId::BACK_WIDE).await.unwrap();
    assert_eq!(after.lens, before.lens);
    assert_eq!(after.texture_id, before.texture_id);
}

#[tokio::test]
async fn test_switch_to_unlisted_lens_resolves_through_fallback() {
    let fx = fixture_with(SimBackend::new(vec![
        SimLens::new(LensDescriptor::physical(LensId::BACK_WIDE)),
        SimLens::new(LensDescriptor::physical(LensId::FRONT_WIDE)),
    ]));
    fx.controller
        .initialize(LensId::FRONT_WIDE, QualityPreset::High, true, false)
        .await
        .unwrap();

    let state = fx.controller.switch_camera(BACK_TELEPHOTO).await.unwrap();
    assert_eq!(state.lens, Some(LensId::BACK_WIDE));
}

#[tokio::test]
async fn test_failed_switch_restores_the_previous_lens() {
    let fx = phone_fixture();
    fx.controller
        .initialize(LensId::BACK_WIDE, QualityPreset::High, true, false)
        .await
        .unwrap();

    fx.hw.set_open_failure(LensId::FRONT_WIDE, true);
    let err = fx
        .controller
        .switch_camera(LensId::FRONT_WIDE)
        .await
        .unwrap_err();
    assert!(matches!(err, CameraError::InputRejected { .. }));

    let state = fx.controller.state().await;
    assert!(state.initialized);
    assert_eq!(state.lens, Some(LensId::BACK_WIDE));
    assert_eq!(state.texture_id, Some(1));

    // The restored stream keeps the preview alive.
    sleep_ms(80).await;
    assert!(fx.controller.latest_frame().is_some());
}

#[tokio::test]
async fn test_switch_without_frames_restores_the_previous_lens() {
    let fx = phone_fixture();
    fx.controller
        .initialize(LensId::BACK_WIDE, QualityPreset::High, true, false)
        .await
        .unwrap();

    // The front device opens fine but its stream never delivers a frame,
    // so the switch cannot be confirmed.
    fx.hw.set_stream_stall(LensId::FRONT_WIDE, true);
    let err = fx
        .controller
        .switch_camera(LensId::FRONT_WIDE)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CameraError::InputRejected { lens, .. } if lens == LensId::FRONT_WIDE
    ));

    let state = fx.controller.state().await;
    assert!(state.initialized);
    assert_eq!(state.lens, Some(LensId::BACK_WIDE));

    let before = fx.hooks.notifications();
    sleep_ms(80).await;
    assert!(fx.hooks.notifications() > before);
    let frame = fx.controller.latest_frame().unwrap();
    assert_eq!((frame.width, frame.height), (128, 96));
}

#[tokio::test]
async fn test_switch_with_failed_restore_releases_the_controller() {
    let fx = phone_fixture();
    fx.controller
        .initialize(LensId::BACK_WIDE, QualityPreset::High, true, false)
        .await
        .unwrap();

    fx.hw.set_open_failure(LensId::FRONT_WIDE, true);
    fx.hw.set_open_failure(LensId::BACK_WIDE, true);
    let err = fx
        .controller
        .switch_camera(LensId::FRONT_WIDE)
        .await
        .unwrap_err();
    assert!(matches!(err, CameraError::InputRejected { .. }));

    let state = fx.controller.state().await;
    assert!(!state.initialized);
    assert_eq!(fx.hooks.unregistered(), vec![1]);

    // A released controller can come back once the hardware does.
    fx.hw.set_open_failure(LensId::BACK_WIDE, false);
    fx.controller
        .initialize(LensId::BACK_WIDE, QualityPreset::High, true, false)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_switch_quiesces_the_torch() {
    let fx = phone_fixture();
    fx.controller
        .initialize(LensId::BACK_WIDE, QualityPreset::High, true, false)
        .await
        .unwrap();

    assert!(fx.controller.set_flash_mode(FlashMode::Torch).await);
    assert!(fx.hw.torch_on(LensId::BACK_WIDE));

    let state = fx.controller.switch_camera(LensId::FRONT_WIDE).await.unwrap();
    assert!(!fx.hw.torch_on(LensId::BACK_WIDE));
    assert_eq!(state.flash_mode, FlashMode::Off);
}

#[tokio::test]
async fn test_macro_lens_drives_the_ultra_wide_hardware() {
    let fx = phone_fixture();
    let state = fx
        .controller
        .initialize(LensId::BACK_MACRO, QualityPreset::High, true, false)
        .await
        .unwrap();
    assert_eq!(state.lens, Some(LensId::BACK_MACRO));
    // The backing ultra-wide bounds the zoom.
    assert_eq!(state.zoom_range.max, 2.0);

    assert_eq!(fx.controller.set_zoom(1.5).await, 1.5);
    assert_eq!(fx.hw.zoom(LensId::BACK_ULTRA_WIDE), 1.5);
    assert_eq!(fx.controller.set_zoom(5.0).await, 2.0);
}

#[tokio::test]
async fn test_tap_to_focus_transforms_and_reverts() {
    let fx = phone_fixture();
    fx.controller
        .initialize(LensId::BACK_WIDE, QualityPreset::High, true, false)
        .await
        .unwrap();

    assert!(fx.controller.set_focus_point(0.25, 0.4).await);
    let state = fx.hw.device_state(LensId::BACK_WIDE);
    // Display (x, y) lands on sensor (y, 1 - x).
    assert_eq!(state.focus_point, Some(SensorPoint { x: 0.4, y: 0.75 }));
    assert!(!state.continuous_auto);

    // The fixture's 200ms hold expires and auto metering returns.
    sleep_ms(400).await;
    let state = fx.hw.device_state(LensId::BACK_WIDE);
    assert!(state.continuous_auto);
    assert_eq!(state.focus_point, None);
}

#[tokio::test]
async fn test_retap_extends_the_metering_hold() {
    let fx = phone_fixture();
    fx.controller
        .initialize(LensId::BACK_WIDE, QualityPreset::High, true, false)
        .await
        .unwrap();

    assert!(fx.controller.set_focus_point(0.5, 0.5).await);
    sleep_ms(120).await;
    assert!(fx.controller.set_focus_point(0.6, 0.6).await);

    // Past the first tap's 200ms expiry, inside the second tap's hold.
    sleep_ms(110).await;
    assert!(!fx.hw.continuous_auto(LensId::BACK_WIDE));

    sleep_ms(300).await;
    assert!(fx.hw.continuous_auto(LensId::BACK_WIDE));
}

#[tokio::test]
async fn test_cancel_metering_reverts_immediately() {
    let fx = phone_fixture();
    fx.controller
        .initialize(LensId::BACK_WIDE, QualityPreset::High, true, false)
        .await
        .unwrap();

    assert!(fx.controller.set_exposure_point(0.5, 0.5).await);
    assert!(!fx.hw.continuous_auto(LensId::BACK_WIDE));

    fx.controller.cancel_metering().await;
    assert!(fx.hw.continuous_auto(LensId::BACK_WIDE));
}

#[tokio::test]
async fn test_front_lens_meters_exposure_only() {
    let fx = phone_fixture();
    fx.controller
        .initialize(LensId::FRONT_WIDE, QualityPreset::High, true, false)
        .await
        .unwrap();

    assert!(!fx.controller.set_focus_point(0.5, 0.5).await);
    assert!(fx.controller.set_exposure_point(0.5, 0.5).await);

    let state = fx.hw.device_state(LensId::FRONT_WIDE);
    assert_eq!(state.focus_point, None);
    assert_eq!(state.exposure_point, Some(SensorPoint { x: 0.5, y: 0.5 }));
}

#[tokio::test]
async fn test_zoom_clamps_to_the_device_range() {
    let fx = phone_fixture();
    assert_eq!(fx.controller.set_zoom(3.0).await, 1.0); // not initialized

    fx.controller
        .initialize(LensId::BACK_WIDE, QualityPreset::High, true, false)
        .await
        .unwrap();

    assert_eq!(fx.controller.set_zoom(3.5).await, 3.5);
    assert_eq!(fx.controller.set_zoom(50.0).await, 6.0);
    assert_eq!(fx.hw.zoom(LensId::BACK_WIDE), 6.0);
    assert_eq!(fx.controller.set_zoom(0.2).await, 1.0);
    assert_eq!(fx.controller.set_zoom(f32::NAN).await, 1.0);
    assert_eq!(fx.controller.state().await.zoom, 1.0);
}

#[tokio::test]
async fn test_torch_modes_drive_the_hardware() {
    let fx = phone_fixture();
    fx.controller
        .initialize(LensId::BACK_WIDE, QualityPreset::High, true, false)
        .await
        .unwrap();

    assert!(fx.controller.set_flash_mode(FlashMode::Torch).await);
    assert!(fx.hw.torch_on(LensId::BACK_WIDE));
    assert_eq!(fx.controller.state().await.flash_mode, FlashMode::Torch);

    assert!(fx.controller.set_flash_mode(FlashMode::Off).await);
    assert!(!fx.hw.torch_on(LensId::BACK_WIDE));

    // Auto arms the darkness check without lighting anything yet.
    assert!(fx.controller.set_flash_mode(FlashMode::Auto).await);
    assert!(!fx.hw.torch_on(LensId::BACK_WIDE));
    assert_eq!(fx.controller.state().await.flash_mode, FlashMode::Auto);
}

#[tokio::test]
async fn test_screen_flash_saves_and_restores_brightness() {
    let fx = phone_fixture();
    fx.controller
        .initialize(LensId::FRONT_WIDE, QualityPreset::High, true, false)
        .await
        .unwrap();

    assert!(fx.controller.set_flash_mode(FlashMode::Torch).await);
    assert_eq!(fx.brightness.current(), 1.0);

    assert!(fx.controller.set_flash_mode(FlashMode::Off).await);
    assert_eq!(fx.brightness.current(), 0.5);
    assert_eq!(fx.brightness.history(), vec![1.0, 0.5]);
}

#[tokio::test]
async fn test_screen_flash_disabled_without_permission() {
    let fx = phone_fixture();
    let state = fx
        .controller
        .initialize(LensId::FRONT_WIDE, QualityPreset::High, false, false)
        .await
        .unwrap();
    assert!(!state.has_flash);

    assert!(!fx.controller.set_flash_mode(FlashMode::Torch).await);
    assert!(!fx.controller.set_flash_mode(FlashMode::Auto).await);
    assert_eq!(fx.brightness.current(), 0.5);
    assert_eq!(fx.controller.state().await.flash_mode, FlashMode::Off);
}

#[tokio::test]
async fn test_pause_freezes_the_preview() {
    let fx = phone_fixture();
    fx.controller
        .initialize(LensId::BACK_WIDE, QualityPreset::High, true, false)
        .await
        .unwrap();
    sleep_ms(50).await;

    fx.controller.pause_preview();
    sleep_ms(50).await;
    let held = fx.controller.latest_frame().unwrap();
    let notified = fx.hooks.notifications();
    assert!(fx.controller.state().await.preview_paused);

    sleep_ms(100).await;
    assert_eq!(fx.controller.latest_frame().unwrap().pts, held.pts);
    assert_eq!(fx.hooks.notifications(), notified);

    fx.controller.resume_preview();
    sleep_ms(80).await;
    assert!(fx.controller.latest_frame().unwrap().pts > held.pts);
    assert!(fx.hooks.notifications() > notified);
}

#[tokio::test]
async fn test_dispose_is_idempotent_and_reinitializable() {
    let fx = phone_fixture();
    fx.controller
        .initialize(LensId::BACK_WIDE, QualityPreset::High, true, false)
        .await
        .unwrap();
    sleep_ms(50).await;

    fx.controller.dispose().await;
    sleep_ms(50).await;
    assert_eq!(fx.hooks.unregistered(), vec![1]);
    assert!(fx.controller.latest_frame().is_none());
    assert!(!fx.controller.state().await.initialized);

    fx.controller.dispose().await;
    assert_eq!(fx.hooks.unregistered(), vec![1]);

    let state = fx
        .controller
        .initialize(LensId::BACK_WIDE, QualityPreset::High, true, false)
        .await
        .unwrap();
    assert_eq!(state.texture_id, Some(2));
}

#[tokio::test]
async fn test_max_duration_stops_the_recording() {
    let fx = phone_fixture();
    let dir = tempfile::tempdir().unwrap();
    fx.controller
        .initialize(LensId::BACK_WIDE, QualityPreset::High, true, false)
        .await
        .unwrap();

    let mut events = fx.controller.subscribe();
    fx.controller
        .start_recording(RecordingOptions {
            max_duration: Some(Duration::from_millis(150)),
            output_directory: Some(dir.path().to_path_buf()),
            ..RecordingOptions::default()
        })
        .await
        .unwrap();
    assert!(fx.controller.state().await.is_recording);

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("deadline event")
        .unwrap();
    let ControllerEvent::RecordingAutoStopped(result) = event else {
        panic!("unexpected event {event:?}");
    };
    assert!(std::path::Path::new(&result.path).exists());
    assert!(result.duration_ms >= 100 && result.duration_ms < 1500);
    assert!(!fx.controller.state().await.is_recording);

    // The deadline fires once; a manual stop afterwards finds nothing.
    assert!(
        tokio::time::timeout(Duration::from_millis(300), events.recv())
            .await
            .is_err()
    );
    assert!(matches!(
        fx.controller.stop_recording().await.unwrap_err(),
        CameraError::NotRecording
    ));
}

#[tokio::test]
async fn test_auto_flash_lights_dark_back_scenes() {
    let fx = phone_fixture();
    let dir = tempfile::tempdir().unwrap();
    fx.controller
        .initialize(LensId::BACK_WIDE, QualityPreset::High, true, false)
        .await
        .unwrap();
    assert!(fx.controller.set_flash_mode(FlashMode::Auto).await);

    let options = RecordingOptions {
        output_directory: Some(dir.path().to_path_buf()),
        ..RecordingOptions::default()
    };

    fx.hw
        .set_telemetry(LensPosition::Back, 800.0, Duration::from_millis(60));
    fx.controller.start_recording(options.clone()).await.unwrap();
    assert!(fx.hw.torch_on(LensId::BACK_WIDE));
    fx.controller.stop_recording().await.unwrap();
    assert!(!fx.hw.torch_on(LensId::BACK_WIDE));

    // A bright scene never trips the check.
    fx.hw
        .set_telemetry(LensPosition::Back, 100.0, Duration::from_millis(5));
    fx.controller.start_recording(options).await.unwrap();
    assert!(!fx.hw.torch_on(LensId::BACK_WIDE));
    fx.controller.stop_recording().await.unwrap();
}

#[tokio::test]
async fn test_auto_flash_uses_the_screen_on_front_lenses() {
    let fx = phone_fixture();
    let dir = tempfile::tempdir().unwrap();
    fx.controller
        .initialize(LensId::FRONT_WIDE, QualityPreset::High, true, false)
        .await
        .unwrap();
    assert!(fx.controller.set_flash_mode(FlashMode::Auto).await);

    // Dark for the front thresholds, bright for the back ones.
    fx.hw
        .set_telemetry(LensPosition::Front, 400.0, Duration::from_millis(10));
    fx.controller
        .start_recording(RecordingOptions {
            output_directory: Some(dir.path().to_path_buf()),
            ..RecordingOptions::default()
        })
        .await
        .unwrap();
    assert_eq!(fx.brightness.current(), 1.0);

    fx.controller.stop_recording().await.unwrap();
    assert_eq!(fx.brightness.current(), 0.5);
}
