use super::*;
use crate::diagnostics::{DiagnosticsRing, Severity};
use crate::error::PermissionError;
use std::sync::Arc;
use std::time::Duration;

fn controller_with(
    devices: Arc<ScriptedMediaDevices>,
) -> (DeviceCaptureController, Arc<DiagnosticsRing>) {
    let diagnostics = Arc::new(DiagnosticsRing::in_memory(50));
    let controller = DeviceCaptureController::new(devices, diagnostics.clone());
    (controller, diagnostics)
}

#[tokio::test]
async fn test_grant_exposes_live_stream() {
    let devices = Arc::new(ScriptedMediaDevices::new());
    let (controller, _) = controller_with(devices.clone());

    assert_eq!(controller.permission_state(), PermissionState::Idle);
    let state = controller.request_permission(CaptureMode::Video).await.unwrap();

    assert_eq!(state, PermissionState::Granted);
    assert!(controller.has_live_stream());
    assert_eq!(controller.mode(), Some(CaptureMode::Video));
    assert_eq!(controller.active_device_id().as_deref(), Some("default-cam"));
    assert_eq!(devices.prompt_count(), 1);
}

#[tokio::test]
async fn test_repeat_request_does_not_reprompt() {
    let devices = Arc::new(ScriptedMediaDevices::new());
    let (controller, _) = controller_with(devices.clone());

    controller.request_permission(CaptureMode::Audio).await.unwrap();
    controller.request_permission(CaptureMode::Audio).await.unwrap();

    assert_eq!(devices.prompt_count(), 1);
}

#[tokio::test]
async fn test_concurrent_requests_prompt_once() {
    let devices = Arc::new(ScriptedMediaDevices::new().with_prompt_delay(Duration::from_millis(50)));
    let (controller, _) = controller_with(devices.clone());

    let (first, second) = tokio::join!(
        controller.request_permission(CaptureMode::Audio),
        controller.request_permission(CaptureMode::Audio)
    );

    let mut states = vec![first.unwrap(), second.unwrap()];
    states.sort_by_key(|s| s.to_string());
    assert_eq!(states, vec![PermissionState::Granted, PermissionState::Requesting]);
    assert_eq!(devices.prompt_count(), 1);
    assert_eq!(controller.permission_state(), PermissionState::Granted);
}

#[tokio::test]
async fn test_denial_and_retry() {
    let devices = Arc::new(ScriptedMediaDevices::new());
    devices.set_deny_permission(true);
    let (controller, diagnostics) = controller_with(devices.clone());

    let err = controller
        .request_permission(CaptureMode::Video)
        .await
        .unwrap_err();
    assert!(matches!(err, PermissionError::Denied { .. }));
    assert!(err.is_recoverable());
    assert_eq!(controller.permission_state(), PermissionState::Denied);
    assert!(!controller.has_live_stream());
    assert_eq!(diagnostics.count(Severity::Warning), 1);

    // Still denied until the user retries
    let state = controller.request_permission(CaptureMode::Video).await.unwrap();
    assert_eq!(state, PermissionState::Denied);
    assert_eq!(devices.prompt_count(), 1);

    devices.set_deny_permission(false);
    assert_eq!(controller.retry(), PermissionState::Idle);
    let state = controller.request_permission(CaptureMode::Video).await.unwrap();
    assert_eq!(state, PermissionState::Granted);
    assert_eq!(devices.prompt_count(), 2);
}

#[tokio::test]
async fn test_switch_device_acquires_before_release() {
    let devices = Arc::new(
        ScriptedMediaDevices::new().with_device("usb-mic", "USB Microphone", TrackKind::Audio),
    );
    let (controller, _) = controller_with(devices.clone());
    controller.request_permission(CaptureMode::Audio).await.unwrap();
    let old = controller.current_stream().unwrap();

    controller.switch_device("usb-mic").await.unwrap();

    assert!(!old.is_active());
    assert!(controller.has_live_stream());
    assert_eq!(controller.active_device_id().as_deref(), Some("usb-mic"));
    assert_eq!(controller.permission_state(), PermissionState::Granted);
}

#[tokio::test]
async fn test_failed_switch_keeps_old_stream() {
    let devices = Arc::new(
        ScriptedMediaDevices::new().with_device("broken-mic", "Broken", TrackKind::Audio),
    );
    devices.fail_device("broken-mic");
    let (controller, _) = controller_with(devices.clone());
    controller.request_permission(CaptureMode::Audio).await.unwrap();
    let old = controller.current_stream().unwrap();

    let err = controller.switch_device("broken-mic").await.unwrap_err();

    assert!(matches!(err, PermissionError::DeviceUnavailable { .. }));
    assert!(old.is_active());
    assert_eq!(controller.current_stream().unwrap().id, old.id);
    assert_eq!(controller.permission_state(), PermissionState::Granted);
    assert_eq!(controller.last_error(), Some(err));
}

#[tokio::test]
async fn test_switch_without_stream_fails() {
    let (controller, _) = controller_with(Arc::new(ScriptedMediaDevices::new()));
    let err = controller.switch_device("default-mic").await.unwrap_err();
    assert_eq!(err, PermissionError::NoActiveStream);
}

#[tokio::test]
async fn test_switch_refused_while_request_in_flight() {
    let devices = Arc::new(ScriptedMediaDevices::new().with_prompt_delay(Duration::from_millis(50)));
    let (controller, _) = controller_with(devices);

    let (request, switch) = tokio::join!(controller.request_permission(CaptureMode::Audio), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.switch_device("default-mic").await
    });

    assert_eq!(request.unwrap(), PermissionState::Granted);
    assert!(matches!(switch, Err(PermissionError::Busy { .. })));
}

#[tokio::test]
async fn test_request_refused_while_switch_in_flight() {
    let devices = Arc::new(
        ScriptedMediaDevices::new()
            .with_device("usb-cam", "USB Camera", TrackKind::Video)
            .with_prompt_delay(Duration::from_millis(50)),
    );
    let (controller, _) = controller_with(devices.clone());
    controller.request_permission(CaptureMode::Video).await.unwrap();

    let (switch, request) = tokio::join!(controller.switch_device("usb-cam"), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.request_permission(CaptureMode::Audio).await
    });

    assert!(switch.is_ok());
    assert_eq!(
        request,
        Err(PermissionError::Busy {
            operation: "device switch".to_string()
        })
    );
    assert_eq!(devices.prompt_count(), 2);
    assert_eq!(controller.mode(), Some(CaptureMode::Video));
}

#[tokio::test]
async fn test_release_during_request_drops_late_stream() {
    let devices = Arc::new(ScriptedMediaDevices::new().with_prompt_delay(Duration::from_millis(50)));
    let (controller, _) = controller_with(devices.clone());

    let (request, _) = tokio::join!(controller.request_permission(CaptureMode::Audio), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.release();
    });

    assert_eq!(request.unwrap(), PermissionState::Idle);
    assert_eq!(controller.permission_state(), PermissionState::Idle);
    assert!(!controller.has_live_stream());
    assert!(controller.current_stream().is_none());
    assert!(devices.opened_streams().iter().all(|s| !s.is_active()));

    // The next request prompts normally
    let again = controller.request_permission(CaptureMode::Audio).await.unwrap();
    assert_eq!(again, PermissionState::Granted);
    assert!(controller.has_live_stream());
}

#[tokio::test]
async fn test_release_during_switch_drops_new_stream() {
    let devices = Arc::new(ScriptedMediaDevices::new().with_prompt_delay(Duration::from_millis(50)));
    let (controller, _) = controller_with(devices.clone());
    controller.request_permission(CaptureMode::Video).await.unwrap();

    let (switch, _) = tokio::join!(controller.switch_device("default-cam"), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.release();
    });

    assert_eq!(switch, Err(PermissionError::NoActiveStream));
    assert!(controller.current_stream().is_none());
    assert!(devices.opened_streams().iter().all(|s| !s.is_active()));
}

#[tokio::test]
async fn test_release_stops_all_tracks() {
    let devices = Arc::new(ScriptedMediaDevices::new());
    let (controller, _) = controller_with(devices.clone());
    controller.request_permission(CaptureMode::Video).await.unwrap();
    let stream = controller.current_stream().unwrap();
    assert_eq!(stream.tracks.len(), 2);

    controller.release();

    assert!(stream.tracks.iter().all(|t| !t.is_live()));
    assert_eq!(controller.permission_state(), PermissionState::Idle);
    assert!(controller.current_stream().is_none());
}

#[tokio::test]
async fn test_mode_change_releases_previous_stream() {
    let devices = Arc::new(ScriptedMediaDevices::new());
    let (controller, _) = controller_with(devices.clone());
    controller.request_permission(CaptureMode::Audio).await.unwrap();
    let audio = controller.current_stream().unwrap();

    controller.request_permission(CaptureMode::Video).await.unwrap();

    assert!(!audio.is_active());
    assert_eq!(controller.mode(), Some(CaptureMode::Video));
    assert_eq!(devices.prompt_count(), 2);
}

#[tokio::test]
async fn test_enumerate_devices_by_mode() {
    let devices = Arc::new(
        ScriptedMediaDevices::new().with_device("usb-mic", "USB Microphone", TrackKind::Audio),
    );
    let (controller, _) = controller_with(devices);

    let mics = controller.enumerate_devices(CaptureMode::Audio).await.unwrap();
    assert_eq!(mics.len(), 2);
    let cams = controller.enumerate_devices(CaptureMode::Video).await.unwrap();
    assert_eq!(cams.len(), 1);
}
