mod controller;
mod media;
pub mod mock;
#[cfg(test)]
mod tests;

pub use controller::{DeviceCaptureController, PermissionState};
pub use media::{
    CaptureMode, DeviceInfo, MediaDevices, MediaRequest, MediaStream, MediaTrack, TrackKind,
};
pub use mock::ScriptedMediaDevices;
