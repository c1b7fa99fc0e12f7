use crate::device::CaptureMode;
use tracing::debug;

const VIDEO_PREFERENCES: [&str; 5] = [
    "video/webm;codecs=vp9,opus",
    "video/webm;codecs=vp8,opus",
    "video/webm;codecs=h264,opus",
    "video/webm",
    "video/mp4",
];

const AUDIO_PREFERENCES: [&str; 4] = [
    "audio/webm;codecs=opus",
    "audio/webm",
    "audio/ogg;codecs=opus",
    "audio/mp4",
];

/// Ordered codec preferences for a mode, best first
pub fn preferred_mime_types(mode: CaptureMode) -> &'static [&'static str] {
    match mode {
        CaptureMode::Video => &VIDEO_PREFERENCES,
        CaptureMode::Audio => &AUDIO_PREFERENCES,
    }
}

fn generic_container(mode: CaptureMode) -> &'static str {
    match mode {
        CaptureMode::Video => "video/webm",
        CaptureMode::Audio => "audio/webm",
    }
}

/// First supported preference, or the generic container when none match
pub fn select_mime_type<F>(mode: CaptureMode, is_supported: F) -> String
where
    F: Fn(&str) -> bool,
{
    let selected = preferred_mime_types(mode)
        .iter()
        .copied()
        .find(|mime| is_supported(mime))
        .unwrap_or_else(|| generic_container(mode));
    debug!("Selected {} for {} recording", selected, mode);
    selected.to_string()
}
