use super::codec::SessionIdentifier;
use tracing::warn;

/// Pick the owner segment for storage paths.
///
/// The identifier's own `user_id` is deliberately shortened, so the record's
/// full id always wins when present.
fn owner_segment<'a>(identifier: &'a SessionIdentifier, full_user_id: Option<&'a str>) -> &'a str {
    match full_user_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(full) => full,
        None => {
            warn!(
                "No full user id for session {}; falling back to truncated id {}",
                identifier.session_id(),
                identifier.user_id
            );
            identifier.user_id.as_str()
        }
    }
}

/// `users/{fullUserId}/recordings/{sessionId}/final/recording.{ext}`
pub fn derive_storage_path(
    identifier: &SessionIdentifier,
    full_user_id: Option<&str>,
    extension: &str,
) -> String {
    format!(
        "users/{}/recordings/{}/final/recording.{}",
        owner_segment(identifier, full_user_id),
        identifier.session_id(),
        extension.trim_start_matches('.')
    )
}

/// `users/{fullUserId}/recordings/{sessionId}/chunks`
pub fn derive_chunk_prefix(identifier: &SessionIdentifier, full_user_id: Option<&str>) -> String {
    format!(
        "users/{}/recordings/{}/chunks",
        owner_segment(identifier, full_user_id),
        identifier.session_id()
    )
}

/// `users/{fullUserId}/recordings/{sessionId}/chunks/chunk-{n}`
pub fn derive_chunk_path(
    identifier: &SessionIdentifier,
    full_user_id: Option<&str>,
    index: u32,
) -> String {
    format!(
        "{}/chunk-{}",
        derive_chunk_prefix(identifier, full_user_id),
        index
    )
}

/// File extension for a recorded mime type such as `video/webm;codecs=vp9,opus`
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match essence.as_str() {
        "video/webm" | "audio/webm" => "webm",
        "video/mp4" => "mp4",
        "audio/mp4" | "audio/x-m4a" => "m4a",
        "audio/ogg" | "video/ogg" => "ogg",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/mpeg" => "mp3",
        _ => "webm",
    }
}
