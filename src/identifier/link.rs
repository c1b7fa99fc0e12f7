use crate::error::FormatError;

const QUERY_KEYS: [&str; 2] = ["session", "id"];

/// Pull the raw session identifier out of a recording link.
///
/// Accepts `?session=`/`?id=` query parameters, a trailing path segment, or a
/// bare identifier. The result is not validated.
pub fn extract_from_link(link: &str) -> Result<String, FormatError> {
    let link = link.trim();
    let (before_fragment, _) = link.split_once('#').unwrap_or((link, ""));
    let (path, query) = before_fragment
        .split_once('?')
        .unwrap_or((before_fragment, ""));

    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            if QUERY_KEYS.contains(&key) && !value.is_empty() {
                return Ok(value.to_string());
            }
        }
    }

    let without_scheme = path.split_once("://").map(|(_, rest)| rest).unwrap_or(path);
    let segments: Vec<&str> = without_scheme.split('/').filter(|s| !s.is_empty()).collect();

    // First segment is the host when a scheme was present
    let skip = usize::from(path.contains("://"));
    segments
        .into_iter()
        .skip(skip)
        .last()
        .map(str::to_string)
        .ok_or(FormatError::MissingIdentifier)
}
