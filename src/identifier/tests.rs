use super::*;
use crate::error::FormatError;

const EXAMPLE: &str = "ab12xyz-q1w2e3-us3rXXXX-st9rXXXX-1700000000";
const DAY: i64 = 24 * 3600;

#[test]
fn test_parse_example_identifier() {
    let identifier = SessionIdentifier::parse(EXAMPLE).unwrap();

    assert_eq!(identifier.random, "ab12xyz");
    assert_eq!(identifier.prompt_id, "q1w2e3");
    assert_eq!(identifier.user_id, "us3rXXXX");
    assert_eq!(identifier.storyteller_id, "st9rXXXX");
    assert_eq!(identifier.issued_at, 1_700_000_000);
    assert_eq!(identifier.session_id(), EXAMPLE);
    assert!(SessionIdentifier::validate_at(
        EXAMPLE,
        1_700_000_100,
        &ValidityWindow::default()
    ));
}

#[test]
fn test_session_id_keeps_raw_string() {
    let padded = "ab12xyz-q1w2e3-us3rXXXX-st9rXXXX-01700000000";
    let identifier = SessionIdentifier::parse(padded).unwrap();

    assert_eq!(identifier.issued_at, 1_700_000_000);
    assert_eq!(identifier.session_id(), padded);
    assert_eq!(identifier.to_string(), padded);
    assert_ne!(identifier, SessionIdentifier::parse(EXAMPLE).unwrap());
    assert!(derive_storage_path(&identifier, None, "webm").contains(padded));

    let spaced = format!(" {} ", EXAMPLE);
    assert_eq!(SessionIdentifier::parse(&spaced).unwrap().session_id(), spaced);
}

#[test]
fn test_extreme_timestamps_do_not_overflow() {
    let max = format!("a-b-c-d-{}", i64::MAX);
    let identifier = SessionIdentifier::parse(&max).unwrap();
    let window = ValidityWindow::default();

    assert_eq!(identifier.expires_at(&window), None);
    assert_eq!(identifier.issued_at_utc(), None);
    assert!(!identifier.is_within(1_700_000_000, &window));
    assert_eq!(identifier.age_seconds(i64::MIN), i64::MIN);

    let wide = ValidityWindow {
        max_age_seconds: i64::MAX,
        max_future_seconds: i64::MAX,
    };
    assert!(identifier.is_within(1, &wide));
    assert!(identifier.is_within(i64::MAX, &wide));
}

#[test]
fn test_parse_rejects_wrong_part_count() {
    assert_eq!(
        SessionIdentifier::parse("a-b-c-1700000000"),
        Err(FormatError::PartCount { found: 4 })
    );
    assert_eq!(
        SessionIdentifier::parse("a-b-c-d-e-1700000000"),
        Err(FormatError::PartCount { found: 6 })
    );
}

#[test]
fn test_parse_rejects_empty_part() {
    assert_eq!(
        SessionIdentifier::parse("a--c-d-1700000000"),
        Err(FormatError::EmptyPart { index: 1 })
    );
}

#[test]
fn test_parse_rejects_bad_timestamps() {
    for bad in ["0", "-5", "+5", "17e8", "abc", "1.5"] {
        let raw = format!("a-b-c-d-{}", bad);
        assert!(
            SessionIdentifier::parse(&raw).is_err(),
            "timestamp {:?} should be rejected",
            bad
        );
    }
}

#[test]
fn test_validate_window_bounds() {
    let window = ValidityWindow::default();
    let now = 1_700_000_000;
    let id = |issued: i64| format!("r-p-u-s-{}", issued);

    assert!(SessionIdentifier::validate_at(&id(now), now, &window));
    assert!(SessionIdentifier::validate_at(&id(now - 365 * DAY), now, &window));
    assert!(SessionIdentifier::validate_at(&id(now + 3600), now, &window));

    assert!(!SessionIdentifier::validate_at(&id(now - 365 * DAY - 1), now, &window));
    assert!(!SessionIdentifier::validate_at(&id(now + 3601), now, &window));
}

#[test]
fn test_validate_across_window() {
    let window = ValidityWindow::default();
    let now = 1_750_000_000;
    let mut offset = -365 * DAY;
    while offset <= 3600 {
        let raw = format!("rnd-prm-usr-sty-{}", now + offset);
        assert!(SessionIdentifier::validate_at(&raw, now, &window), "offset {}", offset);

        let missing = format!("rnd-prm-usr-{}", now + offset);
        assert!(!SessionIdentifier::validate_at(&missing, now, &window));
        offset += 7 * DAY + 13;
    }
}

#[test]
fn test_validate_never_panics_on_garbage() {
    for raw in ["", "-", "----", "a-b-c-d-", "🙂-🙂-🙂-🙂-1"] {
        let _ = SessionIdentifier::validate(raw);
    }
    assert!(!SessionIdentifier::validate(""));
}

#[test]
fn test_storage_path_prefers_full_user_id() {
    let identifier = SessionIdentifier::parse(EXAMPLE).unwrap();

    let path = derive_storage_path(&identifier, Some("us3rFULL0001abcdef"), "webm");
    assert_eq!(
        path,
        format!(
            "users/us3rFULL0001abcdef/recordings/{}/final/recording.webm",
            EXAMPLE
        )
    );
}

#[test]
fn test_storage_path_never_uses_truncated_id_when_full_available() {
    let identifier = SessionIdentifier::parse(EXAMPLE).unwrap();
    let candidates = ["us3rXXXX", "us3rXXXXfull", "x", "  padded  "];
    let extensions = ["webm", ".mp4", "m4a"];

    for full in candidates {
        for ext in extensions {
            let path = derive_storage_path(&identifier, Some(full), ext);
            let owner = path.split('/').nth(1).unwrap();
            assert_eq!(owner, full.trim());
            assert!(!path.contains(".."));
        }
    }
}

#[test]
fn test_storage_path_falls_back_to_embedded_id() {
    let identifier = SessionIdentifier::parse(EXAMPLE).unwrap();

    for missing in [None, Some(""), Some("   ")] {
        let path = derive_storage_path(&identifier, missing, "webm");
        assert!(path.starts_with("users/us3rXXXX/recordings/"));
    }
}

#[test]
fn test_chunk_paths() {
    let identifier = SessionIdentifier::parse(EXAMPLE).unwrap();
    assert_eq!(
        derive_chunk_path(&identifier, Some("full"), 3),
        format!("users/full/recordings/{}/chunks/chunk-3", EXAMPLE)
    );
}

#[test]
fn test_extension_for_mime() {
    assert_eq!(extension_for_mime("video/webm;codecs=vp9,opus"), "webm");
    assert_eq!(extension_for_mime("audio/webm;codecs=opus"), "webm");
    assert_eq!(extension_for_mime("video/mp4"), "mp4");
    assert_eq!(extension_for_mime("audio/mp4"), "m4a");
    assert_eq!(extension_for_mime("audio/ogg; codecs=opus"), "ogg");
    assert_eq!(extension_for_mime("application/octet-stream"), "webm");
}

#[test]
fn test_extract_from_link() {
    assert_eq!(
        extract_from_link(&format!("https://example.com/record/{}", EXAMPLE)).unwrap(),
        EXAMPLE
    );
    assert_eq!(
        extract_from_link(&format!("https://example.com/record?session={}&x=1", EXAMPLE)).unwrap(),
        EXAMPLE
    );
    assert_eq!(
        extract_from_link(&format!("/record/{}/", EXAMPLE)).unwrap(),
        EXAMPLE
    );
    assert_eq!(extract_from_link(EXAMPLE).unwrap(), EXAMPLE);
    assert_eq!(
        extract_from_link("https://example.com/"),
        Err(FormatError::MissingIdentifier)
    );
}
