//! Integration tests for logging system

use bridge_traits::time::LogLevel;
use core_runtime::logging::{
    init_logging, redact_if_sensitive, strip_url_query, LogFormat, LoggingConfig,
};

#[test]
fn test_credentials_are_redacted() {
    assert_eq!(redact_if_sensitive("access_token", "abc"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("Cookie", "cf_clearance=xyz"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("authorization", "Bearer x"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("password", "hunter2"), "[REDACTED]");
}

#[test]
fn test_ordinary_fields_pass_through() {
    assert_eq!(redact_if_sensitive("chapter_id", "c-42"), "c-42");
    assert_eq!(redact_if_sensitive("extension_id", "mangadex"), "mangadex");
}

#[test]
fn test_signed_urls_lose_their_query() {
    assert_eq!(
        strip_url_query("https://uploads.example/data/abc/1.png?sig=deadbeef&exp=1"),
        "https://uploads.example/data/abc/1.png"
    );
}

#[test]
fn test_init_logging_twice_fails() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Warn);

    // Only test in this binary that touches the global subscriber
    let first = init_logging(config.clone());
    let second = init_logging(config);

    assert!(first.is_ok());
    assert!(second.is_err());
}
