//! Loading detection configuration files from disk.

use std::io::Write;

use rate_limit_detector::config::AuthType;
use rate_limit_detector::error_handling::ConfigError;
use rate_limit_detector::DetectorConfig;

fn write_temp(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(contents.as_bytes())
        .expect("Failed to write temp file");
    file
}

#[test]
fn test_load_resolves_environment_references() {
    std::env::set_var("RLD_IT_API_HOST", "billing.example.com");
    std::env::set_var("RLD_IT_TENANT", "acme");
    let file = write_temp(
        r#"{
            "target_sites": {
                "billing": {
                    "base_url": "https://${RLD_IT_API_HOST}/v2",
                    "endpoints": ["/invoices"],
                    "headers": {"X-Tenant": "${RLD_IT_TENANT}"},
                    "auth": {"type": "bearer_token", "token_env": "BILLING_TOKEN"}
                }
            },
            "tiers": [
                {"name": "day", "window_seconds": 86400, "start_rate": 1000, "max_rate": 100000, "increment": 1000},
                {"name": "second", "window_seconds": 1, "start_rate": 1, "max_rate": 50, "increment": 1}
            ],
            "detection": {"stop_on_first_limit": true, "max_concurrent_requests": 4},
            "advisor": {"enabled": false}
        }"#,
    );

    let config = DetectorConfig::load(file.path()).expect("config should load");

    let site = &config.target_sites["billing"];
    assert_eq!(site.base_url, "https://billing.example.com/v2");
    assert_eq!(site.headers["X-Tenant"], "acme");
    assert_eq!(site.auth.kind, AuthType::BearerToken);
    assert_eq!(site.auth.token_env.as_deref(), Some("BILLING_TOKEN"));

    let names: Vec<&str> = config.tiers.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["second", "day"], "tiers are sorted by window");
    assert!(config.detection.stop_on_first_limit);
    assert_eq!(config.detection.max_concurrent_requests, 4);
    assert!(!config.advisor.enabled);
    assert!(config.storage.save_results, "storage keeps its defaults");
}

#[test]
fn test_missing_file_names_the_path() {
    let err = DetectorConfig::load(std::path::Path::new("/nonexistent/rate_limits.json"))
        .expect_err("missing file should fail");
    assert!(matches!(err, ConfigError::Io { .. }));
    assert!(
        err.to_string().contains("/nonexistent/rate_limits.json"),
        "error should name the file: {}",
        err
    );
}

#[test]
fn test_invalid_document_is_rejected() {
    let file = write_temp(r#"{"target_sites": {}, "tiers": []}"#);
    let err = DetectorConfig::load(file.path()).expect_err("empty config should fail");
    assert!(matches!(err, ConfigError::Invalid(_)), "got {:?}", err);

    let file = write_temp("{ not json");
    let err = DetectorConfig::load(file.path()).expect_err("malformed JSON should fail");
    assert!(matches!(err, ConfigError::Parse(_)), "got {:?}", err);
}
