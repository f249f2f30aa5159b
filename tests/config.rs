use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use dengue_tracker::config::{
    ApiSection, Config, ConfigLoader, DEFAULT_BASE_URL, RetrySection, default_archives,
};
use dengue_tracker::error::TrackerError;

#[test]
fn partial_file_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dengue-tracker.json");
    fs::write(
        &path,
        r#"{
  "schema_version": 1,
  "retry": { "retry_delay_secs": 2 },
  "data_dir": "/srv/dengue"
}"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.api.base_url, DEFAULT_BASE_URL);
    assert_eq!(resolved.api.disease, "dengue");
    assert_eq!(resolved.api.format, "csv");
    assert_eq!(resolved.api.timeout, Duration::from_secs(60));
    assert_eq!(resolved.retry.max_attempts, 5);
    assert_eq!(resolved.retry.retry_delay, Duration::from_secs(2));
    assert_eq!(resolved.data_dir, Utf8PathBuf::from("/srv/dengue"));
    assert_eq!(resolved.archives, default_archives());
}

#[test]
fn api_overrides_flow_into_requests() {
    let resolved = ConfigLoader::resolve_config(Config {
        api: Some(ApiSection {
            base_url: Some("http://localhost:8080/api/alertcity".to_string()),
            disease: Some("chikungunya".to_string()),
            ..ApiSection::default()
        }),
        ..Config::default()
    })
    .unwrap();

    let request = resolved.api.request(&"3106200".parse().unwrap(), 2024, 10);
    assert_eq!(
        request.url(),
        "http://localhost:8080/api/alertcity?geocode=3106200&disease=chikungunya&format=csv&ew_start=10&ew_end=10&ey_start=2024&ey_end=2024"
    );
}

#[test]
fn zero_attempts_is_invalid() {
    let result = ConfigLoader::resolve_config(Config {
        retry: Some(RetrySection {
            max_attempts: Some(0),
            retry_delay_secs: None,
        }),
        ..Config::default()
    });
    assert_matches!(result, Err(TrackerError::InvalidConfig(_)));
}

#[test]
fn blank_base_url_is_invalid() {
    let result = ConfigLoader::resolve_config(Config {
        api: Some(ApiSection {
            base_url: Some("  ".to_string()),
            ..ApiSection::default()
        }),
        ..Config::default()
    });
    assert_matches!(result, Err(TrackerError::InvalidConfig(_)));
}

#[test]
fn explicit_missing_path_is_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(TrackerError::ConfigRead(_))
    );
}

#[test]
fn malformed_json_is_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dengue-tracker.json");
    fs::write(&path, "{ \"retry\": ").unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(TrackerError::ConfigParse(_))
    );
}
