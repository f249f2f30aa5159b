use dengue_tracker::config::{ApiConfig, DEFAULT_BASE_URL};
use dengue_tracker::domain::Geocode;
use dengue_tracker::request::build_request;

#[test]
fn golden_url() {
    let geocode: Geocode = "3106200".parse().unwrap();
    let request = build_request(DEFAULT_BASE_URL, &geocode, "dengue", "csv", 2024, 10);
    assert_eq!(
        request.url(),
        "https://info.dengue.mat.br/api/alertcity?geocode=3106200&disease=dengue&format=csv&ew_start=10&ew_end=10&ey_start=2024&ey_end=2024"
    );
}

#[test]
fn single_week_window() {
    let geocode: Geocode = "3118601".parse().unwrap();
    let request = ApiConfig::default().request(&geocode, 2023, 53);
    assert_eq!(request.ew_start, request.ew_end);
    assert_eq!(request.ey_start, request.ey_end);
    assert_eq!(request, ApiConfig::default().request(&geocode, 2023, 53));

    let keys: Vec<&str> = request.query_pairs().iter().map(|(key, _)| *key).collect();
    assert_eq!(
        keys,
        vec!["geocode", "disease", "format", "ew_start", "ew_end", "ey_start", "ey_end"]
    );
}
