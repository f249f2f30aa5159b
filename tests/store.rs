use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use chrono::NaiveDate;

use dengue_tracker::domain::CaseRecord;
use dengue_tracker::error::TrackerError;
use dengue_tracker::store::{Store, merge_records, read_cases, write_cases_atomic};

fn record(geocode: &str, week: (i32, u32, u32), casos: u32, nivel: u8) -> CaseRecord {
    CaseRecord {
        geocode: geocode.parse().unwrap(),
        epidemiological_week: NaiveDate::from_ymd_opt(week.0, week.1, week.2).unwrap(),
        casos,
        nivel,
        year: week.0,
    }
}

fn temp_store(dir: &tempfile::TempDir) -> Store {
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    Store::new_with_paths(root.join("data"), root.join("cache"))
}

#[test]
fn first_merge_creates_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);
    assert!(store.load_cases().unwrap().is_none());

    let delta = vec![
        record("3118601", (2024, 3, 10), 87, 2),
        record("3106200", (2024, 3, 10), 1402, 3),
    ];
    let report = store.merge_cases(delta).unwrap();
    assert_eq!(report.added, 2);
    assert_eq!(report.total_rows, 2);

    let stored = store.load_cases().unwrap().unwrap();
    assert_eq!(stored[0].geocode.as_str(), "3106200");
    assert_eq!(stored[1].geocode.as_str(), "3118601");

    let header = fs::read_to_string(store.cases_path()).unwrap();
    assert!(header.starts_with("geocode,epidemiological_week,casos,nivel,year\n"));
}

#[test]
fn merging_same_delta_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);
    let delta = vec![
        record("3106200", (2024, 3, 3), 1210, 2),
        record("3106200", (2024, 3, 10), 1402, 3),
    ];

    store.merge_cases(delta.clone()).unwrap();
    let first = fs::read_to_string(store.cases_path()).unwrap();
    let report = store.merge_cases(delta).unwrap();
    let second = fs::read_to_string(store.cases_path()).unwrap();

    assert_eq!(first, second);
    assert_eq!(report.unchanged, 2);
    assert_eq!(report.added, 0);
    assert_eq!(report.total_rows, 2);
}

#[test]
fn newer_row_replaces_stored_row() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);
    store
        .merge_cases(vec![
            record("3106200", (2024, 3, 10), 1402, 3),
            record("3118601", (2024, 3, 10), 87, 2),
        ])
        .unwrap();

    let report = store
        .merge_cases(vec![record("3106200", (2024, 3, 10), 1533, 4)])
        .unwrap();
    assert_eq!(report.replaced, 1);
    assert_eq!(report.total_rows, 2);

    let stored = store.load_cases().unwrap().unwrap();
    let bh: Vec<_> = stored
        .iter()
        .filter(|row| row.geocode.as_str() == "3106200")
        .collect();
    assert_eq!(bh.len(), 1);
    assert_eq!(bh[0].casos, 1533);
    assert_eq!(bh[0].nivel, 4);
}

#[test]
fn empty_delta_keeps_existing_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);
    store
        .merge_cases(vec![record("3106200", (2024, 3, 10), 1402, 3)])
        .unwrap();
    let before = fs::read_to_string(store.cases_path()).unwrap();

    let report = store.merge_cases(Vec::new()).unwrap();
    assert_eq!(report.total_rows, 1);
    assert_eq!(fs::read_to_string(store.cases_path()).unwrap(), before);
}

#[test]
fn empty_delta_without_dataset_writes_header() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);
    store.merge_cases(Vec::new()).unwrap();
    assert_eq!(store.load_cases().unwrap(), Some(Vec::new()));
}

#[test]
fn merge_orders_by_key() {
    let merged = merge_records(
        Some(vec![record("3118601", (2023, 1, 1), 5, 1)]),
        vec![
            record("3106200", (2024, 1, 7), 9, 1),
            record("3106200", (2023, 1, 1), 7, 1),
        ],
    );
    let keys: Vec<(String, i32)> = merged
        .iter()
        .map(|row| (row.geocode.to_string(), row.year))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("3106200".to_string(), 2023),
            ("3106200".to_string(), 2024),
            ("3118601".to_string(), 2023),
        ]
    );
}

#[test]
fn corrupt_dataset_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);
    store.ensure_data_root().unwrap();
    fs::write(
        store.cases_path(),
        "geocode,epidemiological_week,casos,nivel,year\n3106200,not-a-date,1,1,2024\n",
    )
    .unwrap();

    assert_matches!(
        read_cases(&store.cases_path()),
        Err(TrackerError::DatasetParse { .. })
    );
    assert_matches!(
        store.merge_cases(vec![record("3106200", (2024, 3, 10), 1402, 3)]),
        Err(TrackerError::DatasetParse { .. })
    );
}

#[test]
fn unwritable_parent_is_persistence_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);
    store.ensure_data_root().unwrap();

    let blocked = store.data_root().join("blocked");
    fs::write(&blocked, "not a directory").unwrap();
    let err = write_cases_atomic(
        &blocked.join("dengue_download_data.csv"),
        &[record("3106200", (2024, 3, 10), 9999, 4)],
    )
    .unwrap_err();

    assert_matches!(err, TrackerError::Persistence(_));
    assert_eq!(fs::read_to_string(&blocked).unwrap(), "not a directory");
}

#[test]
fn rename_over_live_path_failure_keeps_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);
    fs::create_dir_all(store.cases_path().join("occupied")).unwrap();

    let err = write_cases_atomic(
        &store.cases_path(),
        &[record("3106200", (2024, 3, 10), 1402, 3)],
    )
    .unwrap_err();

    assert_matches!(err, TrackerError::Persistence(_));
    assert!(store.cases_path().join("occupied").as_std_path().is_dir());
    let leftovers: Vec<_> = fs::read_dir(store.data_root().as_std_path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(".dengue-cases"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}
