use std::fs;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;

use dengue_tracker::domain::CaseRecord;
use dengue_tracker::error::TrackerError;
use dengue_tracker::reference::{
    ReferenceTables, available_years, build_map_dataset, format_case_total, load_city_geocodes,
    to_feature_collection, weeks_for_year,
};
use dengue_tracker::store::Store;

const FIXTURES: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

fn fixture_store(dir: &tempfile::TempDir) -> Store {
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let store = Store::new_with_paths(root.join("data"), root.join("cache"));
    store.ensure_data_root().unwrap();
    let fixtures = Utf8Path::new(FIXTURES);
    fs::copy(
        fixtures.join("city_geocodes.csv"),
        store.city_geocodes_path(),
    )
    .unwrap();
    fs::copy(
        fixtures.join("geodata_city_locations.geojson"),
        store.geometry_path(),
    )
    .unwrap();
    store
}

fn week(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn record(geocode: &str, date: NaiveDate, casos: u32, nivel: u8) -> CaseRecord {
    CaseRecord {
        geocode: geocode.parse().unwrap(),
        epidemiological_week: date,
        casos,
        nivel,
        year: 2024,
    }
}

#[test]
fn belo_horizonte_week() {
    let dir = tempfile::tempdir().unwrap();
    let store = fixture_store(&dir);
    let tables = ReferenceTables::load(&store).unwrap();
    assert_eq!(tables.cities.len(), 3);
    assert_eq!(tables.geometries.len(), 2);

    let cases = vec![record("3106200", week(2024, 3, 10), 1402, 3)];
    let dataset = build_map_dataset(&cases, &tables, 2024, week(2024, 3, 10));

    assert_eq!(dataset.rows.len(), 1);
    let row = &dataset.rows[0];
    assert_eq!(row.city_name, "Belo Horizonte");
    assert_eq!(row.casos, 1402);
    assert_eq!(row.nivel, 3);
    assert!(dataset.missing_geometry.is_empty());
    assert_eq!(dataset.total_cases(), 1402);
    assert_eq!(format_case_total(dataset.total_cases()), "1.4 K");
}

#[test]
fn join_drops_unknown_geocodes_and_other_weeks() {
    let dir = tempfile::tempdir().unwrap();
    let store = fixture_store(&dir);
    let tables = ReferenceTables::load(&store).unwrap();

    let cases = vec![
        record("3170206", week(2024, 3, 10), 410, 2),
        record("9999999", week(2024, 3, 10), 55, 1),
        record("3106200", week(2024, 3, 10), 1402, 3),
        record("3106200", week(2024, 3, 3), 1210, 2),
    ];
    let dataset = build_map_dataset(&cases, &tables, 2024, week(2024, 3, 10));

    let names: Vec<&str> = dataset
        .rows
        .iter()
        .map(|row| row.city_name.as_str())
        .collect();
    assert_eq!(names, vec!["Belo Horizonte", "Uberlândia"]);
    assert_eq!(dataset.total_cases(), 1812);
    assert_eq!(
        dataset
            .missing_geometry
            .iter()
            .map(|geocode| geocode.as_str())
            .collect::<Vec<_>>(),
        vec!["3170206"]
    );
}

#[test]
fn feature_collection_carries_case_properties() {
    let dir = tempfile::tempdir().unwrap();
    let store = fixture_store(&dir);
    let tables = ReferenceTables::load(&store).unwrap();
    let cases = vec![
        record("3106200", week(2024, 3, 10), 1402, 3),
        record("3118601", week(2024, 3, 10), 87, 2),
        record("3170206", week(2024, 3, 10), 410, 2),
    ];
    let dataset = build_map_dataset(&cases, &tables, 2024, week(2024, 3, 10));
    let collection = to_feature_collection(&dataset, &tables.geometries);

    assert_eq!(collection.features.len(), 2);
    let contagem = &collection.features[1];
    assert!(contagem.geometry.is_some());
    assert_eq!(contagem.id, Some(geojson::feature::Id::String("3118601".to_string())));
    assert_eq!(
        contagem.property("city_name").and_then(|value| value.as_str()),
        Some("Contagem")
    );
    assert_eq!(
        contagem.property("casos").and_then(|value| value.as_u64()),
        Some(87)
    );
}

#[test]
fn missing_reference_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let store = Store::new_with_paths(root.join("data"), root.join("cache"));

    assert_matches!(
        load_city_geocodes(&store.city_geocodes_path()),
        Err(TrackerError::MissingReferenceData(_))
    );
    assert_matches!(
        ReferenceTables::load(&store),
        Err(TrackerError::MissingReferenceData(_))
    );
}

#[test]
fn malformed_city_table_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let store = fixture_store(&dir);
    fs::write(
        store.city_geocodes_path(),
        "geocode,city_name\nBH,Belo Horizonte\n",
    )
    .unwrap();

    assert_matches!(
        load_city_geocodes(&store.city_geocodes_path()),
        Err(TrackerError::ReferenceParse { .. })
    );
}

#[test]
fn years_and_weeks_from_dataset() {
    let mut cases = vec![
        record("3106200", week(2024, 3, 10), 1402, 3),
        record("3118601", week(2024, 3, 3), 80, 2),
        record("3106200", week(2024, 3, 3), 1210, 2),
    ];
    cases.push(CaseRecord {
        year: 2023,
        ..record("3106200", week(2023, 12, 31), 300, 1)
    });

    assert_eq!(available_years(&cases), vec![2023, 2024]);
    assert_eq!(
        weeks_for_year(&cases, 2024),
        vec![week(2024, 3, 3), week(2024, 3, 10)]
    );
    assert!(weeks_for_year(&cases, 2019).is_empty());
}
