//! Reference tables (city names and municipal geometries) and the join that
//! turns the persisted case table into a render-ready map dataset.
//!
//! Both reference files are produced offline from IBGE sources. Their absence
//! is reported as [`TrackerError::MissingReferenceData`] and never defaulted.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;

use camino::Utf8Path;
use chrono::NaiveDate;
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, feature::Id};
use serde::Serialize;
use serde_json::Value;

use crate::domain::{CaseRecord, CityGeocode, Geocode};
use crate::error::TrackerError;
use crate::store::Store;

/// Municipal boundaries keyed by geocode.
#[derive(Debug, Clone, Default)]
pub struct GeometryTable {
    by_geocode: BTreeMap<Geocode, Geometry>,
}

impl GeometryTable {
    pub fn get(&self, geocode: &Geocode) -> Option<&Geometry> {
        self.by_geocode.get(geocode)
    }

    pub fn contains(&self, geocode: &Geocode) -> bool {
        self.by_geocode.contains_key(geocode)
    }

    pub fn len(&self) -> usize {
        self.by_geocode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_geocode.is_empty()
    }

    pub fn insert(&mut self, geocode: Geocode, geometry: Geometry) {
        self.by_geocode.insert(geocode, geometry);
    }
}

#[derive(Debug, Clone)]
pub struct ReferenceTables {
    pub cities: Vec<CityGeocode>,
    pub geometries: GeometryTable,
}

impl ReferenceTables {
    pub fn load(store: &Store) -> Result<Self, TrackerError> {
        let cities = load_city_geocodes(&store.city_geocodes_path())?;
        let geometries = load_city_geometries(&store.geometry_path())?;
        tracing::debug!(
            cities = cities.len(),
            geometries = geometries.len(),
            "reference tables loaded"
        );
        Ok(Self { cities, geometries })
    }
}

pub fn load_city_geocodes(path: &Utf8Path) -> Result<Vec<CityGeocode>, TrackerError> {
    require_file(path)?;
    let parse_error = |message: String| TrackerError::ReferenceParse {
        path: path.as_std_path().to_path_buf(),
        message,
    };
    let mut reader =
        csv::Reader::from_path(path.as_std_path()).map_err(|err| parse_error(err.to_string()))?;
    reader
        .deserialize::<CityGeocode>()
        .map(|row| row.map_err(|err| parse_error(err.to_string())))
        .collect()
}

pub fn load_city_geometries(path: &Utf8Path) -> Result<GeometryTable, TrackerError> {
    require_file(path)?;
    let text = fs::read_to_string(path.as_std_path())
        .map_err(|err| TrackerError::Filesystem(format!("read {path}: {err}")))?;
    parse_city_geometries(&text).map_err(|message| TrackerError::ReferenceParse {
        path: path.as_std_path().to_path_buf(),
        message,
    })
}

/// Reads a FeatureCollection whose features carry a `geocode` property.
pub fn parse_city_geometries(text: &str) -> Result<GeometryTable, String> {
    let geojson: GeoJson = text.parse().map_err(|err| format!("{err}"))?;
    let GeoJson::FeatureCollection(collection) = geojson else {
        return Err("expected a FeatureCollection".to_string());
    };

    let mut table = GeometryTable::default();
    for (index, feature) in collection.features.into_iter().enumerate() {
        let geocode = match feature.property("geocode") {
            Some(Value::String(value)) => value.parse::<Geocode>(),
            Some(Value::Number(value)) => value.to_string().parse::<Geocode>(),
            _ => return Err(format!("feature {index} has no geocode property")),
        }
        .map_err(|err| format!("feature {index}: {err}"))?;

        match feature.geometry {
            Some(geometry) => table.insert(geocode, geometry),
            None => tracing::warn!(%geocode, "feature without geometry ignored"),
        }
    }
    Ok(table)
}

fn require_file(path: &Utf8Path) -> Result<(), TrackerError> {
    if !path.as_std_path().is_file() {
        return Err(TrackerError::MissingReferenceData(
            path.as_std_path().to_path_buf(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MapRow {
    pub geocode: Geocode,
    pub city_name: String,
    pub year: i32,
    pub epidemiological_week: NaiveDate,
    pub casos: u32,
    pub nivel: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MapDataset {
    pub year: i32,
    pub week: NaiveDate,
    pub rows: Vec<MapRow>,
    pub missing_geometry: Vec<Geocode>,
}

impl MapDataset {
    pub fn total_cases(&self) -> u64 {
        self.rows.iter().map(|row| u64::from(row.casos)).sum()
    }
}

/// Inner join of the year/week slice of `cases` with the city table.
///
/// Rows follow city-table order. Cities without a case row for the week are
/// left out rather than zero-filled, as are case rows for unknown geocodes.
pub fn build_map_dataset(
    cases: &[CaseRecord],
    tables: &ReferenceTables,
    year: i32,
    week: NaiveDate,
) -> MapDataset {
    let week_cases: HashMap<&Geocode, &CaseRecord> = cases
        .iter()
        .filter(|record| record.year == year && record.epidemiological_week == week)
        .map(|record| (&record.geocode, record))
        .collect();

    let rows: Vec<MapRow> = tables
        .cities
        .iter()
        .filter_map(|city| {
            let record = week_cases.get(&city.geocode)?;
            Some(MapRow {
                geocode: city.geocode.clone(),
                city_name: city.city_name.clone(),
                year,
                epidemiological_week: week,
                casos: record.casos,
                nivel: record.nivel,
            })
        })
        .collect();

    let missing_geometry: Vec<Geocode> = rows
        .iter()
        .filter(|row| !tables.geometries.contains(&row.geocode))
        .map(|row| row.geocode.clone())
        .collect();
    if !missing_geometry.is_empty() {
        tracing::warn!(
            count = missing_geometry.len(),
            "map rows without geometry will not be drawn"
        );
    }

    MapDataset {
        year,
        week,
        rows,
        missing_geometry,
    }
}

pub fn available_years(cases: &[CaseRecord]) -> Vec<i32> {
    cases
        .iter()
        .map(|record| record.year)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn weeks_for_year(cases: &[CaseRecord], year: i32) -> Vec<NaiveDate> {
    cases
        .iter()
        .filter(|record| record.year == year)
        .map(|record| record.epidemiological_week)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Compact case total: `12.35 K`, `12 K`, `1.2 M`, `3 M`, or the plain number.
pub fn format_case_total(total: u64) -> String {
    if total >= 1_000_000 {
        if total % 1_000_000 == 0 {
            return format!("{} M", total / 1_000_000);
        }
        let tenths = (total * 10 + 500_000) / 1_000_000;
        return format!("{} M", tenths as f64 / 10.0);
    }
    if total > 1_000 {
        if total % 1_000 == 0 {
            return format!("{} K", total / 1_000);
        }
        let hundredths = (total * 100 + 500) / 1_000;
        return format!("{} K", hundredths as f64 / 100.0);
    }
    total.to_string()
}

/// Attaches geometries to map rows for an external choropleth renderer.
pub fn to_feature_collection(dataset: &MapDataset, geometries: &GeometryTable) -> FeatureCollection {
    let features = dataset
        .rows
        .iter()
        .filter_map(|row| {
            let geometry = geometries.get(&row.geocode)?.clone();
            let mut properties = JsonObject::new();
            properties.insert("geocode".to_string(), Value::from(row.geocode.as_str()));
            properties.insert("city_name".to_string(), Value::from(row.city_name.as_str()));
            properties.insert("casos".to_string(), Value::from(row.casos));
            properties.insert("nivel".to_string(), Value::from(row.nivel));
            properties.insert("year".to_string(), Value::from(row.year));
            properties.insert(
                "epidemiological_week".to_string(),
                Value::from(row.epidemiological_week.to_string()),
            );
            Some(Feature {
                bbox: None,
                geometry: Some(geometry),
                id: Some(Id::String(row.geocode.to_string())),
                properties: Some(properties),
                foreign_members: None,
            })
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}
