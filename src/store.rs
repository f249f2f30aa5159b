use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::Serialize;
use tempfile::{Builder, NamedTempFile};

use crate::domain::{CaseKey, CaseRecord};
use crate::error::TrackerError;

pub const CASES_FILE: &str = "dengue_download_data.csv";
pub const CITY_GEOCODES_FILE: &str = "city_geocodes.csv";
pub const GEOMETRY_FILE: &str = "geodata_city_locations.geojson";

const CASE_COLUMNS: [&str; 5] = ["geocode", "epidemiological_week", "casos", "nivel", "year"];

/// Project-local data directory plus a per-user cache for downloaded archives.
#[derive(Debug, Clone)]
pub struct Store {
    data_root: Utf8PathBuf,
    cache_root: Utf8PathBuf,
}

impl Store {
    pub fn new(data_dir: &Utf8Path) -> Result<Self, TrackerError> {
        let data_root = if data_dir.is_absolute() {
            data_dir.to_path_buf()
        } else {
            let cwd =
                std::env::current_dir().map_err(|err| TrackerError::Filesystem(err.to_string()))?;
            Utf8PathBuf::from_path_buf(cwd.join(data_dir.as_std_path()))
                .map_err(|_| TrackerError::Filesystem("invalid data path".to_string()))?
        };

        let cache_root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.cache_dir().join("dengue-tracker")).ok()
            })
            .ok_or_else(|| {
                TrackerError::Filesystem("unable to resolve cache directory".to_string())
            })?;

        Ok(Self {
            data_root,
            cache_root,
        })
    }

    pub fn new_with_paths(data_root: Utf8PathBuf, cache_root: Utf8PathBuf) -> Self {
        Self {
            data_root,
            cache_root,
        }
    }

    pub fn data_root(&self) -> &Utf8Path {
        &self.data_root
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn cases_path(&self) -> Utf8PathBuf {
        self.data_root.join(CASES_FILE)
    }

    pub fn city_geocodes_path(&self) -> Utf8PathBuf {
        self.data_root.join(CITY_GEOCODES_FILE)
    }

    pub fn geometry_path(&self) -> Utf8PathBuf {
        self.data_root.join(GEOMETRY_FILE)
    }

    pub fn archive_cache_path(&self, name: &str) -> Utf8PathBuf {
        self.cache_root.join("archives").join(format!("{name}.zip"))
    }

    pub fn extract_dir(&self, dir: &str) -> Utf8PathBuf {
        self.data_root.join(dir)
    }

    pub fn ensure_data_root(&self) -> Result<(), TrackerError> {
        fs::create_dir_all(self.data_root.as_std_path())
            .map_err(|err| TrackerError::Filesystem(err.to_string()))
    }

    pub fn ensure_cache_root(&self) -> Result<(), TrackerError> {
        fs::create_dir_all(self.cache_root.as_std_path())
            .map_err(|err| TrackerError::Filesystem(err.to_string()))
    }

    /// The persisted dataset, or `None` before the first download.
    pub fn load_cases(&self) -> Result<Option<Vec<CaseRecord>>, TrackerError> {
        let path = self.cases_path();
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        read_cases(&path).map(Some)
    }

    /// Merges `delta` into the persisted dataset and rewrites it atomically.
    pub fn merge_cases(&self, delta: Vec<CaseRecord>) -> Result<MergeReport, TrackerError> {
        let existing = self.load_cases()?;
        if delta.is_empty()
            && let Some(existing) = &existing
        {
            return Ok(MergeReport {
                previous_rows: existing.len(),
                total_rows: existing.len(),
                ..MergeReport::default()
            });
        }

        let (merged, report) = merge_with_report(existing, delta);
        write_cases_atomic(&self.cases_path(), &merged)?;
        tracing::info!(
            added = report.added,
            replaced = report.replaced,
            total = report.total_rows,
            path = %self.cases_path(),
            "case dataset written"
        );
        Ok(report)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub previous_rows: usize,
    pub delta_rows: usize,
    pub added: usize,
    pub replaced: usize,
    pub unchanged: usize,
    pub total_rows: usize,
}

/// Key-deduplicated union of `existing` and `delta`; `delta` wins on conflict.
/// The result is ordered by (geocode, year, week).
pub fn merge_records(existing: Option<Vec<CaseRecord>>, delta: Vec<CaseRecord>) -> Vec<CaseRecord> {
    merge_with_report(existing, delta).0
}

pub fn merge_with_report(
    existing: Option<Vec<CaseRecord>>,
    delta: Vec<CaseRecord>,
) -> (Vec<CaseRecord>, MergeReport) {
    let mut report = MergeReport {
        previous_rows: existing.as_ref().map(Vec::len).unwrap_or(0),
        delta_rows: delta.len(),
        ..MergeReport::default()
    };

    let mut merged: BTreeMap<CaseKey, CaseRecord> = BTreeMap::new();
    for record in existing.into_iter().flatten() {
        merged.insert(record.key(), record);
    }
    for record in delta {
        match merged.insert(record.key(), record.clone()) {
            None => report.added += 1,
            Some(previous) if previous == record => report.unchanged += 1,
            Some(_) => report.replaced += 1,
        }
    }

    let merged: Vec<CaseRecord> = merged.into_values().collect();
    report.total_rows = merged.len();
    (merged, report)
}

pub fn read_cases(path: &Utf8Path) -> Result<Vec<CaseRecord>, TrackerError> {
    let parse_error = |message: String| TrackerError::DatasetParse {
        path: path.as_std_path().to_path_buf(),
        message,
    };
    let mut reader =
        csv::Reader::from_path(path.as_std_path()).map_err(|err| parse_error(err.to_string()))?;
    reader
        .deserialize::<CaseRecord>()
        .map(|row| row.map_err(|err| parse_error(err.to_string())))
        .collect()
}

/// Writes through a temp file in the target directory and renames it into
/// place, so readers see either the old or the new dataset.
pub fn write_cases_atomic(path: &Utf8Path, records: &[CaseRecord]) -> Result<(), TrackerError> {
    write_cases_with(path, records, |temp, target| {
        temp.persist(target).map(|_| ()).map_err(|err| err.error)
    })
}

/// `commit` moves the fully written temp file over `path`. On error the temp
/// file is dropped, which removes it.
fn write_cases_with<F>(
    path: &Utf8Path,
    records: &[CaseRecord],
    commit: F,
) -> Result<(), TrackerError>
where
    F: FnOnce(NamedTempFile, &Path) -> io::Result<()>,
{
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| TrackerError::Persistence(err.to_string()))?;

    let mut temp = Builder::new()
        .prefix(".dengue-cases")
        .suffix(".csv.tmp")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| TrackerError::Persistence(err.to_string()))?;
    {
        let mut writer = csv::Writer::from_writer(temp.as_file_mut());
        if records.is_empty() {
            writer
                .write_record(CASE_COLUMNS)
                .map_err(|err| TrackerError::Persistence(err.to_string()))?;
        }
        for record in records {
            writer
                .serialize(record)
                .map_err(|err| TrackerError::Persistence(err.to_string()))?;
        }
        writer
            .flush()
            .map_err(|err| TrackerError::Persistence(err.to_string()))?;
    }
    temp.as_file()
        .sync_all()
        .map_err(|err| TrackerError::Persistence(err.to_string()))?;
    commit(temp, path.as_std_path()).map_err(|err| TrackerError::Persistence(err.to_string()))
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), TrackerError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| TrackerError::Filesystem(err.to_string()))?;
    let mut temp = Builder::new()
        .prefix(".dengue-tracker")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| TrackerError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| TrackerError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| TrackerError::Filesystem(err.error.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::NaiveDate;

    use super::*;

    fn case(geocode: &str, casos: u32) -> CaseRecord {
        CaseRecord {
            geocode: geocode.parse().unwrap(),
            epidemiological_week: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            casos,
            nivel: 3,
            year: 2024,
        }
    }

    fn leftover_temp_files(store: &Store) -> Vec<String> {
        fs::read_dir(store.data_root().as_std_path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(".dengue-cases") && name.ends_with(".csv.tmp"))
            .collect()
    }

    #[test]
    fn failed_commit_keeps_live_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let store = Store::new_with_paths(root.join("data"), root.join("cache"));
        store.merge_cases(vec![case("3106200", 1402)]).unwrap();
        let before = fs::read(store.cases_path()).unwrap();

        let result = write_cases_with(
            &store.cases_path(),
            &[case("3106200", 9999), case("3118601", 12)],
            |_temp, _target| Err(io::Error::other("disk full")),
        );

        assert_matches!(
            result,
            Err(TrackerError::Persistence(message)) if message.contains("disk full")
        );
        assert_eq!(fs::read(store.cases_path()).unwrap(), before);
        assert!(leftover_temp_files(&store).is_empty());
        assert_eq!(store.load_cases().unwrap(), Some(vec![case("3106200", 1402)]));
    }

    #[test]
    fn successful_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let store = Store::new_with_paths(root.join("data"), root.join("cache"));

        write_cases_atomic(&store.cases_path(), &[case("3106200", 7)]).unwrap();

        assert!(leftover_temp_files(&store).is_empty());
        assert_eq!(store.load_cases().unwrap(), Some(vec![case("3106200", 7)]));
    }

    #[test]
    fn layout_paths() {
        let store = Store::new_with_paths(
            Utf8PathBuf::from("/tmp/project/data"),
            Utf8PathBuf::from("/tmp/cache"),
        );
        assert!(store.cases_path().ends_with("data/dengue_download_data.csv"));
        assert!(store.city_geocodes_path().ends_with("data/city_geocodes.csv"));
        assert!(
            store
                .geometry_path()
                .ends_with("data/geodata_city_locations.geojson")
        );
        assert!(
            store
                .archive_cache_path("city_geocodes")
                .ends_with("archives/city_geocodes.zip")
        );
    }
}
