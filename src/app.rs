use camino::Utf8Path;
use chrono::NaiveDate;
use geojson::GeoJson;
use serde::Serialize;

use crate::archives::{ArchiveClient, ArchiveOutcome, prepare_archives};
use crate::config::{ApiConfig, ArchiveSource};
use crate::domain::{CaseRecord, Geocode};
use crate::error::TrackerError;
use crate::fetcher::{CaseSource, RetryingFetcher};
use crate::orchestrator::{
    CancelToken, FetchOrchestrator, FetchSummary, ProgressEvent, ProgressSink,
};
use crate::reference::{
    MapRow, ReferenceTables, available_years, build_map_dataset, format_case_total,
    load_city_geocodes, to_feature_collection, weeks_for_year,
};
use crate::store::{MergeReport, Store, write_bytes_atomic};
use crate::weeks::FetchPlan;

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub summary: FetchSummary,
    pub merge: MergeReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct YearsResult {
    pub years: Vec<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MapResult {
    pub year: i32,
    pub week: NaiveDate,
    pub available_weeks: Vec<NaiveDate>,
    pub total_cases: u64,
    pub total_cases_label: String,
    pub rows: Vec<MapRow>,
    pub missing_geometry: Vec<Geocode>,
    pub export_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrepareResult {
    pub archives: Vec<ArchiveOutcome>,
}

pub struct App<S: CaseSource> {
    store: Store,
    orchestrator: FetchOrchestrator<S>,
}

impl<S: CaseSource> App<S> {
    pub fn new(store: Store, api: ApiConfig, fetcher: RetryingFetcher<S>) -> Self {
        Self {
            store,
            orchestrator: FetchOrchestrator::new(api, fetcher),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn orchestrator(&self) -> &FetchOrchestrator<S> {
        &self.orchestrator
    }

    /// Downloads every cell of `plan` and merges the rows into the dataset.
    ///
    /// Rows fetched before a cancellation are still persisted.
    pub fn download(
        &self,
        plan: &FetchPlan,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<DownloadResult, TrackerError> {
        if plan.is_empty() {
            return Err(TrackerError::InvalidWeek("no weeks selected".to_string()));
        }
        let cities = load_city_geocodes(&self.store.city_geocodes_path())?;

        sink.event(ProgressEvent::message(format!(
            "{} weeks x {} cities",
            plan.week_count(),
            cities.len()
        )));
        let outcome = self.orchestrator.run(&cities, plan, sink, cancel);

        sink.event(ProgressEvent::message("merging into case dataset"));
        self.store.ensure_data_root()?;
        let merge = self.store.merge_cases(outcome.records)?;

        Ok(DownloadResult {
            summary: outcome.summary,
            merge,
        })
    }

    pub fn years(&self) -> Result<YearsResult, TrackerError> {
        let cases = self.require_cases()?;
        Ok(YearsResult {
            years: available_years(&cases),
        })
    }

    /// Map dataset for `year`; without `week` the latest downloaded week is used.
    pub fn map(
        &self,
        year: i32,
        week: Option<NaiveDate>,
        export: Option<&Utf8Path>,
    ) -> Result<MapResult, TrackerError> {
        let tables = ReferenceTables::load(&self.store)?;
        let cases = self.require_cases()?;

        let available_weeks = weeks_for_year(&cases, year);
        let week = match week {
            Some(week) => week,
            None => *available_weeks.last().ok_or_else(|| {
                TrackerError::InvalidYear(format!("{year} has no downloaded weeks"))
            })?,
        };

        let dataset = build_map_dataset(&cases, &tables, year, week);
        let export_path = match export {
            Some(path) => {
                let collection = to_feature_collection(&dataset, &tables.geometries);
                let bytes = serde_json::to_vec(&GeoJson::from(collection))
                    .map_err(|err| TrackerError::Filesystem(err.to_string()))?;
                write_bytes_atomic(path, &bytes)?;
                Some(path.to_string())
            }
            None => None,
        };

        let total_cases = dataset.total_cases();
        Ok(MapResult {
            year,
            week,
            available_weeks,
            total_cases,
            total_cases_label: format_case_total(total_cases),
            rows: dataset.rows,
            missing_geometry: dataset.missing_geometry,
            export_path,
        })
    }

    pub fn prepare<C: ArchiveClient>(
        &self,
        client: &C,
        sources: &[ArchiveSource],
        sink: &dyn ProgressSink,
    ) -> Result<PrepareResult, TrackerError> {
        let archives = prepare_archives(client, &self.store, sources, sink)?;
        Ok(PrepareResult { archives })
    }

    fn require_cases(&self) -> Result<Vec<CaseRecord>, TrackerError> {
        self.store.load_cases()?.ok_or_else(|| {
            TrackerError::NoCaseData(self.store.cases_path().as_std_path().to_path_buf())
        })
    }
}
