use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::ApiConfig;
use crate::domain::{CaseRecord, CityGeocode, Geocode};
use crate::error::TrackerError;
use crate::fetcher::{CaseSource, RetryingFetcher};
use crate::weeks::FetchPlan;

/// How a single year/week/city cell ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CellOutcome {
    Fetched,
    Empty,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub processed: u64,
    pub total: u64,
    pub elapsed: Option<Duration>,
    /// Set on per-cell events; `None` for free-form status messages.
    pub outcome: Option<CellOutcome>,
}

impl ProgressEvent {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            processed: 0,
            total: 0,
            elapsed: None,
            outcome: None,
        }
    }

    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.processed as f64 / self.total as f64
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Shared flag checked between cells of a bulk download and between retries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedCell {
    pub geocode: Geocode,
    pub year: i32,
    pub week: u32,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchSummary {
    pub total_cells: u64,
    pub processed: u64,
    pub fetched_cells: u64,
    pub empty_cells: u64,
    pub skipped: Vec<SkippedCell>,
    pub cancelled: bool,
}

impl FetchSummary {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub records: Vec<CaseRecord>,
    pub summary: FetchSummary,
}

/// Walks the year × week × city grid, one fetch per cell.
pub struct FetchOrchestrator<S: CaseSource> {
    api: ApiConfig,
    fetcher: RetryingFetcher<S>,
}

impl<S: CaseSource> FetchOrchestrator<S> {
    pub fn new(api: ApiConfig, fetcher: RetryingFetcher<S>) -> Self {
        Self { api, fetcher }
    }

    pub fn fetcher(&self) -> &RetryingFetcher<S> {
        &self.fetcher
    }

    /// Cells run in year, week, then city-table order. Failed cells are
    /// recorded in the summary and never abort the run.
    pub fn run(
        &self,
        cities: &[CityGeocode],
        plan: &FetchPlan,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> FetchOutcome {
        let total = (plan.week_count() * cities.len()) as u64;
        let mut summary = FetchSummary {
            total_cells: total,
            ..FetchSummary::default()
        };
        let mut records = Vec::new();
        let started = Instant::now();

        tracing::info!(
            cells = total,
            weeks = plan.week_count(),
            cities = cities.len(),
            "starting bulk download"
        );

        'cells: for (year, weeks) in plan.iter() {
            for &week in weeks {
                for city in cities {
                    if cancel.is_cancelled() {
                        summary.cancelled = true;
                        break 'cells;
                    }

                    let request = self.api.request(&city.geocode, year, week);
                    let (outcome, message) =
                        match self.fetcher.fetch_until_cancelled(&request, cancel) {
                            Ok(rows) if rows.is_empty() => {
                                summary.empty_cells += 1;
                                (
                                    CellOutcome::Empty,
                                    format!("{} {year}/{week}: no data", city.city_name),
                                )
                            }
                            Ok(rows) => {
                                summary.fetched_cells += 1;
                                let count = rows.len();
                                records.extend(rows.into_iter().map(|row| row.with_year(year)));
                                (
                                    CellOutcome::Fetched,
                                    format!("{} {year}/{week}: {count} rows", city.city_name),
                                )
                            }
                            Err(TrackerError::Cancelled) => {
                                summary.cancelled = true;
                                break 'cells;
                            }
                            Err(err) => {
                                tracing::warn!(
                                    geocode = %city.geocode,
                                    year,
                                    week,
                                    "skipping cell: {err}"
                                );
                                summary.skipped.push(SkippedCell {
                                    geocode: city.geocode.clone(),
                                    year,
                                    week,
                                    reason: err.to_string(),
                                });
                                (
                                    CellOutcome::Skipped,
                                    format!("{} {year}/{week}: skipped ({err})", city.city_name),
                                )
                            }
                        };

                    summary.processed += 1;
                    sink.event(ProgressEvent {
                        message,
                        processed: summary.processed,
                        total,
                        elapsed: Some(started.elapsed()),
                        outcome: Some(outcome),
                    });
                }
            }
        }

        tracing::info!(
            processed = summary.processed,
            fetched = summary.fetched_cells,
            empty = summary.empty_cells,
            skipped = summary.skipped_count(),
            cancelled = summary.cancelled,
            "bulk download finished"
        );

        FetchOutcome { records, summary }
    }
}
