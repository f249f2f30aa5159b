use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::domain::{Geocode, WeeklyCases};
use crate::error::TrackerError;
use crate::orchestrator::CancelToken;
use crate::request::RequestDescriptor;

const WEEK_START_COLUMN: &str = "data_iniSE";
const REQUIRED_COLUMNS: [&str; 4] = ["SE", WEEK_START_COLUMN, "casos", "nivel"];
const MESSAGE_PREVIEW_LEN: usize = 200;
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A single, unretried request against the alert API.
pub trait CaseSource: Send + Sync {
    fn get(&self, request: &RequestDescriptor) -> Result<String, TrackerError>;
}

#[derive(Clone)]
pub struct AlertCityHttpClient {
    client: Client,
}

impl AlertCityHttpClient {
    pub fn new(timeout: Duration) -> Result<Self, TrackerError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("dengue-tracker/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| TrackerError::InvalidConfig(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| TrackerError::InvalidConfig(format!("http client: {err}")))?;
        Ok(Self { client })
    }
}

impl CaseSource for AlertCityHttpClient {
    fn get(&self, request: &RequestDescriptor) -> Result<String, TrackerError> {
        let response = self
            .client
            .get(&request.base_url)
            .query(&request.query_pairs())
            .send()
            .map_err(classify_request_error)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            let message = format!("status {status}: {}", preview(&body));
            if is_retryable_status(status) {
                return Err(TrackerError::TransientFetch(message));
            }
            return Err(TrackerError::PermanentFetch(message));
        }

        response
            .text()
            .map_err(|err| TrackerError::TransientFetch(err.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_secs(20),
        }
    }
}

/// Fetches one cell, retrying transient failures with a fixed delay.
pub struct RetryingFetcher<S: CaseSource> {
    source: S,
    policy: RetryPolicy,
}

impl<S: CaseSource> RetryingFetcher<S> {
    pub fn new(source: S, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn fetch(&self, request: &RequestDescriptor) -> Result<Vec<WeeklyCases>, TrackerError> {
        self.fetch_until_cancelled(request, &CancelToken::new())
    }

    /// Like [`RetryingFetcher::fetch`], but gives up with
    /// [`TrackerError::Cancelled`] once `cancel` trips between attempts.
    pub fn fetch_until_cancelled(
        &self,
        request: &RequestDescriptor,
        cancel: &CancelToken,
    ) -> Result<Vec<WeeklyCases>, TrackerError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            tracing::debug!(url = %request.url(), attempt, "alertcity request");
            match self.source.get(request) {
                Ok(body) => return parse_alert_csv(&body, &request.geocode),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    tracing::warn!(
                        geocode = %request.geocode,
                        year = request.ey_start,
                        week = request.ew_start,
                        attempt,
                        delay_secs = self.policy.retry_delay.as_secs(),
                        "retrying after transient failure: {err}"
                    );
                    if wait_unless_cancelled(self.policy.retry_delay, cancel) {
                        tracing::info!(geocode = %request.geocode, attempt, "retry abandoned");
                        return Err(TrackerError::Cancelled);
                    }
                }
                Err(err) if err.is_transient() => {
                    return Err(TrackerError::RetriesExhausted {
                        attempts: attempt,
                        message: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Sleeps for `delay` in short slices. Returns true as soon as `cancel` is set.
fn wait_unless_cancelled(delay: Duration, cancel: &CancelToken) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if cancel.is_cancelled() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep((deadline - now).min(CANCEL_POLL_INTERVAL));
    }
}

/// Projects an `alertcity` CSV body onto [`WeeklyCases`] rows for `geocode`.
///
/// A blank body or a header without rows means the city reported nothing.
pub fn parse_alert_csv(body: &str, geocode: &Geocode) -> Result<Vec<WeeklyCases>, TrackerError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(body.as_bytes());
    let headers = reader
        .headers()
        .map_err(|err| TrackerError::PermanentFetch(format!("malformed CSV header: {err}")))?
        .clone();

    let mut indexes = [0usize; REQUIRED_COLUMNS.len()];
    for (slot, name) in indexes.iter_mut().zip(REQUIRED_COLUMNS) {
        *slot = headers
            .iter()
            .position(|header| header.trim() == name)
            .ok_or_else(|| TrackerError::PermanentFetch(format!("missing column {name}")))?;
    }
    let [_, week_index, casos_index, nivel_index] = indexes;

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record
            .map_err(|err| TrackerError::PermanentFetch(format!("malformed CSV row: {err}")))?;
        let field = |index: usize| record.get(index).unwrap_or("").trim();
        let row_error = |column: &str, value: &str| {
            TrackerError::PermanentFetch(format!(
                "row {}: invalid {column} value {value:?}",
                line + 1
            ))
        };

        let week = field(week_index);
        let casos = field(casos_index);
        let nivel = field(nivel_index);
        rows.push(WeeklyCases {
            geocode: geocode.clone(),
            epidemiological_week: parse_week_start(week)
                .ok_or_else(|| row_error(WEEK_START_COLUMN, week))?,
            casos: parse_count(casos).ok_or_else(|| row_error("casos", casos))?,
            nivel: parse_count(nivel).ok_or_else(|| row_error("nivel", nivel))?,
        });
    }
    Ok(rows)
}

/// Accepts `YYYY-MM-DD` (optionally followed by a time) or epoch milliseconds.
fn parse_week_start(value: &str) -> Option<NaiveDate> {
    if let Some(date) = value
        .get(..10)
        .and_then(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d").ok())
    {
        return Some(date);
    }
    if !value.is_empty() && value.chars().all(|ch| ch.is_ascii_digit()) {
        let millis = value.parse::<i64>().ok()?;
        return DateTime::from_timestamp_millis(millis).map(|dt| dt.date_naive());
    }
    None
}

/// Non-negative whole numbers, written either as integers or as `12.0`.
fn parse_count<T: TryFrom<u64>>(value: &str) -> Option<T> {
    if let Ok(number) = value.parse::<u64>() {
        return T::try_from(number).ok();
    }
    let number = value.parse::<f64>().ok()?;
    if !number.is_finite() || number < 0.0 || number.fract() != 0.0 || number > u64::MAX as f64 {
        return None;
    }
    T::try_from(number as u64).ok()
}

fn classify_request_error(err: reqwest::Error) -> TrackerError {
    if err.is_builder() || err.is_redirect() || err.is_decode() {
        TrackerError::PermanentFetch(err.to_string())
    } else {
        TrackerError::TransientFetch(err.to_string())
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

fn preview(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MESSAGE_PREVIEW_LEN) {
        Some((index, _)) => format!("{}...", &trimmed[..index]),
        None => trimmed.to_string(),
    }
}
