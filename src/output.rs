use std::io::{self, Write};

use serde::Serialize;

use crate::app::{DownloadResult, MapResult, PrepareResult, YearsResult};
use crate::orchestrator::{ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeekListing {
    pub year: i32,
    pub weeks: Vec<WeekEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeekEntry {
    pub week: u32,
    pub start: chrono::NaiveDate,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_download(result: &DownloadResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_map(result: &MapResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_years(result: &YearsResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_weeks(result: &WeekListing) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_prepare(result: &PrepareResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}
