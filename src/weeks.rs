use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, Days, NaiveDate};
use serde::Serialize;

use crate::error::TrackerError;

/// Earliest year offered for download.
pub const FIRST_YEAR: i32 = 2015;

pub const MAX_WEEKS_PER_YEAR: usize = 53;

/// First Sunday on or after January 1.
pub fn first_sunday(year: i32) -> Option<NaiveDate> {
    let jan1 = NaiveDate::from_ymd_opt(year, 1, 1)?;
    let offset = (7 - jan1.weekday().num_days_from_sunday()) % 7;
    jan1.checked_add_days(Days::new(u64::from(offset)))
}

/// Sunday start dates of the epidemiological weeks of `year`.
///
/// Past years list every Sunday that falls inside the year. For the current
/// year the list stops at the last Sunday on or before `today`, so the week in
/// progress is included. Years after `today` have no weeks, and neither does
/// the current year before its first Sunday.
pub fn weeks_of_year(year: i32, today: NaiveDate) -> Vec<NaiveDate> {
    let Some(mut day) = first_sunday(year) else {
        return Vec::new();
    };
    let truncate_at_today = year >= today.year();

    let mut weeks = Vec::with_capacity(MAX_WEEKS_PER_YEAR);
    loop {
        let in_range = if truncate_at_today {
            day <= today
        } else {
            day.year() == year
        };
        if !in_range {
            break;
        }
        weeks.push(day);
        let Some(next) = day.checked_add_days(Days::new(7)) else {
            break;
        };
        day = next;
    }
    weeks
}

/// 1-based position of `date` among the week starts of its year.
pub fn week_number(date: NaiveDate, today: NaiveDate) -> Option<u32> {
    weeks_of_year(date.year(), today)
        .iter()
        .position(|week| *week == date)
        .map(|index| index as u32 + 1)
}

pub fn selectable_years(today: NaiveDate) -> Vec<i32> {
    (FIRST_YEAR..=today.year()).collect()
}

/// Years and week numbers requested for one bulk download.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchPlan {
    years: BTreeMap<i32, BTreeSet<u32>>,
}

impl FetchPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_weeks(year: i32, weeks: &[u32], today: NaiveDate) -> Result<Self, TrackerError> {
        let mut plan = Self::new();
        for week in weeks {
            plan.insert(year, *week, today)?;
        }
        Ok(plan)
    }

    /// Builds a plan from selected week start dates, grouping them by year.
    pub fn from_week_dates(dates: &[NaiveDate], today: NaiveDate) -> Result<Self, TrackerError> {
        let mut plan = Self::new();
        for date in dates {
            check_year(date.year(), today)?;
            let week = week_number(*date, today).ok_or_else(|| {
                TrackerError::InvalidWeek(format!("{date} is not a week start of {}", date.year()))
            })?;
            plan.years.entry(date.year()).or_default().insert(week);
        }
        Ok(plan)
    }

    pub fn insert(&mut self, year: i32, week: u32, today: NaiveDate) -> Result<(), TrackerError> {
        check_year(year, today)?;
        let available = weeks_of_year(year, today).len() as u32;
        if week == 0 || week > available {
            return Err(TrackerError::InvalidWeek(format!(
                "week {week} of {year} (available: 1..={available})"
            )));
        }
        self.years.entry(year).or_default().insert(week);
        Ok(())
    }

    /// Years ascending, each with its weeks ascending.
    pub fn iter(&self) -> impl Iterator<Item = (i32, &BTreeSet<u32>)> {
        self.years.iter().map(|(year, weeks)| (*year, weeks))
    }

    pub fn week_count(&self) -> usize {
        self.years.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.week_count() == 0
    }
}

fn check_year(year: i32, today: NaiveDate) -> Result<(), TrackerError> {
    if year < FIRST_YEAR || year > today.year() {
        return Err(TrackerError::InvalidYear(format!(
            "{year} (supported: {FIRST_YEAR}..={})",
            today.year()
        )));
    }
    Ok(())
}
