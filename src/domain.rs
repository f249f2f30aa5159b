use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

/// IBGE municipality code, the join key between case data and geometry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Geocode(String);

impl Geocode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Geocode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Geocode {
    type Err = TrackerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = !normalized.is_empty() && normalized.chars().all(|ch| ch.is_ascii_digit());
        if !is_valid {
            return Err(TrackerError::InvalidGeocode(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

impl TryFrom<String> for Geocode {
    type Error = TrackerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Geocode> for String {
    fn from(value: Geocode) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CityGeocode {
    pub geocode: Geocode,
    pub city_name: String,
}

/// One upstream row projected onto the columns the pipeline keeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeeklyCases {
    pub geocode: Geocode,
    pub epidemiological_week: NaiveDate,
    pub casos: u32,
    pub nivel: u8,
}

impl WeeklyCases {
    pub fn with_year(self, year: i32) -> CaseRecord {
        CaseRecord {
            geocode: self.geocode,
            epidemiological_week: self.epidemiological_week,
            casos: self.casos,
            nivel: self.nivel,
            year,
        }
    }
}

/// A persisted row. Field order is the column order of the dataset file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub geocode: Geocode,
    pub epidemiological_week: NaiveDate,
    pub casos: u32,
    pub nivel: u8,
    pub year: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CaseKey {
    pub geocode: Geocode,
    pub year: i32,
    pub epidemiological_week: NaiveDate,
}

impl CaseRecord {
    pub fn key(&self) -> CaseKey {
        CaseKey {
            geocode: self.geocode.clone(),
            year: self.year,
            epidemiological_week: self.epidemiological_week,
        }
    }
}
