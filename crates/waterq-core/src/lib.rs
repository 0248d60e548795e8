//! Core domain model for the BMWP water-quality sync.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Origin marker written to every silver row.
pub const INDEX_SOURCE: &str = "ETAPA";

/// Parameter name of the biological index that reaches the silver table.
pub const DEFAULT_INDEX_PARAMETER: &str = "BMWP";

/// Monitoring point as listed by the station directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    pub code: String,
    pub name: String,
}

impl Station {
    pub fn new(code: impl AsRef<str>, name: impl AsRef<str>) -> Self {
        Self {
            code: code.as_ref().trim().to_string(),
            name: name.as_ref().trim().to_string(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeriodError {
    #[error("invalid period {0:?}: expected YYYY-MM or YYYY-MM-01")]
    Format(String),
    #[error("period {0} is not the first day of a month")]
    NotMonthStart(NaiveDate),
    #[error("month out of range: {year}-{month}")]
    OutOfRange { year: i32, month: u32 },
}

/// Run-scoped month: always the first day of the month at midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period(NaiveDateTime);

impl Period {
    pub fn from_month(year: i32, month: u32) -> Result<Self, PeriodError> {
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(|d| Self(d.and_time(NaiveTime::MIN)))
            .ok_or(PeriodError::OutOfRange { year, month })
    }

    /// Truncates any timestamp down to the start of its month.
    pub fn containing(at: NaiveDateTime) -> Self {
        let first = at.date().with_day(1).unwrap_or(at.date());
        Self(first.and_time(NaiveTime::MIN))
    }

    pub fn current() -> Self {
        Self::containing(Utc::now().naive_utc())
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.0
    }
}

impl FromStr for Period {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            if date.day() != 1 {
                return Err(PeriodError::NotMonthStart(date));
            }
            return Self::from_month(date.year(), date.month());
        }
        let (year, month) = s
            .split_once('-')
            .ok_or_else(|| PeriodError::Format(s.to_string()))?;
        let year: i32 = year
            .parse()
            .map_err(|_| PeriodError::Format(s.to_string()))?;
        let month: u32 = month
            .parse()
            .map_err(|_| PeriodError::Format(s.to_string()))?;
        Self::from_month(year, month)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m"))
    }
}

/// Unparsed endpoint response for one station in one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCapture {
    pub period: Period,
    pub station_code: String,
    pub response_body: String,
}

/// Normalized reading (bronze row).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub station_code: String,
    pub parameter_name: String,
    pub parameter_abbreviation: String,
    pub observed_at: NaiveDateTime,
    pub value: Option<f64>,
}

/// Destination row for the consuming system (silver row).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub station_code: String,
    pub recorded_at: NaiveDateTime,
    pub index_value: Option<f64>,
    pub source: String,
    pub enabled: bool,
}

impl IndexRecord {
    pub fn from_measurement(measurement: Measurement) -> Self {
        Self {
            station_code: measurement.station_code,
            recorded_at: measurement.observed_at,
            index_value: measurement.value,
            source: INDEX_SOURCE.to_string(),
            enabled: true,
        }
    }
}
