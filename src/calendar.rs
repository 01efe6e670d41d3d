//! Calendar spine generation
//!
//! The spine is a generated, never-persisted scaffold of calendar days used
//! for scheduling backfill steps and for gap arithmetic. Native-frequency
//! periods give the coarser expected timeline of weekly to annual series.

use crate::error::{Error, Result};
use crate::models::Frequency;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// One day of the spine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub date: NaiveDate,
    pub year: i32,
    pub month: u32,
    pub quarter: u32,
    pub iso_year: i32,
    pub iso_week: u32,
    pub weekday: Weekday,
    pub is_weekend: bool,
}

impl CalendarEntry {
    pub fn new(date: NaiveDate) -> Self {
        let iso = date.iso_week();
        let weekday = date.weekday();
        Self {
            date,
            year: date.year(),
            month: date.month(),
            quarter: quarter_of(date),
            iso_year: iso.year(),
            iso_week: iso.week(),
            weekday,
            is_weekend: is_weekend(weekday),
        }
    }
}

/// Friday and Saturday are the local weekend
pub fn is_weekend(weekday: Weekday) -> bool {
    matches!(weekday, Weekday::Fri | Weekday::Sat)
}

pub fn quarter_of(date: NaiveDate) -> u32 {
    (date.month() - 1) / 3 + 1
}

/// Every day in `[start, end]`, ascending. Empty when `start > end`.
pub fn spine(start: NaiveDate, end: NaiveDate) -> Vec<CalendarEntry> {
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .map(CalendarEntry::new)
        .collect()
}

/// Years of `[start_year, end_year]`, most recent first
pub fn years_descending(start_year: i32, end_year: i32) -> Vec<i32> {
    let (lo, hi) = if start_year <= end_year {
        (start_year, end_year)
    } else {
        (end_year, start_year)
    };
    (lo..=hi).rev().collect()
}

pub fn year_start(year: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, 1, 1)
}

pub fn year_end(year: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, 12, 31)
}

/// Size of the steps a backfill chunk is cut into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ChunkGranularity {
    Year,
    Month,
    Day,
}

impl std::fmt::Display for ChunkGranularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkGranularity::Year => write!(f, "year"),
            ChunkGranularity::Month => write!(f, "month"),
            ChunkGranularity::Day => write!(f, "day"),
        }
    }
}

impl FromStr for ChunkGranularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "year" => Ok(ChunkGranularity::Year),
            "month" => Ok(ChunkGranularity::Month),
            "day" => Ok(ChunkGranularity::Day),
            _ => Err(Error::Config(format!("Unknown chunk granularity: {}", s))),
        }
    }
}

/// A contiguous group of spine days
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpineChunk {
    pub label: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub days: usize,
}

/// Group spine entries by year, by month, or one chunk per day.
///
/// Chunks keep the order of the input entries.
pub fn chunk_spine(entries: &[CalendarEntry], granularity: ChunkGranularity) -> Vec<SpineChunk> {
    let mut chunks: Vec<SpineChunk> = Vec::new();

    for entry in entries {
        let label = match granularity {
            ChunkGranularity::Year => format!("{}", entry.year),
            ChunkGranularity::Month => format!("{}-{:02}", entry.year, entry.month),
            ChunkGranularity::Day => entry.date.format("%Y-%m-%d").to_string(),
        };

        match chunks.last_mut() {
            Some(last) if last.label == label => {
                last.start = last.start.min(entry.date);
                last.end = last.end.max(entry.date);
                last.days += 1;
            }
            _ => chunks.push(SpineChunk {
                label,
                start: entry.date,
                end: entry.date,
                days: 1,
            }),
        }
    }

    chunks
}

/// One period of a native-frequency timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub label: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

fn month_end(year: i32, month: u32) -> NaiveDate {
    let (ny, nm) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    // first day of the next month always exists for valid inputs
    NaiveDate::from_ymd_opt(ny, nm, 1)
        .map(|d| d - Duration::days(1))
        .unwrap_or(NaiveDate::MAX)
}

fn first_of(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

/// The period of `frequency` containing `date`
pub fn period_of(date: NaiveDate, frequency: Frequency) -> Period {
    match frequency {
        Frequency::Daily => Period {
            label: date.format("%Y-%m-%d").to_string(),
            start: date,
            end: date,
        },
        Frequency::Weekly => {
            let offset = date.weekday().num_days_from_monday() as i64;
            let start = date - Duration::days(offset);
            let iso = date.iso_week();
            Period {
                label: format!("{}-W{:02}", iso.year(), iso.week()),
                start,
                end: start + Duration::days(6),
            }
        }
        Frequency::Monthly => Period {
            label: format!("{}-{:02}", date.year(), date.month()),
            start: first_of(date.year(), date.month()),
            end: month_end(date.year(), date.month()),
        },
        Frequency::Quarterly => {
            let q = quarter_of(date);
            let first_month = (q - 1) * 3 + 1;
            Period {
                label: format!("{}-Q{}", date.year(), q),
                start: first_of(date.year(), first_month),
                end: month_end(date.year(), first_month + 2),
            }
        }
        Frequency::Annual => Period {
            label: format!("{}", date.year()),
            start: first_of(date.year(), 1),
            end: month_end(date.year(), 12),
        },
    }
}

/// Periods of `frequency` intersecting `[start, end]`, ascending
pub fn periods(start: NaiveDate, end: NaiveDate, frequency: Frequency) -> Vec<Period> {
    let mut out = Vec::new();
    if start > end {
        return out;
    }

    let mut cursor = start;
    loop {
        let period = period_of(cursor, frequency);
        let next = period.end.succ_opt();
        out.push(period);
        match next {
            Some(n) if n <= end => cursor = n,
            _ => break,
        }
    }
    out
}
