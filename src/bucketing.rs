//! Calendar bucketing: daily, ISO-8601 weekly and monthly keys.

use chrono::{Datelike, Duration};

use crate::domain::{CalendarDate, Granularity, MonetaryEvent};

/// ISO-8601 week of a date, with the Monday and Sunday that bound it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsoWeek {
    /// Year of the week's Thursday, which may differ from the calendar year.
    pub year: i32,
    pub week: u32,
    pub monday: CalendarDate,
    pub sunday: CalendarDate,
}

impl IsoWeek {
    /// `2025-W01`
    pub fn label(&self) -> String {
        format!("{}-W{:02}", self.year, self.week)
    }
}

pub fn iso_week(date: CalendarDate) -> IsoWeek {
    let day = date.naive();
    let weekday = i64::from(day.weekday().number_from_monday());

    let thursday = day + Duration::days(4 - weekday);
    // The week belongs to the year of its Thursday.
    let week = thursday.ordinal().div_ceil(7);

    IsoWeek {
        year: thursday.year(),
        week,
        monday: CalendarDate::from_naive(day - Duration::days(weekday - 1)),
        sunday: CalendarDate::from_naive(day + Duration::days(6 - (weekday - 1))),
    }
}

/// Chronological ordering of buckets; never the display label for weeks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BucketOrder {
    Week { year: i32, week: u32 },
    /// `YYYY-MM-DD` and `YYYY-MM` labels sort chronologically as strings.
    Label(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketKey {
    pub label: String,
    pub order: BucketOrder,
    pub period_start: CalendarDate,
    /// Only weekly buckets carry an explicit end.
    pub period_end: Option<CalendarDate>,
}

/// Derives the bucket key of one dated record.
///
/// For monthly granularity a well-formed `month` (`YYYY-MM`) wins over `date` and the
/// date is not parsed at all. Returns `None` when no key can be derived.
pub fn bucket_key(date: &str, month: Option<&str>, granularity: Granularity) -> Option<BucketKey> {
    if granularity == Granularity::Monthly {
        if let Some(raw) = month {
            if let Some(start) = CalendarDate::parse_month(raw) {
                let label = raw.trim().to_string();
                return Some(BucketKey {
                    order: BucketOrder::Label(label.clone()),
                    label,
                    period_start: start,
                    period_end: None,
                });
            }
        }
    }

    let date = CalendarDate::parse(date)?;
    Some(key_for_date(date, granularity))
}

pub fn key_for_date(date: CalendarDate, granularity: Granularity) -> BucketKey {
    match granularity {
        Granularity::Daily => {
            let label = date.to_string();
            BucketKey {
                order: BucketOrder::Label(label.clone()),
                label,
                period_start: date,
                period_end: None,
            }
        }
        Granularity::Weekly => {
            let w = iso_week(date);
            BucketKey {
                label: w.label(),
                order: BucketOrder::Week {
                    year: w.year,
                    week: w.week,
                },
                period_start: w.monday,
                period_end: Some(w.sunday),
            }
        }
        Granularity::Monthly => {
            let label = date.month_label();
            let start = CalendarDate::parse_month(&label).unwrap_or(date);
            BucketKey {
                order: BucketOrder::Label(label.clone()),
                label,
                period_start: start,
                period_end: None,
            }
        }
    }
}

pub fn event_key(event: &MonetaryEvent, granularity: Granularity) -> Option<BucketKey> {
    bucket_key(&event.date, event.month.as_deref(), granularity)
}
