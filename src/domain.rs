use chrono::{Datelike, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A calendar day with no time-of-day and no timezone.
///
/// Only ever built from a validated `YYYY-MM-DD` string (or derived from another
/// `CalendarDate`), so bucket keys never depend on the caller's local clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CalendarDate(NaiveDate);

impl CalendarDate {
    /// Parses `YYYY-MM-DD`. Returns `None` on anything else; callers drop the record.
    ///
    /// The string must split on `-` into exactly three numeric segments naming a real
    /// day. Years are limited to 1..=9999.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.trim().split('-');
        let y = numeric_segment(parts.next()?)?;
        let m = numeric_segment(parts.next()?)?;
        let d = numeric_segment(parts.next()?)?;
        if parts.next().is_some() {
            return None;
        }

        let year = i32::try_from(y).ok()?;
        if !(1..=9999).contains(&year) {
            return None;
        }
        let month = u32::try_from(m).ok()?;
        let day = u32::try_from(d).ok()?;
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    /// Parses a `YYYY-MM` month label into the first day of that month.
    pub fn parse_month(raw: &str) -> Option<Self> {
        let (y, m) = raw.trim().split_once('-')?;
        if y.len() != 4 || m.len() != 2 {
            return None;
        }
        let year = i32::try_from(numeric_segment(y)?).ok()?;
        let month = u32::try_from(numeric_segment(m)?).ok()?;
        if year < 1 {
            return None;
        }
        NaiveDate::from_ymd_opt(year, month, 1).map(Self)
    }

    pub fn from_naive(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn naive(self) -> NaiveDate {
        self.0
    }

    /// `YYYY-MM`
    pub fn month_label(self) -> String {
        format!("{:04}-{:02}", self.0.year(), self.0.month())
    }
}

fn numeric_segment(s: &str) -> Option<u64> {
    if s.is_empty() || s.len() > 9 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl Serialize for CalendarDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CalendarDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        CalendarDate::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid YYYY-MM-DD date: {raw}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Daily,
    Weekly,
    Monthly,
}

impl Granularity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
pub enum Direction {
    #[serde(rename = "in")]
    #[value(name = "in")]
    Inflow,
    #[serde(rename = "out")]
    #[value(name = "out")]
    Outflow,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inflow => "in",
            Self::Outflow => "out",
        }
    }
}

/// A dated treasury movement as delivered by the transactions endpoint.
///
/// `date` is kept as received; it is parsed when a bucket key is derived so an
/// unreadable date drops only this event rather than the whole payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonetaryEvent {
    pub date: String,

    /// Pre-computed `YYYY-MM`; authoritative for monthly bucketing when well-formed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<String>,

    pub direction: Direction,

    /// `None` when the wire value was missing or not a finite number.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub amount: Option<Decimal>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Bank line wording, carried through to exports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl MonetaryEvent {
    pub fn calendar_date(&self) -> Option<CalendarDate> {
        CalendarDate::parse(&self.date)
    }

    /// Category with blank values folded into `fallback`.
    pub fn category_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        match self.category.as_deref().map(str::trim) {
            Some(c) if !c.is_empty() => c,
            _ => fallback,
        }
    }
}

/// One purchase line from the price-history endpoint.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceObservation {
    #[serde(default, deserialize_with = "lenient_id")]
    pub product_id: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub supplier: Option<String>,

    #[serde(default, deserialize_with = "lenient_decimal")]
    pub purchase_price: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub quantity: Option<Decimal>,

    pub invoice_date: String,

    #[serde(default, deserialize_with = "lenient_decimal")]
    pub margin_pct: Option<Decimal>,
    #[serde(default)]
    pub margin_alert: bool,
    #[serde(default)]
    pub stock_alert: bool,
    #[serde(default)]
    pub stockout_repeated: bool,
    #[serde(default)]
    pub stockout_events: u32,
}

impl PriceObservation {
    pub fn calendar_date(&self) -> Option<CalendarDate> {
        CalendarDate::parse(&self.invoice_date)
    }

    /// Grouping key: explicit product id, else code, else name.
    pub fn product_key(&self) -> Option<&str> {
        [&self.product_id, &self.code, &self.name]
            .into_iter()
            .filter_map(|v| v.as_deref().map(str::trim))
            .find(|v| !v.is_empty())
    }

    pub fn has_margin_alert(&self) -> bool {
        self.margin_alert
    }

    pub fn has_stockout_alert(&self) -> bool {
        self.stockout_repeated || self.stock_alert
    }
}

/// Records left out of an aggregation, by reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SkipReport {
    pub unparseable_date: usize,
    pub missing_amount: usize,
    /// Amounts that would push the run's sums past `Decimal::MAX`.
    pub overflowed: usize,
}

impl SkipReport {
    pub fn total(&self) -> usize {
        self.unparseable_date + self.missing_amount + self.overflowed
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Running sum of the magnitudes admitted into one aggregation run.
///
/// While it stays representable, no partial sum or difference of the admitted
/// amounts can overflow.
#[derive(Debug, Clone, Copy, Default)]
pub struct MagnitudeGuard(Decimal);

impl MagnitudeGuard {
    /// Returns `false`, admitting nothing, when `amount` no longer fits.
    pub fn admit(&mut self, amount: Decimal) -> bool {
        match self.0.checked_add(amount.abs()) {
            Some(total) => {
                self.0 = total;
                true
            }
            None => false,
        }
    }
}

/// Two decimals, midpoint away from zero.
pub fn round_currency(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Accepts JSON numbers and numeric strings; anything else becomes `None`.
pub fn lenient_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(decimal_from_json))
}

pub fn decimal_from_json(value: &serde_json::Value) -> Option<Decimal> {
    let raw = match value {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    if raw.is_empty() {
        return None;
    }
    raw.parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(&raw))
        .ok()
}

/// Ids arrive as strings or integers depending on the endpoint.
pub fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

pub fn required_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_id(deserializer)?.ok_or_else(|| serde::de::Error::custom("missing or empty id"))
}
