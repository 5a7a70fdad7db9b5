//! Purchase-price history analytics: summary, smoothed daily series, per-product
//! variation ranking and pre-flagged alert rows.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::{CalendarDate, MagnitudeGuard, PriceObservation, SkipReport};

/// Trailing window of the daily moving average.
pub const MOVING_AVERAGE_WINDOW: usize = 5;

/// Length cap of the increase/drop rankings.
pub const TOP_VARIATIONS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceSummary {
    pub count: usize,
    pub min: Decimal,
    pub max: Decimal,
    pub first: Decimal,
    pub last: Decimal,
    pub average: Decimal,
    pub delta: Decimal,
    /// `None` when the first price is zero.
    pub delta_pct: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PricePoint {
    pub date: CalendarDate,
    /// Mean price of that day's observations.
    pub average: Decimal,
    pub observations: usize,
    pub moving_average: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceVariation {
    pub product_key: String,
    pub name: Option<String>,
    pub code: Option<String>,
    pub supplier: Option<String>,
    pub observations: usize,
    pub previous_date: CalendarDate,
    pub previous_price: Decimal,
    pub latest_date: CalendarDate,
    pub latest_price: Decimal,
    pub delta: Decimal,
    /// `None` when the previous price is zero.
    pub pct: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlaggedObservation {
    pub product_key: Option<String>,
    pub name: Option<String>,
    pub supplier: Option<String>,
    pub invoice_date: CalendarDate,
    pub margin_pct: Option<Decimal>,
    pub stockout_events: u32,
    pub margin: bool,
    pub stockout: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlertSummary {
    pub margin: usize,
    pub stockout: usize,
    pub flagged: Vec<FlaggedObservation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceAnalysis {
    pub summary: Option<PriceSummary>,
    pub timeline: Vec<PricePoint>,
    pub top_increases: Vec<PriceVariation>,
    pub top_drops: Vec<PriceVariation>,
    pub alerts: AlertSummary,
    pub skipped: SkipReport,
}

struct Dated<'a> {
    date: CalendarDate,
    price: Decimal,
    obs: &'a PriceObservation,
}

pub fn analyze_prices(observations: &[PriceObservation]) -> PriceAnalysis {
    let mut skipped = SkipReport::default();
    let mut guard = MagnitudeGuard::default();
    let mut rows: Vec<Dated<'_>> = Vec::with_capacity(observations.len());
    for obs in observations {
        let Some(date) = obs.calendar_date() else {
            skipped.unparseable_date += 1;
            continue;
        };
        let Some(price) = obs.purchase_price else {
            skipped.missing_amount += 1;
            continue;
        };
        if !guard.admit(price) {
            skipped.overflowed += 1;
            continue;
        }
        rows.push(Dated { date, price, obs });
    }
    // Stable: same-day rows keep input order.
    rows.sort_by(|a, b| a.date.cmp(&b.date));

    if !skipped.is_empty() {
        tracing::warn!(
            unparseable_date = skipped.unparseable_date,
            missing_price = skipped.missing_amount,
            overflowed = skipped.overflowed,
            "price observations left out of analysis"
        );
    }

    let (top_increases, top_drops) = rank_variations(&rows);

    PriceAnalysis {
        summary: summarize(&rows),
        timeline: daily_timeline(&rows),
        top_increases,
        top_drops,
        alerts: collect_alerts(&rows),
        skipped,
    }
}

fn mean(values: impl IntoIterator<Item = Decimal>) -> Option<Decimal> {
    let mut sum = Decimal::ZERO;
    let mut n = 0u32;
    for v in values {
        sum = sum.checked_add(v)?;
        n += 1;
    }
    (n > 0).then(|| sum / Decimal::from(n))
}

fn percent_of(delta: Decimal, base: Decimal) -> Option<Decimal> {
    if base.is_zero() {
        return None;
    }
    delta
        .checked_div(base)
        .and_then(|r| r.checked_mul(Decimal::ONE_HUNDRED))
}

fn summarize(rows: &[Dated<'_>]) -> Option<PriceSummary> {
    let first = rows.first()?.price;
    let last = rows.last()?.price;
    let min = rows.iter().map(|r| r.price).min()?;
    let max = rows.iter().map(|r| r.price).max()?;
    let average = mean(rows.iter().map(|r| r.price))?;
    let delta = last - first;

    Some(PriceSummary {
        count: rows.len(),
        min,
        max,
        first,
        last,
        average,
        delta,
        delta_pct: percent_of(delta, first),
    })
}

fn daily_timeline(rows: &[Dated<'_>]) -> Vec<PricePoint> {
    let mut by_day: BTreeMap<CalendarDate, Vec<Decimal>> = BTreeMap::new();
    for r in rows {
        by_day.entry(r.date).or_default().push(r.price);
    }

    let daily: Vec<(CalendarDate, Decimal, usize)> = by_day
        .into_iter()
        .filter_map(|(date, prices)| {
            let n = prices.len();
            mean(prices).map(|avg| (date, avg, n))
        })
        .collect();

    let averages: Vec<Decimal> = daily.iter().map(|(_, avg, _)| *avg).collect();
    let smoothed = moving_average(&averages, MOVING_AVERAGE_WINDOW);

    daily
        .into_iter()
        .zip(smoothed)
        .map(|((date, average, observations), moving_average)| PricePoint {
            date,
            average,
            observations,
            moving_average,
        })
        .collect()
}

/// Trailing mean over `[i - window + 1, i]`, truncated at the start of the series.
pub fn moving_average(values: &[Decimal], window: usize) -> Vec<Decimal> {
    let window = window.max(1);
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            mean(values[start..=i].iter().copied()).unwrap_or(Decimal::ZERO)
        })
        .collect()
}

fn rank_variations(rows: &[Dated<'_>]) -> (Vec<PriceVariation>, Vec<PriceVariation>) {
    // Rows are already date-sorted, so each group is chronological.
    let mut groups: BTreeMap<&str, Vec<&Dated<'_>>> = BTreeMap::new();
    for r in rows {
        if let Some(key) = r.obs.product_key() {
            groups.entry(key).or_default().push(r);
        }
    }

    let mut variations = Vec::new();
    for (key, group) in groups {
        let [.., previous, latest] = group.as_slice() else {
            continue;
        };
        let delta = latest.price - previous.price;
        variations.push(PriceVariation {
            product_key: key.to_string(),
            name: latest.obs.name.clone(),
            code: latest.obs.code.clone(),
            supplier: latest.obs.supplier.clone(),
            observations: group.len(),
            previous_date: previous.date,
            previous_price: previous.price,
            latest_date: latest.date,
            latest_price: latest.price,
            delta,
            pct: percent_of(delta, previous.price),
        });
    }

    let mut increases: Vec<PriceVariation> = variations
        .iter()
        .filter(|v| v.delta > Decimal::ZERO)
        .cloned()
        .collect();
    increases.sort_by(|a, b| b.delta.cmp(&a.delta));
    increases.truncate(TOP_VARIATIONS);

    let mut drops: Vec<PriceVariation> = variations
        .into_iter()
        .filter(|v| v.delta < Decimal::ZERO)
        .collect();
    drops.sort_by(|a, b| a.delta.cmp(&b.delta));
    drops.truncate(TOP_VARIATIONS);

    (increases, drops)
}

fn collect_alerts(rows: &[Dated<'_>]) -> AlertSummary {
    let mut alerts = AlertSummary::default();
    for r in rows {
        let margin = r.obs.has_margin_alert();
        let stockout = r.obs.has_stockout_alert();
        if !(margin || stockout) {
            continue;
        }
        if margin {
            alerts.margin += 1;
        }
        if stockout {
            alerts.stockout += 1;
        }
        alerts.flagged.push(FlaggedObservation {
            product_key: r.obs.product_key().map(str::to_string),
            name: r.obs.name.clone(),
            supplier: r.obs.supplier.clone(),
            invoice_date: r.date,
            margin_pct: r.obs.margin_pct,
            stockout_events: r.obs.stockout_events,
            margin,
            stockout,
        });
    }
    alerts
}
