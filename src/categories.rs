use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::bucketing::{BucketKey, BucketOrder, event_key};
use crate::domain::{
    CalendarDate, Direction, Granularity, MagnitudeGuard, MonetaryEvent, SkipReport, round_currency,
};

pub const UNCATEGORIZED: &str = "Uncategorized";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryBucket {
    pub key: String,
    pub period_start: CalendarDate,
    pub period_end: Option<CalendarDate>,
    pub costs: BTreeMap<String, Decimal>,
}

/// Outflow cost per category, per bucket, in timeline order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCosts {
    pub granularity: Granularity,
    pub buckets: Vec<CategoryBucket>,
    pub skipped: SkipReport,
}

impl CategoryCosts {
    pub fn get(&self, key: &str) -> Option<&BTreeMap<String, Decimal>> {
        self.buckets.iter().find(|b| b.key == key).map(|b| &b.costs)
    }

    /// Categories by total cost across all buckets, largest first (ties by name).
    pub fn categories(&self) -> Vec<(String, Decimal)> {
        let mut totals: BTreeMap<&str, Decimal> = BTreeMap::new();
        for b in &self.buckets {
            for (cat, cost) in &b.costs {
                let total = totals.entry(cat.as_str()).or_insert(Decimal::ZERO);
                *total = total.saturating_add(*cost);
            }
        }
        let mut out: Vec<(String, Decimal)> = totals
            .into_iter()
            .map(|(c, t)| (c.to_string(), t))
            .collect();
        out.sort_by(|a, b| b.1.cmp(&a.1));
        out
    }

    pub fn to_map(&self) -> BTreeMap<String, BTreeMap<String, Decimal>> {
        self.buckets
            .iter()
            .map(|b| (b.key.clone(), b.costs.clone()))
            .collect()
    }
}

pub fn bucket_costs(events: &[MonetaryEvent], granularity: Granularity) -> CategoryCosts {
    bucket_costs_with_fallback(events, granularity, UNCATEGORIZED)
}

/// Same as [`bucket_costs`] with a caller-chosen label for blank categories.
pub fn bucket_costs_with_fallback(
    events: &[MonetaryEvent],
    granularity: Granularity,
    fallback: &str,
) -> CategoryCosts {
    let mut acc: BTreeMap<BucketOrder, (BucketKey, BTreeMap<String, Decimal>)> = BTreeMap::new();
    let mut skipped = SkipReport::default();
    let mut guard = MagnitudeGuard::default();

    for e in events.iter().filter(|e| e.direction == Direction::Outflow) {
        let Some(key) = event_key(e, granularity) else {
            skipped.unparseable_date += 1;
            continue;
        };
        let Some(amount) = e.amount else {
            skipped.missing_amount += 1;
            continue;
        };
        if !guard.admit(amount) {
            skipped.overflowed += 1;
            continue;
        }

        let (_, costs) = acc
            .entry(key.order.clone())
            .or_insert_with(|| (key, BTreeMap::new()));
        *costs
            .entry(e.category_or(fallback).to_string())
            .or_insert(Decimal::ZERO) += amount.abs();
    }

    if !skipped.is_empty() {
        tracing::warn!(
            granularity = %granularity,
            unparseable_date = skipped.unparseable_date,
            missing_amount = skipped.missing_amount,
            overflowed = skipped.overflowed,
            "outflows left out of category costs"
        );
    }

    let buckets = acc
        .into_values()
        .map(|(key, costs)| CategoryBucket {
            key: key.label,
            period_start: key.period_start,
            period_end: key.period_end,
            costs: costs
                .into_iter()
                .map(|(c, v)| (c, round_currency(v)))
                .collect(),
        })
        .collect();

    CategoryCosts {
        granularity,
        buckets,
        skipped,
    }
}
