use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::bucketing::{BucketKey, BucketOrder, event_key};
use crate::domain::{
    CalendarDate, Direction, Granularity, MagnitudeGuard, MonetaryEvent, SkipReport, round_currency,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bucket {
    pub key: String,
    pub period_start: CalendarDate,
    pub period_end: Option<CalendarDate>,
    pub inflow: Decimal,
    pub outflow: Decimal,
    /// `inflow - outflow` of the already rounded sides, not the rounded raw difference.
    pub net: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Timeline {
    pub granularity: Granularity,
    pub buckets: Vec<Bucket>,
    pub skipped: SkipReport,
}

impl Timeline {
    /// `None` when the sum is not representable.
    pub fn total_inflow(&self) -> Option<Decimal> {
        checked_sum(self.buckets.iter().map(|b| b.inflow))
    }

    pub fn total_outflow(&self) -> Option<Decimal> {
        checked_sum(self.buckets.iter().map(|b| b.outflow))
    }

    pub fn total_net(&self) -> Option<Decimal> {
        self.total_inflow()?.checked_sub(self.total_outflow()?)
    }

    pub fn get(&self, key: &str) -> Option<&Bucket> {
        self.buckets.iter().find(|b| b.key == key)
    }
}

fn checked_sum(values: impl IntoIterator<Item = Decimal>) -> Option<Decimal> {
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(v))
}

struct Accumulator {
    key: BucketKey,
    inflow: Decimal,
    outflow: Decimal,
}

/// Groups events into chronologically ordered buckets of summed inflow/outflow.
///
/// Events without a derivable key, without a usable amount, or whose amount would overflow
/// the run's sums are left out and counted in `Timeline::skipped`.
pub fn aggregate(events: &[MonetaryEvent], granularity: Granularity) -> Timeline {
    let mut acc: BTreeMap<BucketOrder, Accumulator> = BTreeMap::new();
    let mut skipped = SkipReport::default();
    let mut guard = MagnitudeGuard::default();

    for e in events {
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

        let slot = acc.entry(key.order.clone()).or_insert_with(|| Accumulator {
            key,
            inflow: Decimal::ZERO,
            outflow: Decimal::ZERO,
        });
        match e.direction {
            Direction::Inflow => slot.inflow += amount,
            Direction::Outflow => slot.outflow += amount,
        }
    }

    if !skipped.is_empty() {
        tracing::warn!(
            granularity = %granularity,
            unparseable_date = skipped.unparseable_date,
            missing_amount = skipped.missing_amount,
            overflowed = skipped.overflowed,
            "events left out of timeline"
        );
    }

    let buckets = acc
        .into_values()
        .map(|a| {
            let inflow = round_currency(a.inflow);
            let outflow = round_currency(a.outflow);
            Bucket {
                key: a.key.label,
                period_start: a.key.period_start,
                period_end: a.key.period_end,
                inflow,
                outflow,
                net: inflow - outflow,
            }
        })
        .collect();

    Timeline {
        granularity,
        buckets,
        skipped,
    }
}
