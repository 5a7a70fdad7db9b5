use crate::domain::{CalendarDate, Direction, MonetaryEvent, PriceObservation};
use crate::error::RecordError;

pub fn parse_filter_date(raw: &str) -> Result<CalendarDate, RecordError> {
    CalendarDate::parse(raw).ok_or_else(|| RecordError::InvalidDate(raw.to_string()))
}

fn within(date: Option<CalendarDate>, from: Option<CalendarDate>, to: Option<CalendarDate>) -> bool {
    if from.is_none() && to.is_none() {
        return true;
    }
    // A date range can't be checked against an unreadable date.
    let Some(date) = date else {
        return false;
    };
    from.is_none_or(|f| date >= f) && to.is_none_or(|t| date <= t)
}

fn opt(v: &Option<impl ToString>) -> String {
    v.as_ref().map(|x| x.to_string()).unwrap_or_default()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub from: Option<CalendarDate>,
    pub to: Option<CalendarDate>,
    pub category: Option<String>,
    pub direction: Option<Direction>,
}

impl EventFilter {
    pub fn matches(&self, e: &MonetaryEvent) -> bool {
        if !within(e.calendar_date(), self.from, self.to) {
            return false;
        }
        if let Some(cat) = &self.category {
            if e.category.as_deref().map(str::trim) != Some(cat.trim()) {
                return false;
            }
        }
        if let Some(dir) = self.direction {
            if e.direction != dir {
                return false;
            }
        }
        true
    }

    pub fn apply(&self, events: &[MonetaryEvent]) -> Vec<MonetaryEvent> {
        events.iter().filter(|e| self.matches(e)).cloned().collect()
    }

    /// Server-side narrowing; only the date range is sent.
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut q = Vec::new();
        if let Some(f) = self.from {
            q.push(("from", f.to_string()));
        }
        if let Some(t) = self.to {
            q.push(("to", t.to_string()));
        }
        q
    }

    pub fn cache_key(&self) -> String {
        format!("from={};to={}", opt(&self.from), opt(&self.to))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriceFilter {
    pub from: Option<CalendarDate>,
    pub to: Option<CalendarDate>,
    pub supplier: Option<String>,
    pub product: Option<String>,
}

impl PriceFilter {
    pub fn matches(&self, o: &PriceObservation) -> bool {
        if !within(o.calendar_date(), self.from, self.to) {
            return false;
        }
        if let Some(needle) = &self.supplier {
            let needle = needle.to_lowercase();
            let hit = o
                .supplier
                .as_deref()
                .is_some_and(|s| s.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        if let Some(product) = &self.product {
            let product = product.trim().to_lowercase();
            let hit = [o.product_key(), o.code.as_deref(), o.name.as_deref()]
                .into_iter()
                .flatten()
                .any(|v| v.trim().to_lowercase() == product);
            if !hit {
                return false;
            }
        }
        true
    }

    pub fn apply(&self, observations: &[PriceObservation]) -> Vec<PriceObservation> {
        observations
            .iter()
            .filter(|o| self.matches(o))
            .cloned()
            .collect()
    }

    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut q = Vec::new();
        if let Some(f) = self.from {
            q.push(("from", f.to_string()));
        }
        if let Some(t) = self.to {
            q.push(("to", t.to_string()));
        }
        if let Some(s) = &self.supplier {
            q.push(("supplier", s.clone()));
        }
        q
    }

    pub fn cache_key(&self) -> String {
        format!(
            "from={};to={};supplier={}",
            opt(&self.from),
            opt(&self.to),
            self.supplier.as_deref().unwrap_or("").to_lowercase()
        )
    }
}
