//! CSV exports. Every field is quoted and embedded quotes are doubled.

use csv::{QuoteStyle, Terminator, Writer, WriterBuilder};
use rust_decimal::Decimal;
use std::io::Write;

use crate::categories::CategoryCosts;
use crate::domain::{MonetaryEvent, PriceObservation};
use crate::error::ExportError;
use crate::timeline::Timeline;

pub const TRANSACTION_HEADER: [&str; 6] = ["date", "month", "direction", "amount", "category", "label"];

pub const PRICE_HEADER: [&str; 12] = [
    "invoice_date",
    "product_id",
    "code",
    "name",
    "supplier",
    "purchase_price",
    "quantity",
    "margin_pct",
    "margin_alert",
    "stock_alert",
    "stockout_repeated",
    "stockout_events",
];

pub const TIMELINE_HEADER: [&str; 6] = ["key", "period_start", "period_end", "inflow", "outflow", "net"];

fn quoted_writer<W: Write>(w: W) -> Writer<W> {
    WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(w)
}

fn dec(v: Option<Decimal>) -> String {
    v.map(|d| d.to_string()).unwrap_or_default()
}

fn text(v: &Option<String>) -> &str {
    v.as_deref().unwrap_or("")
}

/// One row per event, in input order.
pub fn write_transactions<W: Write>(w: W, events: &[MonetaryEvent]) -> Result<(), ExportError> {
    let mut out = quoted_writer(w);
    out.write_record(TRANSACTION_HEADER)?;
    for e in events {
        out.write_record([
            e.date.as_str(),
            text(&e.month),
            e.direction.as_str(),
            dec(e.amount).as_str(),
            text(&e.category),
            text(&e.label),
        ])?;
    }
    out.flush()?;
    Ok(())
}

/// One row per observation, in input order.
pub fn write_prices<W: Write>(w: W, observations: &[PriceObservation]) -> Result<(), ExportError> {
    let mut out = quoted_writer(w);
    out.write_record(PRICE_HEADER)?;
    for o in observations {
        out.write_record([
            o.invoice_date.as_str(),
            text(&o.product_id),
            text(&o.code),
            text(&o.name),
            text(&o.supplier),
            dec(o.purchase_price).as_str(),
            dec(o.quantity).as_str(),
            dec(o.margin_pct).as_str(),
            bool_field(o.margin_alert),
            bool_field(o.stock_alert),
            bool_field(o.stockout_repeated),
            o.stockout_events.to_string().as_str(),
        ])?;
    }
    out.flush()?;
    Ok(())
}

/// One row per bucket.
pub fn write_timeline<W: Write>(w: W, timeline: &Timeline) -> Result<(), ExportError> {
    let mut out = quoted_writer(w);
    out.write_record(TIMELINE_HEADER)?;
    for b in &timeline.buckets {
        out.write_record([
            b.key.clone(),
            b.period_start.to_string(),
            b.period_end.map(|d| d.to_string()).unwrap_or_default(),
            format!("{:.2}", b.inflow),
            format!("{:.2}", b.outflow),
            format!("{:.2}", b.net),
        ])?;
    }
    out.flush()?;
    Ok(())
}

fn bool_field(v: bool) -> &'static str {
    if v { "true" } else { "false" }
}

/// One row per (bucket, category).
pub fn write_category_costs<W: Write>(w: W, costs: &CategoryCosts) -> Result<(), ExportError> {
    let mut out = quoted_writer(w);
    out.write_record(["key", "period_start", "category", "cost"])?;
    for b in &costs.buckets {
        for (category, cost) in &b.costs {
            out.write_record([
                b.key.clone(),
                b.period_start.to_string(),
                category.clone(),
                format!("{cost:.2}"),
            ])?;
        }
    }
    out.flush()?;
    Ok(())
}
