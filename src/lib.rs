//! Treasury timelines, purchase-price analytics and bank reconciliation status
//! handling for the back-office console.
//!
//! The analysis functions ([`timeline::aggregate`], [`categories::bucket_costs`],
//! [`prices::analyze_prices`], [`reconciliation::order_matches`]) are pure: they take
//! already-fetched records and return fresh values.

pub mod api;
pub mod bucketing;
pub mod cache;
pub mod categories;
pub mod config;
pub mod domain;
pub mod error;
pub mod export;
pub mod filters;
pub mod prices;
pub mod reconciliation;
pub mod timeline;
