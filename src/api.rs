use anyhow::{Context, Result, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use uuid::Uuid;

use crate::reconciliation::{MatchAction, MatchCandidate, MatchService};

pub const TRANSACTIONS_PATH: &str = "/treasury/transactions";
pub const PRICE_HISTORY_PATH: &str = "/purchases/price-history";
pub const MATCHES_PATH: &str = "/reconciliation/matches";

const USER_AGENT: &str = concat!("tresor/", env!("CARGO_PKG_VERSION"));

/// Blocking client for the back-office API.
pub struct ApiClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, req: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        match &self.token {
            Some(t) => req.bearer_auth(t),
            None => req,
        }
    }

    /// GETs `path` and returns the body as text, for parsing and caching.
    pub fn get_raw(&self, path: &str, query: &[(&str, String)]) -> Result<String> {
        let url = self.url(path);
        let pb = spinner(&format!("Fetching {path}..."));

        tracing::debug!(%url, ?query, "GET");
        let resp = self
            .authorized(self.http.get(&url))
            .header("Accept", "application/json")
            .query(query)
            .send()
            .with_context(|| format!("Failed to request {url}"));
        pb.finish_and_clear();
        let resp = resp?;

        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("GET {url} failed: HTTP {status}"));
        }
        resp.text()
            .with_context(|| format!("Failed to read response body from {url}"))
    }
}

impl MatchService for ApiClient {
    fn fetch_matches(&self) -> Result<Vec<MatchCandidate>> {
        let raw = self.get_raw(MATCHES_PATH, &[])?;
        parse_records(&raw).context("Invalid match candidates JSON")
    }

    fn request_transition(&self, id: &str, action: MatchAction) -> Result<()> {
        let url = self.url(&format!("{MATCHES_PATH}/{id}/{}", action.as_str()));
        let pb = spinner(&format!("Requesting {action} on match {id}..."));

        tracing::debug!(%url, "POST");
        let resp = self
            .authorized(self.http.post(&url))
            .header("Accept", "application/json")
            .header("Idempotency-Key", Uuid::new_v4().to_string())
            .send()
            .with_context(|| format!("Failed to request {url}"));
        pb.finish_and_clear();
        let resp = resp?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            let detail = body.trim();
            return Err(if detail.is_empty() {
                anyhow!("POST {url} failed: HTTP {status}")
            } else {
                anyhow!("POST {url} failed: HTTP {status}: {detail}")
            });
        }
        Ok(())
    }
}

/// Accepts a bare JSON array or an `{"items": [...]}` envelope.
pub fn parse_records<T: DeserializeOwned>(raw: &str) -> Result<Vec<T>> {
    let value: serde_json::Value = serde_json::from_str(raw).context("Body is not JSON")?;
    let list = match value {
        serde_json::Value::Array(_) => value,
        serde_json::Value::Object(mut map) => map
            .remove("items")
            .ok_or_else(|| anyhow!("Expected a JSON array or an object with an 'items' array"))?,
        _ => return Err(anyhow!("Expected a JSON array of records")),
    };
    Ok(serde_json::from_value(list)?)
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.enable_steady_tick(Duration::from_millis(80));
    pb.set_message(message.to_string());
    pb
}
