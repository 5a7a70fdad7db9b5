//! Bank line / invoice match candidates: ordering, confidence bands and the
//! status lifecycle the client is allowed to drive.
//!
//! Status is owned by the server. The desk only *requests* a transition and then
//! reloads the authoritative list; it never edits a candidate's status itself.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{ReconcileError, RecordError, TransitionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Pending,
    Auto,
    Confirmed,
    Rejected,
    Ignored,
}

impl MatchStatus {
    pub const ALL: [MatchStatus; 5] = [
        Self::Pending,
        Self::Auto,
        Self::Confirmed,
        Self::Rejected,
        Self::Ignored,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Auto => "auto",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
            Self::Ignored => "ignored",
        }
    }

    /// Statuses the external matcher may assign when it proposes a candidate.
    pub fn is_initial(self) -> bool {
        matches!(self, Self::Pending | Self::Auto)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_actions().is_empty()
    }

    pub fn allowed_actions(self) -> &'static [MatchAction] {
        match self {
            Self::Pending => &[MatchAction::Confirm, MatchAction::Reject, MatchAction::Ignore],
            Self::Auto => &[MatchAction::Confirm, MatchAction::Reject],
            Self::Confirmed | Self::Rejected | Self::Ignored => &[],
        }
    }

    /// Status the server is expected to report after `action` is accepted.
    pub fn transition(self, action: MatchAction) -> Result<MatchStatus, TransitionError> {
        if !self.allowed_actions().contains(&action) {
            return Err(TransitionError { from: self, action });
        }
        Ok(action.target())
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchStatus {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or(RecordError::UnknownStatus(s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MatchAction {
    Confirm,
    Reject,
    Ignore,
}

impl MatchAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Confirm => "confirm",
            Self::Reject => "reject",
            Self::Ignore => "ignore",
        }
    }

    pub fn target(self) -> MatchStatus {
        match self {
            Self::Confirm => MatchStatus::Confirmed,
            Self::Reject => MatchStatus::Rejected,
            Self::Ignore => MatchStatus::Ignored,
        }
    }
}

impl fmt::Display for MatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchAction {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "confirm" => Ok(Self::Confirm),
            "reject" => Ok(Self::Reject),
            "ignore" => Ok(Self::Ignore),
            other => Err(RecordError::UnknownAction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
    #[serde(deserialize_with = "crate::domain::required_id")]
    pub id: String,
    #[serde(default)]
    pub bank_line: serde_json::Value,
    #[serde(default)]
    pub invoice_ref: Option<serde_json::Value>,
    /// Missing scores sort last.
    #[serde(default)]
    pub confidence: f64,
    pub status: MatchStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

impl MatchCandidate {
    pub fn band(&self) -> ConfidenceBand {
        ConfidenceBand::of(self.confidence)
    }

    /// Short human label for the bank line (`label`, else `description`, else raw JSON).
    pub fn bank_line_label(&self) -> String {
        json_label(&self.bank_line, &["label", "description", "libelle"])
    }

    pub fn invoice_label(&self) -> String {
        match &self.invoice_ref {
            Some(v) => json_label(v, &["number", "reference", "ref", "supplier"]),
            None => String::new(),
        }
    }
}

fn json_label(value: &serde_json::Value, fields: &[&str]) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(map) => fields
            .iter()
            .find_map(|f| map.get(*f).and_then(|v| v.as_str()))
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBand {
    Low,
    Medium,
    High,
}

impl ConfidenceBand {
    pub fn of(confidence: f64) -> Self {
        if confidence >= 0.8 {
            Self::High
        } else if confidence >= 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Highest confidence first; equal scores keep their input order.
pub fn order_matches(mut candidates: Vec<MatchCandidate>) -> Vec<MatchCandidate> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    candidates
}

pub fn count_by_status(candidates: &[MatchCandidate]) -> BTreeMap<MatchStatus, usize> {
    let mut counts = BTreeMap::new();
    for c in candidates {
        *counts.entry(c.status).or_insert(0) += 1;
    }
    counts
}

/// The collaborator that owns match candidates and their status.
pub trait MatchService {
    fn fetch_matches(&self) -> Result<Vec<MatchCandidate>>;

    /// Asks the server to apply `action`. An error means the request was refused or lost.
    fn request_transition(&self, id: &str, action: MatchAction) -> Result<()>;
}

/// Client-side view over the candidates of a [`MatchService`].
pub struct ReconciliationDesk<S> {
    service: S,
    candidates: Vec<MatchCandidate>,
}

impl<S: MatchService> ReconciliationDesk<S> {
    pub fn open(service: S) -> Result<Self, ReconcileError> {
        let mut desk = Self {
            service,
            candidates: Vec::new(),
        };
        desk.refresh()?;
        Ok(desk)
    }

    pub fn candidates(&self) -> &[MatchCandidate] {
        &self.candidates
    }

    pub fn get(&self, id: &str) -> Option<&MatchCandidate> {
        self.candidates.iter().find(|c| c.id == id)
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn refresh(&mut self) -> Result<(), ReconcileError> {
        let fetched = self
            .service
            .fetch_matches()
            .map_err(ReconcileError::Refresh)?;
        self.candidates = order_matches(fetched);
        Ok(())
    }

    /// Requests `action` on candidate `id` and reloads the list from the server.
    ///
    /// Actions outside the transition table are refused before any request is sent.
    /// Returns the status the server reports afterwards (`None` if the candidate is no
    /// longer listed).
    pub fn act(&mut self, id: &str, action: MatchAction) -> Result<Option<MatchStatus>, ReconcileError> {
        let current = self
            .get(id)
            .ok_or_else(|| ReconcileError::UnknownCandidate(id.to_string()))?
            .status;

        current
            .transition(action)
            .map_err(|source| ReconcileError::NotAllowed {
                id: id.to_string(),
                source,
            })?;

        if let Err(source) = self.service.request_transition(id, action) {
            tracing::warn!(id, action = %action, error = %source, "transition refused");
            self.refresh()?;
            return Err(ReconcileError::Refused {
                id: id.to_string(),
                action,
                source,
            });
        }

        tracing::info!(id, action = %action, "transition accepted");
        self.refresh()?;
        Ok(self.get(id).map(|c| c.status))
    }
}
