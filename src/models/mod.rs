//! Core data models for IOC verification

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod ioc_utils;

/// Kinds of Indicators of Compromise
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum IocKind {
    Url,
    Ip,
    Hash,
    Unknown,
}

impl std::fmt::Display for IocKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IocKind::Url => write!(f, "URL"),
            IocKind::Ip => write!(f, "IP"),
            IocKind::Hash => write!(f, "HASH"),
            IocKind::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// A single indicator as captured from a report document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Indicator {
    /// Original token, possibly defanged (`hxxp`, `[.]`, stray newlines)
    pub raw_text: String,
    /// Sanitized form; immutable once produced
    pub normalized_text: String,
    pub kind: IocKind,
    /// Type column as declared by the source document, informational only
    pub declared_type: Option<String>,
    pub description: Option<String>,
    pub first_seen: Option<String>,
}

impl Indicator {
    /// Build an indicator from a raw row token: sanitize, then classify.
    pub fn from_raw(raw: &str) -> Self {
        let normalized = ioc_utils::sanitize_ioc(raw);
        let kind = ioc_utils::classify_ioc(&normalized);
        Self {
            raw_text: raw.to_string(),
            normalized_text: normalized,
            kind,
            declared_type: None,
            description: None,
            first_seen: None,
        }
    }

    /// Build an indicator for a URL recovered from free text. The URL
    /// extraction pass is authoritative for these, so the kind is fixed.
    pub fn from_url(url: &str) -> Self {
        Self {
            raw_text: url.to_string(),
            normalized_text: url.to_string(),
            kind: IocKind::Url,
            declared_type: Some("URL".to_string()),
            description: None,
            first_seen: None,
        }
    }
}

/// Checkpoints reached during one automated lookup attempt.
///
/// Checkpoints are monotonic within an attempt: once set they are never
/// cleared, and they are only consulted in order.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationState {
    pub page_loaded: bool,
    pub input_found: bool,
    pub submit_clicked: bool,
    pub result_extracted: bool,
}

impl VerificationState {
    /// Name of the furthest checkpoint reached, for failure records.
    pub fn last_checkpoint(&self) -> &'static str {
        if self.result_extracted {
            "result_extracted"
        } else if self.submit_clicked {
            "submit_clicked"
        } else if self.input_found {
            "input_found"
        } else if self.page_loaded {
            "page_loaded"
        } else {
            "none"
        }
    }
}

/// Why an automated attempt failed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    UnexpectedInterruption,
    Exception,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::UnexpectedInterruption => write!(f, "UNEXPECTED_INTERRUPTION"),
            FailureReason::Exception => write!(f, "EXCEPTION"),
        }
    }
}

/// Outcome of one source's lookup for one indicator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReputationRecord {
    /// Automated lookup succeeded; `fields` maps field name to extracted text
    Verdict {
        fields: BTreeMap<String, String>,
        verification: VerificationState,
    },
    /// Operator-entered verdict from a manual source
    Manual {
        category: String,
        risk: Option<String>,
    },
    /// Automated attempt aborted; the snapshot shows how far it progressed
    Failed {
        reason: FailureReason,
        verification: VerificationState,
    },
}

impl ReputationRecord {
    pub fn is_failed(&self) -> bool {
        matches!(self, ReputationRecord::Failed { .. })
    }
}

/// All source verdicts collected for one indicator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AggregatedResult {
    pub indicator: Indicator,
    /// Source name -> record; export column order comes from the registry
    pub sources: BTreeMap<String, ReputationRecord>,
    pub checked_at: DateTime<Utc>,
}
