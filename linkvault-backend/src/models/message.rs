use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::provider::LinkMap;

/// Structured view of one free-text post, before persistence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedMessage {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub links: LinkMap,
    pub source: Option<String>,
    pub channel: Option<String>,
    pub group_name: Option<String>,
    pub bot: Option<String>,
}

impl ParsedMessage {
    pub fn has_links(&self) -> bool {
        !self.links.is_empty()
    }

    /// Link URLs, used as the record identity
    pub fn link_urls(&self) -> impl Iterator<Item = &str> {
        self.links.values().map(String::as_str)
    }
}

/// A persisted message row.
///
/// `links` is keyed by plain strings because older rows may carry provider
/// keys this build no longer knows about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub timestamp: DateTime<FixedOffset>,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub links: BTreeMap<String, String>,
    pub source: Option<String>,
    pub channel: Option<String>,
    pub group_name: Option<String>,
    pub bot: Option<String>,
    pub created_at: DateTime<FixedOffset>,
}

/// Whether a record without links may be written at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertPolicy {
    RequireLinks,
    AllowLinkless,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "id", rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted(i64),
    Updated(i64),
    Skipped,
}

impl UpsertOutcome {
    pub fn id(&self) -> Option<i64> {
        match self {
            UpsertOutcome::Inserted(id) | UpsertOutcome::Updated(id) => Some(*id),
            UpsertOutcome::Skipped => None,
        }
    }
}

/// Running counters shared by the live listener and the offline jobs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub processed: u64,
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub suppressed: u64,
    pub duplicates: u64,
    pub failed: u64,
}

impl IngestStats {
    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted(_) => self.inserted += 1,
            UpsertOutcome::Updated(_) => self.updated += 1,
            UpsertOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn written(&self) -> u64 {
        self.inserted + self.updated
    }
}
