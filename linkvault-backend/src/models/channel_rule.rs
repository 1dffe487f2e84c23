use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-channel suppression rule as stored in `channel_rules`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRule {
    pub id: i64,
    pub channel: String,
    pub exclude_providers: Vec<String>,
    pub exclude_keywords: Vec<String>,
    pub exclude_tags: Vec<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for creating or replacing a channel rule
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelRuleRequest {
    pub channel: String,
    #[serde(default)]
    pub exclude_providers: Vec<String>,
    #[serde(default)]
    pub exclude_keywords: Vec<String>,
    #[serde(default)]
    pub exclude_tags: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// A channel the live listener accepts posts from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredChannel {
    pub id: i64,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// Canonical channel key: `@Name`, `t.me/Name` and `https://t.me/Name`
/// all become `name`.
pub fn normalize_channel(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let without_host = without_scheme
        .strip_prefix("t.me/")
        .or_else(|| without_scheme.strip_prefix("telegram.me/"))
        .unwrap_or(without_scheme);
    without_host
        .trim_start_matches('@')
        .trim_end_matches('/')
        .to_lowercase()
}
