//! Per-channel suppression rules
//!
//! Enabled rules are cached in memory keyed by normalised channel name.
//! The cache loads lazily on first use and is replaced wholesale on reload.

use parking_lot::RwLock;
use rusqlite::Result as SqliteResult;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::db::Database;
use crate::models::{normalize_channel, ChannelRule, ParsedMessage, Provider};

/// Compiled form of one enabled rule
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    pub exclude_providers: HashSet<Provider>,
    /// Lowercased
    pub exclude_keywords: Vec<String>,
    pub exclude_tags: HashSet<String>,
}

impl RuleSet {
    pub fn from_rule(rule: &ChannelRule) -> Self {
        let mut exclude_providers = HashSet::new();
        for name in &rule.exclude_providers {
            match Provider::from_name(name) {
                Some(p) => {
                    exclude_providers.insert(p);
                }
                None => log::warn!(
                    "[rules] Channel '{}' excludes unknown provider '{}', ignored",
                    rule.channel,
                    name
                ),
            }
        }
        Self {
            exclude_providers,
            exclude_keywords: rule
                .exclude_keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            exclude_tags: rule
                .exclude_tags
                .iter()
                .map(|t| t.trim().trim_start_matches('#').to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    /// Reason the record is suppressed, if any
    pub fn violation(&self, record: &ParsedMessage) -> Option<String> {
        if let Some(p) = record.links.keys().find(|p| self.exclude_providers.contains(*p)) {
            return Some(format!("provider {}", p));
        }
        if !self.exclude_keywords.is_empty() {
            let title = record.title.to_lowercase();
            let description = record.description.to_lowercase();
            if let Some(k) = self
                .exclude_keywords
                .iter()
                .find(|k| title.contains(k.as_str()) || description.contains(k.as_str()))
            {
                return Some(format!("keyword '{}'", k));
            }
        }
        record
            .tags
            .iter()
            .find(|t| self.exclude_tags.contains(t.as_str()))
            .map(|t| format!("tag '{}'", t))
    }
}

#[derive(Default)]
pub struct RuleCache {
    rules: RwLock<HashMap<String, RuleSet>>,
    loaded: AtomicBool,
}

impl RuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a new rule table; returns how many channels have rules
    pub fn replace(&self, rules: impl IntoIterator<Item = ChannelRule>) -> usize {
        let table: HashMap<String, RuleSet> = rules
            .into_iter()
            .filter(|r| r.enabled)
            .map(|r| (normalize_channel(&r.channel), RuleSet::from_rule(&r)))
            .collect();
        let count = table.len();
        *self.rules.write() = table;
        self.loaded.store(true, Ordering::SeqCst);
        count
    }

    pub fn reload(&self, db: &Database) -> SqliteResult<usize> {
        let count = self.replace(db.list_enabled_channel_rules()?);
        log::info!("[rules] Loaded rules for {} channels", count);
        Ok(count)
    }

    /// Load from the database unless a load has already happened
    pub fn ensure_loaded(&self, db: &Database) {
        if !self.loaded.load(Ordering::SeqCst) {
            if let Err(e) = self.reload(db) {
                log::error!("[rules] Failed to load rules: {}", e);
            }
        }
    }

    /// Drop the cached table; the next `ensure_loaded` reads the database
    pub fn invalidate(&self) {
        self.loaded.store(false, Ordering::SeqCst);
    }

    pub fn lookup(&self, channel: &str) -> Option<RuleSet> {
        self.rules.read().get(&normalize_channel(channel)).cloned()
    }

    /// Why `record` from `channel` must not be stored, if it must not
    pub fn suppression(&self, channel: &str, record: &ParsedMessage) -> Option<String> {
        self.rules
            .read()
            .get(&normalize_channel(channel))
            .and_then(|rules| rules.violation(record))
    }

    pub fn should_drop(&self, channel: &str, record: &ParsedMessage) -> bool {
        self.suppression(channel, record).is_some()
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChannelRuleRequest, LinkMap};
    use chrono::Utc;

    fn rule(channel: &str, providers: &[&str], keywords: &[&str], tags: &[&str], enabled: bool) -> ChannelRule {
        let owned = |v: &[&str]| -> Vec<String> { v.iter().map(|s| s.to_string()).collect() };
        ChannelRule {
            id: 1,
            channel: channel.to_string(),
            exclude_providers: owned(providers),
            exclude_keywords: owned(keywords),
            exclude_tags: owned(tags),
            enabled,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn quark_record() -> ParsedMessage {
        let mut links = LinkMap::new();
        links.insert(Provider::Quark, "https://pan.quark.cn/s/x".to_string());
        ParsedMessage {
            title: "Some Movie".to_string(),
            description: "4K remux".to_string(),
            tags: vec!["电影".to_string()],
            links,
            ..Default::default()
        }
    }

    #[test]
    fn test_provider_rule_applies_only_to_its_channel() {
        let cache = RuleCache::new();
        cache.replace(vec![rule("c1", &["quark"], &[], &[], true)]);
        assert!(cache.should_drop("c1", &quark_record()));
        assert!(cache.should_drop("@C1", &quark_record()));
        assert!(!cache.should_drop("c2", &quark_record()));
    }

    #[test]
    fn test_keyword_and_tag_rules() {
        let cache = RuleCache::new();
        cache.replace(vec![
            rule("kw", &[], &["REMUX"], &[], true),
            rule("tg", &[], &[], &["#电影"], true),
            rule("off", &["quark"], &[], &[], false),
        ]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.suppression("kw", &quark_record()).as_deref(), Some("keyword 'remux'"));
        assert!(cache.should_drop("tg", &quark_record()));
        assert!(!cache.should_drop("off", &quark_record()));
    }

    #[test]
    fn test_unknown_provider_names_are_ignored() {
        let set = RuleSet::from_rule(&rule("c", &["dropbox", "Baidu"], &[], &[], true));
        assert_eq!(set.exclude_providers.len(), 1);
        assert!(set.exclude_providers.contains(&Provider::Baidu));
    }

    #[test]
    fn test_lazy_load_and_invalidate() {
        let db = Database::new(":memory:").unwrap();
        db.upsert_channel_rule(&ChannelRuleRequest {
            channel: "c1".to_string(),
            exclude_providers: vec!["quark".to_string()],
            enabled: true,
            ..Default::default()
        })
        .unwrap();

        let cache = RuleCache::new();
        assert!(cache.is_empty());
        cache.ensure_loaded(&db);
        assert!(cache.should_drop("c1", &quark_record()));

        let rule_id = db.list_channel_rules().unwrap()[0].id;
        db.set_channel_rule_enabled(rule_id, false).unwrap();
        cache.ensure_loaded(&db);
        assert!(cache.should_drop("c1", &quark_record()));
        cache.invalidate();
        cache.ensure_loaded(&db);
        assert!(!cache.should_drop("c1", &quark_record()));
    }
}
