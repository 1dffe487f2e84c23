//! Channel rule database operations

use chrono::{DateTime, Utc};
use rusqlite::{params, Result as SqliteResult, Row};

use super::super::Database;
use crate::models::{normalize_channel, ChannelRule, ChannelRuleRequest};

const RULE_COLUMNS: &str =
    "id, channel, exclude_providers, exclude_keywords, exclude_tags, enabled, created_at, updated_at";

fn parse_list(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default()
}

fn parse_utc(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_rule(row: &Row) -> SqliteResult<ChannelRule> {
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    Ok(ChannelRule {
        id: row.get(0)?,
        channel: row.get(1)?,
        exclude_providers: parse_list(row.get(2)?),
        exclude_keywords: parse_list(row.get(3)?),
        exclude_tags: parse_list(row.get(4)?),
        enabled: row.get::<_, i64>(5)? != 0,
        created_at: parse_utc(&created_at),
        updated_at: parse_utc(&updated_at),
    })
}

fn encode_list(items: &[String]) -> String {
    let cleaned: Vec<&str> = items.iter().map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
    serde_json::to_string(&cleaned).unwrap_or_else(|_| "[]".to_string())
}

impl Database {
    pub fn list_channel_rules(&self) -> SqliteResult<Vec<ChannelRule>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT {} FROM channel_rules ORDER BY channel", RULE_COLUMNS))?;
        let rules = stmt
            .query_map([], row_to_rule)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rules)
    }

    pub fn list_enabled_channel_rules(&self) -> SqliteResult<Vec<ChannelRule>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM channel_rules WHERE enabled = 1 ORDER BY channel",
            RULE_COLUMNS
        ))?;
        let rules = stmt
            .query_map([], row_to_rule)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rules)
    }

    pub fn get_channel_rule(&self, id: i64) -> SqliteResult<Option<ChannelRule>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT {} FROM channel_rules WHERE id = ?1", RULE_COLUMNS))?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_rule(row)?)),
            None => Ok(None),
        }
    }

    /// Create the rule for a channel, or replace the existing one
    pub fn upsert_channel_rule(&self, req: &ChannelRuleRequest) -> SqliteResult<ChannelRule> {
        let channel = normalize_channel(&req.channel);
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock();

        conn.execute(
            "INSERT INTO channel_rules (channel, exclude_providers, exclude_keywords, exclude_tags, enabled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(channel) DO UPDATE SET
                exclude_providers = excluded.exclude_providers,
                exclude_keywords = excluded.exclude_keywords,
                exclude_tags = excluded.exclude_tags,
                enabled = excluded.enabled,
                updated_at = excluded.updated_at",
            params![
                channel,
                encode_list(&req.exclude_providers),
                encode_list(&req.exclude_keywords),
                encode_list(&req.exclude_tags),
                req.enabled as i64,
                now,
            ],
        )?;

        conn.query_row(
            &format!("SELECT {} FROM channel_rules WHERE channel = ?1", RULE_COLUMNS),
            [&channel],
            row_to_rule,
        )
    }

    pub fn set_channel_rule_enabled(&self, id: i64, enabled: bool) -> SqliteResult<bool> {
        let conn = self.conn.lock();
        let rows_affected = conn.execute(
            "UPDATE channel_rules SET enabled = ?1, updated_at = ?2 WHERE id = ?3",
            params![enabled as i64, Utc::now().to_rfc3339(), id],
        )?;
        Ok(rows_affected > 0)
    }

    pub fn delete_channel_rule(&self, id: i64) -> SqliteResult<bool> {
        let conn = self.conn.lock();
        let rows_affected = conn.execute("DELETE FROM channel_rules WHERE id = ?1", [id])?;
        Ok(rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_replaces_rule_for_same_channel() {
        let db = Database::new(":memory:").unwrap();
        let first = db
            .upsert_channel_rule(&ChannelRuleRequest {
                channel: "@C1".to_string(),
                exclude_providers: vec!["quark".to_string(), " ".to_string()],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(first.channel, "c1");
        assert_eq!(first.exclude_providers, vec!["quark"]);
        assert!(!first.enabled);

        let second = db
            .upsert_channel_rule(&ChannelRuleRequest {
                channel: "c1".to_string(),
                exclude_tags: vec!["ads".to_string()],
                enabled: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(second.id, first.id);
        assert!(second.exclude_providers.is_empty());
        assert_eq!(db.list_channel_rules().unwrap().len(), 1);
        assert_eq!(db.list_enabled_channel_rules().unwrap().len(), 1);
    }

    #[test]
    fn test_enable_and_delete() {
        let db = Database::new(":memory:").unwrap();
        let rule = db
            .upsert_channel_rule(&ChannelRuleRequest {
                channel: "c2".to_string(),
                enabled: true,
                ..Default::default()
            })
            .unwrap();
        assert!(db.set_channel_rule_enabled(rule.id, false).unwrap());
        assert!(db.list_enabled_channel_rules().unwrap().is_empty());
        assert!(db.delete_channel_rule(rule.id).unwrap());
        assert!(db.get_channel_rule(rule.id).unwrap().is_none());
        assert!(!db.delete_channel_rule(rule.id).unwrap());
    }
}
