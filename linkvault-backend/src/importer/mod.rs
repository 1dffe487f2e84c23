//! Channel backfill and generic historical import from NDJSON exports

use serde::Deserialize;
use serde_json::Value;
use std::io::{self, BufRead};
use std::sync::Arc;

use crate::clock;
use crate::db::Database;
use crate::models::{normalize_channel, IngestStats, ParsedMessage, UpsertOutcome};
use crate::parser::{MessageParser, StrictExtractor};
use crate::rules::RuleCache;
use crate::store::LinkStore;

pub const IMPORT_SOURCE: &str = "historical_import";
pub const UNKNOWN_CHANNEL: &str = "unknown";

const PROGRESS_EVERY: u64 = 100;

/// One line of an export file. Field names vary between exporters.
#[derive(Debug, Default, Deserialize)]
pub struct ExportLine {
    pub text: Option<String>,
    pub message: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub date: Option<String>,
    pub timestamp: Option<String>,
    pub created_at: Option<String>,
    pub channel: Option<Value>,
    pub chat: Option<Value>,
    pub channel_username: Option<Value>,
    pub tags: Option<Vec<String>>,
}

fn value_text(value: &Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Read lines, replacing invalid UTF-8 instead of failing
pub fn lossy_lines<R: BufRead>(reader: R) -> impl Iterator<Item = io::Result<String>> {
    reader
        .split(b'\n')
        .map(|line| line.map(|bytes| String::from_utf8_lossy(&bytes).trim_end_matches('\r').to_string()))
}

impl ExportLine {
    pub fn from_json(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }

    /// Free text of the post: `text`, `message`, else title and description
    pub fn body(&self) -> String {
        if let Some(text) = non_empty(&self.text).or_else(|| non_empty(&self.message)) {
            return text.to_string();
        }
        [non_empty(&self.title), non_empty(&self.description)]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn raw_timestamp(&self) -> Option<&str> {
        non_empty(&self.timestamp)
            .or_else(|| non_empty(&self.date))
            .or_else(|| non_empty(&self.created_at))
    }

    pub fn raw_channel(&self) -> Option<String> {
        value_text(&self.channel)
            .or_else(|| value_text(&self.chat))
            .or_else(|| value_text(&self.channel_username))
    }
}

pub struct HistoryImporter {
    parser: Arc<MessageParser>,
    strict: StrictExtractor,
}

impl HistoryImporter {
    pub fn new(parser: Arc<MessageParser>) -> Self {
        let strict = StrictExtractor::new(parser.catalog().clone());
        Self { parser, strict }
    }

    /// Parse an export line. Only strict links count; a line without any is
    /// `None`. Tags from the export are merged after the inline hashtags.
    pub fn prepare(&self, line: &ExportLine) -> Option<ParsedMessage> {
        let body = line.body();
        if body.trim().is_empty() {
            return None;
        }
        let mut record = self.parser.parse(&body);
        record.links = self.strict.from_text(&body);
        if !record.has_links() {
            return None;
        }
        for tag in line.tags.iter().flatten() {
            let tag = tag.trim().trim_start_matches('#');
            if !tag.is_empty() && !record.tags.iter().any(|t| t == tag) {
                record.tags.push(tag.to_string());
            }
        }
        Some(record)
    }

    /// Replay one channel's export through rules and the identity store.
    /// The channel is forced to `channel` whatever the lines say.
    pub async fn backfill<R: BufRead>(
        &self,
        channel: &str,
        reader: R,
        store: &LinkStore,
        rules: &RuleCache,
    ) -> io::Result<IngestStats> {
        let channel = normalize_channel(channel);
        let mut stats = IngestStats::default();
        rules.ensure_loaded(store.db());

        for (idx, line) in lossy_lines(reader).enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            stats.processed += 1;

            let export = match ExportLine::from_json(&line) {
                Ok(export) => export,
                Err(e) => {
                    log::warn!("[backfill] Line {}: not a JSON object ({})", idx + 1, e);
                    stats.skipped += 1;
                    continue;
                }
            };
            let Some(mut record) = self.prepare(&export) else {
                stats.skipped += 1;
                continue;
            };
            record.channel = Some(channel.clone());

            if let Some(reason) = rules.suppression(&channel, &record) {
                log::debug!("[backfill] Line {} suppressed ({})", idx + 1, reason);
                stats.suppressed += 1;
                continue;
            }

            let timestamp = clock::parse_loose(export.date.as_deref().or(export.raw_timestamp()));
            match store.upsert(&record, &timestamp).await {
                Ok(outcome) => stats.record(outcome),
                Err(e) => {
                    log::error!("[backfill] Line {} failed: {}", idx + 1, e);
                    stats.failed += 1;
                }
            }
        }

        log::info!(
            "[backfill] {}: {} processed, {} inserted, {} updated, {} skipped, {} suppressed, {} failed",
            channel,
            stats.processed,
            stats.inserted,
            stats.updated,
            stats.skipped,
            stats.suppressed,
            stats.failed
        );
        Ok(stats)
    }

    /// Batched import of a generic export. Source is fixed; channel comes
    /// from the line or falls back to `unknown`.
    pub fn import<R: BufRead>(&self, reader: R, db: &Database, commit_every: usize) -> Result<IngestStats, String> {
        let mut stats = IngestStats::default();
        let mut batch = db.batch_writer(commit_every);
        let mut read_error = None;

        for (idx, line) in lossy_lines(reader).enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    read_error = Some(format!("read failed at line {}: {}", idx + 1, e));
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            stats.processed += 1;
            if stats.processed % PROGRESS_EVERY == 0 {
                log::info!(
                    "[import] {} lines, {} inserted, {} updated, {} skipped",
                    stats.processed,
                    stats.inserted,
                    stats.updated,
                    stats.skipped
                );
            }

            let export = match ExportLine::from_json(&line) {
                Ok(export) => export,
                Err(e) => {
                    log::warn!("[import] Line {}: not a JSON object ({})", idx + 1, e);
                    stats.skipped += 1;
                    continue;
                }
            };
            let Some(mut record) = self.prepare(&export) else {
                stats.skipped += 1;
                continue;
            };
            record.source = Some(IMPORT_SOURCE.to_string());
            record.channel = Some(
                export
                    .raw_channel()
                    .map(|c| normalize_channel(&c))
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| UNKNOWN_CHANNEL.to_string()),
            );

            let timestamp = clock::parse_loose(export.raw_timestamp());
            match batch.upsert(&record, &timestamp) {
                Ok(UpsertOutcome::Skipped) => stats.skipped += 1,
                Ok(outcome) => stats.record(outcome),
                Err(e) => {
                    log::error!("[import] Line {} failed: {}", idx + 1, e);
                    stats.failed += 1;
                }
            }
        }

        // Lines read before an I/O error are kept
        batch.finish().map_err(|e| format!("final commit failed: {}", e))?;
        if let Some(e) = read_error {
            log::error!("[import] Stopped early after {} lines: {}", stats.processed, e);
            return Err(e);
        }
        log::info!(
            "[import] Done: {} processed, {} inserted, {} updated, {} skipped, {} failed",
            stats.processed,
            stats.inserted,
            stats.updated,
            stats.skipped,
            stats.failed
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChannelRuleRequest, Provider};
    use crate::providers::ProviderCatalog;
    use std::io::Cursor;

    fn importer() -> HistoryImporter {
        HistoryImporter::new(Arc::new(MessageParser::new(Arc::new(ProviderCatalog::defaults()))))
    }

    #[test]
    fn test_export_line_field_fallbacks() {
        let line = ExportLine::from_json(
            r#"{"title":"T","description":"D","date":"2024-01-02T03:04:05Z","chat":12345}"#,
        )
        .unwrap();
        assert_eq!(line.body(), "T\nD");
        assert_eq!(line.raw_timestamp(), Some("2024-01-02T03:04:05Z"));
        assert_eq!(line.raw_channel().as_deref(), Some("12345"));
    }

    #[test]
    fn test_prepare_requires_strict_links() {
        let imp = importer();
        let loose = ExportLine {
            text: Some("资源\nhttps://pan.quark.cn/file/AbC".to_string()),
            ..Default::default()
        };
        assert!(imp.prepare(&loose).is_none());

        let strict = ExportLine {
            text: Some("电影B #动作\nhttps://pan.quark.cn/s/AbC".to_string()),
            tags: Some(vec!["动作".to_string(), "2024".to_string()]),
            ..Default::default()
        };
        let record = imp.prepare(&strict).unwrap();
        assert_eq!(record.links.get(&Provider::Quark).map(String::as_str), Some("https://pan.quark.cn/s/AbC"));
        assert_eq!(record.tags, vec!["动作", "2024"]);
    }

    #[test]
    fn test_import_batches_and_defaults_channel() {
        let db = Database::new(":memory:").unwrap();
        let input = [
            r#"{"text":"A\nhttps://pan.quark.cn/s/a1","date":"2024-05-01T10:00:00+08:00"}"#,
            r#"{"text":"A again\nhttps://pan.quark.cn/s/a1","channel":"@Movies"}"#,
            r#"{"text":"no links here"}"#,
            "garbage",
            "",
            r#"{"message":"B\nhttps://pan.baidu.com/s/1b2?pwd=abcd"}"#,
        ]
        .join("\n");

        let stats = importer().import(Cursor::new(input), &db, 2).unwrap();
        assert_eq!(stats.processed, 5);
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.skipped, 2);

        let (rows, total) = db.list_messages(&Default::default()).unwrap();
        assert_eq!(total, 2);
        assert!(rows.iter().all(|r| r.source.as_deref() == Some(IMPORT_SOURCE)));
        let channels: Vec<_> = rows.iter().filter_map(|r| r.channel.as_deref()).collect();
        assert!(channels.contains(&"movies"));
        assert!(channels.contains(&UNKNOWN_CHANNEL));
    }

    #[tokio::test]
    async fn test_backfill_forces_channel_and_applies_rules() {
        let db = Arc::new(Database::new(":memory:").unwrap());
        db.upsert_channel_rule(&ChannelRuleRequest {
            channel: "c1".to_string(),
            exclude_keywords: vec!["预告".to_string()],
            enabled: true,
            ..Default::default()
        })
        .unwrap();
        let store = LinkStore::new(db.clone());
        let rules = RuleCache::new();

        let input = [
            r#"{"text":"正片\nhttps://pan.quark.cn/s/p1","channel":"elsewhere","date":"2024-05-01T02:00:00Z"}"#,
            r#"{"text":"预告片\nhttps://pan.quark.cn/s/p2"}"#,
        ]
        .join("\n");
        let stats = importer()
            .backfill("@C1", Cursor::new(input), &store, &rules)
            .await
            .unwrap();
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.suppressed, 1);

        let (rows, _) = db.list_messages(&Default::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].channel.as_deref(), Some("c1"));
        assert_eq!(clock::format_plain(&rows[0].timestamp), "2024-05-01 10:00:00");
    }

    fn with_invalid_utf8_line() -> Vec<u8> {
        let mut input = Vec::new();
        input.extend_from_slice(b"{\"text\":\"Good one\\nhttps://pan.quark.cn/s/g1\"}\n");
        input.extend_from_slice(b"{\"text\":\"bad \xff\xfe\"}\n");
        input.extend_from_slice(b"{\"text\":\"Good two\\nhttps://pan.quark.cn/s/g2\"}\n");
        input
    }

    #[test]
    fn test_import_skips_undecodable_line_and_keeps_batch() {
        let db = Database::new(":memory:").unwrap();
        let stats = importer()
            .import(Cursor::new(with_invalid_utf8_line()), &db, 500)
            .unwrap();
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(db.count_messages().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_backfill_skips_undecodable_line() {
        let db = Arc::new(Database::new(":memory:").unwrap());
        let stats = importer()
            .backfill(
                "c9",
                Cursor::new(with_invalid_utf8_line()),
                &LinkStore::new(db.clone()),
                &RuleCache::new(),
            )
            .await
            .unwrap();
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(db.count_messages().unwrap(), 2);
    }
}
