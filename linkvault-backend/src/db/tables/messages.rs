//! Message storage: link-overlap upsert, queries and link dedup
//!
//! A message's identity is its set of link URLs. Writing a record whose
//! links overlap an existing row overwrites the most recent such row.

use chrono::{DateTime, FixedOffset};
use rusqlite::{params, params_from_iter, Connection, Result as SqliteResult, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use super::super::Database;
use crate::clock;
use crate::models::{ParsedMessage, StoredMessage, UpsertOutcome, UpsertPolicy};

const MESSAGE_COLUMNS: &str =
    "id, timestamp, title, description, links, tags, source, channel, group_name, bot, created_at";

const DELETE_CHUNK: usize = 500;

/// Filters for listing messages
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageQuery {
    /// Substring of title or description
    pub q: Option<String>,
    /// Provider storage key, e.g. "quark"
    pub provider: Option<String>,
    pub tag: Option<String>,
    pub channel: Option<String>,
    /// 1-based
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl MessageQuery {
    pub const DEFAULT_PAGE_SIZE: u32 = 20;
    pub const MAX_PAGE_SIZE: u32 = 200;

    pub fn page_size(&self) -> u32 {
        self.page_size.unwrap_or(Self::DEFAULT_PAGE_SIZE).clamp(1, Self::MAX_PAGE_SIZE)
    }

    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    fn offset(&self) -> u64 {
        (self.page() as u64 - 1) * self.page_size() as u64
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MessageStats {
    pub total: i64,
    pub by_provider: BTreeMap<String, i64>,
    pub top_tags: Vec<(String, i64)>,
}

fn to_sql_failure(e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(e))
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// LIKE pattern matching `value` as a complete JSON string inside a column
fn json_value_pattern(value: &str) -> String {
    let encoded = serde_json::Value::String(value.to_string()).to_string();
    format!("%{}%", escape_like(&encoded))
}

fn parse_links(raw: Option<String>) -> BTreeMap<String, String> {
    raw.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default()
}

fn row_to_message(row: &Row) -> SqliteResult<StoredMessage> {
    let timestamp: String = row.get(1)?;
    let created_at: String = row.get(10)?;
    let tags: Option<String> = row.get(5)?;
    Ok(StoredMessage {
        id: row.get(0)?,
        timestamp: clock::parse_stored(&timestamp),
        title: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        description: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        links: parse_links(row.get(4)?),
        tags: tags.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default(),
        source: row.get(6)?,
        channel: row.get(7)?,
        group_name: row.get(8)?,
        bot: row.get(9)?,
        created_at: clock::parse_stored(&created_at),
    })
}

/// Most recent row sharing at least one link URL with `urls`.
/// LIKE narrows the candidates; the decoded JSON decides.
pub(crate) fn find_overlapping(conn: &Connection, urls: &[&str]) -> SqliteResult<Option<i64>> {
    if urls.is_empty() {
        return Ok(None);
    }
    let clause = (1..=urls.len())
        .map(|i| format!("links LIKE ?{} ESCAPE '\\'", i))
        .collect::<Vec<_>>()
        .join(" OR ");
    let sql = format!(
        "SELECT id, links FROM messages WHERE links IS NOT NULL AND ({}) ORDER BY timestamp DESC, id DESC",
        clause
    );
    let patterns: Vec<String> = urls.iter().map(|u| json_value_pattern(u)).collect();

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(patterns.iter()))?;
    while let Some(row) = rows.next()? {
        let links = parse_links(row.get(1)?);
        if links.values().any(|existing| urls.contains(&existing.as_str())) {
            return Ok(Some(row.get(0)?));
        }
    }
    Ok(None)
}

fn insert_on(
    conn: &Connection,
    record: &ParsedMessage,
    timestamp: &DateTime<FixedOffset>,
    created_at: &DateTime<FixedOffset>,
) -> SqliteResult<i64> {
    let links = serde_json::to_string(&record.links).map_err(to_sql_failure)?;
    let tags = serde_json::to_string(&record.tags).map_err(to_sql_failure)?;
    conn.execute(
        "INSERT INTO messages (timestamp, title, description, links, tags, source, channel, group_name, bot, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            timestamp.to_rfc3339(),
            record.title,
            record.description,
            links,
            tags,
            record.source,
            record.channel,
            record.group_name,
            record.bot,
            created_at.to_rfc3339(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn overwrite_on(
    conn: &Connection,
    id: i64,
    record: &ParsedMessage,
    timestamp: &DateTime<FixedOffset>,
) -> SqliteResult<()> {
    let links = serde_json::to_string(&record.links).map_err(to_sql_failure)?;
    let tags = serde_json::to_string(&record.tags).map_err(to_sql_failure)?;
    conn.execute(
        "UPDATE messages SET timestamp = ?1, title = ?2, description = ?3, links = ?4, tags = ?5,
             source = ?6, channel = ?7, group_name = ?8, bot = ?9
         WHERE id = ?10",
        params![
            timestamp.to_rfc3339(),
            record.title,
            record.description,
            links,
            tags,
            record.source,
            record.channel,
            record.group_name,
            record.bot,
            id,
        ],
    )?;
    Ok(())
}

/// Link-overlap upsert on an open connection or transaction.
/// The caller owns the transaction boundary.
pub(crate) fn upsert_on(
    conn: &Connection,
    record: &ParsedMessage,
    timestamp: &DateTime<FixedOffset>,
    policy: UpsertPolicy,
) -> SqliteResult<UpsertOutcome> {
    if !record.has_links() {
        return match policy {
            UpsertPolicy::RequireLinks => Ok(UpsertOutcome::Skipped),
            UpsertPolicy::AllowLinkless => {
                insert_on(conn, record, timestamp, &clock::now()).map(UpsertOutcome::Inserted)
            }
        };
    }

    let urls: Vec<&str> = record.link_urls().collect();
    match find_overlapping(conn, &urls)? {
        Some(id) => {
            overwrite_on(conn, id, record, timestamp)?;
            Ok(UpsertOutcome::Updated(id))
        }
        None => insert_on(conn, record, timestamp, &clock::now()).map(UpsertOutcome::Inserted),
    }
}

impl Database {
    /// Upsert one record in its own write transaction
    pub fn upsert_message(
        &self,
        record: &ParsedMessage,
        timestamp: &DateTime<FixedOffset>,
        policy: UpsertPolicy,
    ) -> SqliteResult<UpsertOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = upsert_on(&tx, record, timestamp, policy)?;
        tx.commit()?;
        Ok(outcome)
    }

    pub fn get_message(&self, id: i64) -> SqliteResult<Option<StoredMessage>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS))?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_message(row)?)),
            None => Ok(None),
        }
    }

    pub fn delete_message(&self, id: i64) -> SqliteResult<bool> {
        let conn = self.conn.lock();
        let rows_affected = conn.execute("DELETE FROM messages WHERE id = ?1", [id])?;
        Ok(rows_affected > 0)
    }

    /// Newest-first page of messages plus the total matching count
    pub fn list_messages(&self, query: &MessageQuery) -> SqliteResult<(Vec<StoredMessage>, i64)> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<String> = Vec::new();

        if let Some(q) = query.q.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            values.push(format!("%{}%", escape_like(q)));
            let n = values.len();
            clauses.push(format!(
                "(title LIKE ?{n} ESCAPE '\\' OR description LIKE ?{n} ESCAPE '\\')"
            ));
        }
        if let Some(provider) = query.provider.as_deref().filter(|s| !s.is_empty()) {
            let key = serde_json::Value::String(provider.to_string()).to_string();
            values.push(format!("%{}:%", escape_like(&key)));
            clauses.push(format!("links LIKE ?{} ESCAPE '\\'", values.len()));
        }
        if let Some(tag) = query.tag.as_deref().filter(|s| !s.is_empty()) {
            values.push(json_value_pattern(tag));
            clauses.push(format!("tags LIKE ?{} ESCAPE '\\'", values.len()));
        }
        if let Some(channel) = query.channel.as_deref().filter(|s| !s.is_empty()) {
            values.push(channel.to_string());
            clauses.push(format!("channel = ?{}", values.len()));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let conn = self.conn.lock();
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM messages {}", where_sql),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {} FROM messages {} ORDER BY timestamp DESC, id DESC LIMIT {} OFFSET {}",
            MESSAGE_COLUMNS,
            where_sql,
            query.page_size(),
            query.offset()
        );
        let mut stmt = conn.prepare(&sql)?;
        let messages = stmt
            .query_map(params_from_iter(values.iter()), row_to_message)?
            .filter_map(|r| r.ok())
            .collect();

        Ok((messages, total))
    }

    pub fn count_messages(&self) -> SqliteResult<i64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
    }

    pub fn message_stats(&self, top_tags: usize) -> SqliteResult<MessageStats> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT links, tags FROM messages")?;
        let mut rows = stmt.query([])?;

        let mut stats = MessageStats::default();
        let mut tag_counts: HashMap<String, i64> = HashMap::new();
        while let Some(row) = rows.next()? {
            stats.total += 1;
            for provider in parse_links(row.get(0)?).into_keys() {
                *stats.by_provider.entry(provider).or_default() += 1;
            }
            let tags: Vec<String> = row
                .get::<_, Option<String>>(1)?
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default();
            for tag in tags {
                *tag_counts.entry(tag).or_default() += 1;
            }
        }

        let mut tags: Vec<(String, i64)> = tag_counts.into_iter().collect();
        tags.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        tags.truncate(top_tags);
        stats.top_tags = tags;
        Ok(stats)
    }

    /// Keep only the newest row for every link URL; returns rows deleted
    pub fn dedup_links(&self) -> SqliteResult<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let doomed: Vec<i64> = {
            let mut stmt = tx.prepare(
                "SELECT id, links FROM messages WHERE links IS NOT NULL ORDER BY timestamp DESC, id DESC",
            )?;
            let mut rows = stmt.query([])?;
            let mut seen: HashSet<String> = HashSet::new();
            let mut doomed = Vec::new();
            while let Some(row) = rows.next()? {
                let id: i64 = row.get(0)?;
                let mut duplicate = false;
                for url in parse_links(row.get(1)?).into_values() {
                    if !seen.insert(url) {
                        duplicate = true;
                    }
                }
                if duplicate {
                    doomed.push(id);
                }
            }
            doomed
        };

        for chunk in doomed.chunks(DELETE_CHUNK) {
            let placeholders = (1..=chunk.len())
                .map(|i| format!("?{}", i))
                .collect::<Vec<_>>()
                .join(", ");
            tx.execute(
                &format!("DELETE FROM messages WHERE id IN ({})", placeholders),
                params_from_iter(chunk.iter()),
            )?;
        }
        tx.commit()?;
        Ok(doomed.len())
    }
}
