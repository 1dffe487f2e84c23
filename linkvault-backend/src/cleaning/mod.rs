//! Cleaning of raw channel exports into storable rows
//!
//! Input lines are NDJSON objects or plain text. A line is dropped outright
//! when it contains a noise keyword or has no strict share link. Telegram
//! links and `@handles` are removed from the text; the first `t.me` user
//! name becomes the channel unless the line names one itself.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::clock;
use crate::db::Database;
use crate::importer::{lossy_lines, ExportLine};
use crate::models::{IngestStats, LinkMap, ParsedMessage, UpsertOutcome};
use crate::parser::{MessageParser, StrictExtractor, TITLE_MAX_CHARS};
use crate::store::SeenLinks;

pub const CLEAN_SOURCE: &str = "cleaned_export";

pub const DEFAULT_NOISE_KEYWORDS: &[&str] = &[
    "频道",
    "搜索结果",
    "夸克频道",
    "群组",
    "投稿/搜索",
    "来自：[雷锋]",
    "投稿",
];

static TG_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://t\.me/([^\s/?#]+)[^\s]*").expect("t.me pattern"));

static TG_CHANNEL_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://t\.me/([A-Za-z0-9_]+)").expect("t.me channel pattern"));

static USERNAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]{3,}$").expect("username pattern"));

static AT_HANDLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@[A-Za-z0-9_]{3,}\s*").expect("handle pattern"));

/// One cleaned row, in the stored message shape
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanedRow {
    pub timestamp: String,
    pub title: String,
    pub description: String,
    pub links: LinkMap,
    pub tags: Vec<String>,
    pub source: String,
    pub channel: String,
    pub group_name: String,
    pub bot: String,
    pub created_at: String,
}

fn optional(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

impl CleanedRow {
    pub fn to_record(&self) -> ParsedMessage {
        ParsedMessage {
            title: self.title.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
            links: self.links.clone(),
            source: optional(&self.source),
            channel: optional(&self.channel),
            group_name: optional(&self.group_name),
            bot: optional(&self.bot),
        }
    }

    pub fn link_urls(&self) -> impl Iterator<Item = &str> {
        self.links.values().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanSkip {
    Empty,
    Noise,
    NoLinks,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanReport {
    pub stats: IngestStats,
    pub noise: u64,
    pub no_links: u64,
    pub rows_written: u64,
}

impl CleanReport {
    fn skip(&mut self, reason: CleanSkip) {
        match reason {
            CleanSkip::Empty => return,
            CleanSkip::Noise => self.noise += 1,
            CleanSkip::NoLinks => self.no_links += 1,
        }
        self.stats.skipped += 1;
    }

    pub fn log_summary(&self, label: &str) {
        log::info!(
            "[clean] {}: {} lines, {} kept, {} noise, {} without links, {} duplicates, {} inserted, {} updated, {} failed",
            label,
            self.stats.processed,
            self.rows_written,
            self.noise,
            self.no_links,
            self.stats.duplicates,
            self.stats.inserted,
            self.stats.updated,
            self.stats.failed
        );
    }
}

/// `https://t.me/<name>` from a URL, `@name` or bare name
fn channel_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.starts_with("http://t.me/") || raw.starts_with("https://t.me/") {
        return TG_CHANNEL_URL
            .captures(raw)
            .map(|caps| format!("https://t.me/{}", &caps[1]));
    }
    let name = raw.strip_prefix('@').unwrap_or(raw);
    USERNAME.is_match(name).then(|| format!("https://t.me/{}", name))
}

/// First public user name among the text's `t.me` links; invite links are skipped
fn detect_channel(text: &str) -> Option<String> {
    TG_LINK
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .find(|name| !name.starts_with('+') && USERNAME.is_match(name))
}

fn strip_handles(text: &str) -> String {
    AT_HANDLE.replace_all(text, "").into_owned()
}

/// Expand glob patterns; a pattern with no match is kept as a literal path
pub fn expand_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for pattern in patterns {
        let matched: Vec<PathBuf> = match glob::glob(pattern) {
            Ok(entries) => entries.filter_map(Result::ok).collect(),
            Err(e) => {
                log::warn!("[clean] Bad glob pattern '{}': {}", pattern, e);
                Vec::new()
            }
        };
        if matched.is_empty() {
            paths.push(PathBuf::from(pattern));
        } else {
            paths.extend(matched);
        }
    }
    paths
}

pub fn write_rows<'a, W: Write + ?Sized>(rows: impl IntoIterator<Item = &'a CleanedRow>, out: &mut W) -> io::Result<u64> {
    let mut written = 0;
    for row in rows {
        serde_json::to_writer(&mut *out, row)?;
        out.write_all(b"\n")?;
        written += 1;
    }
    Ok(written)
}

pub struct Cleaner {
    parser: Arc<MessageParser>,
    strict: StrictExtractor,
    noise_keywords: Vec<String>,
}

impl Cleaner {
    pub fn new(parser: Arc<MessageParser>) -> Self {
        let strict = StrictExtractor::new(parser.catalog().clone());
        Self {
            parser,
            strict,
            noise_keywords: DEFAULT_NOISE_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn with_noise_keywords(mut self, keywords: Vec<String>) -> Self {
        self.noise_keywords = keywords.into_iter().filter(|k| !k.is_empty()).collect();
        self
    }

    pub fn clean_line(&self, raw: &str) -> Result<CleanedRow, CleanSkip> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(CleanSkip::Empty);
        }
        if self.noise_keywords.iter().any(|k| raw.contains(k.as_str())) {
            return Err(CleanSkip::Noise);
        }

        let export = raw
            .starts_with('{')
            .then(|| ExportLine::from_json(raw).ok())
            .flatten();
        let (text, export) = match export {
            Some(export) => (export.body(), export),
            None => (raw.to_string(), ExportLine::default()),
        };

        let channel = export
            .raw_channel()
            .as_deref()
            .and_then(channel_url)
            .or_else(|| detect_channel(&text).as_deref().and_then(channel_url))
            .unwrap_or_default();

        let text = strip_handles(&TG_LINK.replace_all(&text, ""));
        let links = self.strict.from_text(&text);
        if links.is_empty() {
            return Err(CleanSkip::NoLinks);
        }

        let parsed = self.parser.parse(&text);
        let mut tags: Vec<String> = Vec::new();
        for tag in export.tags.iter().flatten().chain(parsed.tags.iter()) {
            let tag = strip_handles(tag).trim().trim_start_matches('#').to_string();
            if !tag.is_empty() && !tags.contains(&tag) {
                tags.push(tag);
            }
        }

        let mut title = parsed.title;
        if title.is_empty() {
            if let Some(fallback) = export.title.as_deref() {
                title = strip_handles(fallback).trim().chars().take(TITLE_MAX_CHARS).collect();
            }
        }

        Ok(CleanedRow {
            timestamp: clock::format_plain(&clock::parse_loose(export.raw_timestamp())),
            title,
            description: parsed.description,
            links,
            tags,
            source: CLEAN_SOURCE.to_string(),
            channel,
            group_name: String::new(),
            bot: String::new(),
            created_at: clock::format_plain(&clock::now()),
        })
    }

    /// Every `interval`-th line across `inputs`, shifting the offset by one
    /// per pass until `limit` rows are collected or all offsets are used.
    pub fn sample(&self, inputs: &[PathBuf], interval: usize, limit: usize) -> io::Result<Vec<CleanedRow>> {
        let interval = interval.max(1);
        let mut rows = Vec::new();

        'offsets: for offset in 0..interval {
            for path in inputs {
                if rows.len() >= limit {
                    break 'offsets;
                }
                let file = match File::open(path) {
                    Ok(f) => f,
                    Err(e) => {
                        log::warn!("[clean] Skipping {:?}: {}", path, e);
                        continue;
                    }
                };
                let mut picked = 0;
                for (idx, line) in lossy_lines(BufReader::new(file)).enumerate() {
                    if rows.len() >= limit {
                        break;
                    }
                    if (idx + 1) % interval != offset {
                        continue;
                    }
                    if let Ok(row) = self.clean_line(&line?) {
                        rows.push(row);
                        picked += 1;
                    }
                }
                if picked > 0 {
                    log::info!("[clean] {:?} @offset {}: {} rows", path, offset, picked);
                }
            }
        }
        Ok(rows)
    }

    /// Clean one stream into NDJSON. With `seen`, a row sharing any link
    /// with an earlier row is dropped.
    pub fn clean_into<R: BufRead, W: Write>(
        &self,
        reader: R,
        out: &mut W,
        mut seen: Option<&mut SeenLinks>,
        report: &mut CleanReport,
    ) -> io::Result<()> {
        for line in lossy_lines(reader) {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            report.stats.processed += 1;
            let row = match self.clean_line(&line) {
                Ok(row) => row,
                Err(reason) => {
                    report.skip(reason);
                    continue;
                }
            };
            if let Some(seen) = seen.as_deref_mut() {
                if !seen.admit(row.link_urls()) {
                    report.stats.duplicates += 1;
                    continue;
                }
            }
            report.rows_written += write_rows([&row], out)?;
        }
        Ok(())
    }

    /// Full clean without touching the database
    pub fn clean_only<W: Write>(&self, inputs: &[PathBuf], out: &mut W, dedup: bool) -> io::Result<CleanReport> {
        let mut report = CleanReport::default();
        let mut seen = SeenLinks::new();
        for path in inputs {
            let file = File::open(path).map_err(|e| io::Error::new(e.kind(), format!("{:?}: {}", path, e)))?;
            log::info!("[clean] Cleaning {:?}", path);
            self.clean_into(BufReader::new(file), out, dedup.then_some(&mut seen), &mut report)?;
        }
        out.flush()?;
        report.log_summary("clean-only");
        Ok(report)
    }

    /// Full clean with batched link-identity upserts. Written rows are
    /// optionally copied to `copy` as NDJSON.
    pub fn clean_and_upsert(
        &self,
        inputs: &[PathBuf],
        db: &Database,
        commit_every: usize,
        mut copy: Option<&mut dyn Write>,
    ) -> Result<CleanReport, String> {
        let mut report = CleanReport::default();
        let mut batch = db.batch_writer(commit_every);

        for path in inputs {
            let file = File::open(path).map_err(|e| format!("{:?}: {}", path, e))?;
            log::info!("[clean] Cleaning and upserting {:?}", path);
            for line in lossy_lines(BufReader::new(file)) {
                let line = line.map_err(|e| format!("{:?}: {}", path, e))?;
                if line.trim().is_empty() {
                    continue;
                }
                report.stats.processed += 1;
                let row = match self.clean_line(&line) {
                    Ok(row) => row,
                    Err(reason) => {
                        report.skip(reason);
                        continue;
                    }
                };

                let timestamp = clock::parse_loose(Some(&row.timestamp));
                match batch.upsert(&row.to_record(), &timestamp) {
                    Ok(UpsertOutcome::Skipped) => report.stats.skipped += 1,
                    Ok(outcome) => {
                        report.stats.record(outcome);
                        if let Some(out) = copy.as_deref_mut() {
                            report.rows_written += write_rows([&row], out).map_err(|e| e.to_string())?;
                        }
                    }
                    Err(e) => {
                        log::error!("[clean] Upsert failed for '{}': {}", row.title, e);
                        report.stats.failed += 1;
                    }
                }
            }
        }

        batch.finish().map_err(|e| format!("final commit failed: {}", e))?;
        report.log_summary("clean-upsert");
        Ok(report)
    }
}

/// Load cleaned NDJSON rows into the store with batched link-identity
/// upserts. Stops after `limit` written rows when given. Rows read before
/// an I/O error are committed before the error is returned.
pub fn load_cleaned<R: BufRead>(
    reader: R,
    db: &Database,
    commit_every: usize,
    limit: Option<u64>,
) -> Result<IngestStats, String> {
    let mut stats = IngestStats::default();
    let mut batch = db.batch_writer(commit_every);
    let mut read_error = None;

    for (idx, line) in lossy_lines(reader).enumerate() {
        if limit.is_some_and(|n| stats.written() >= n) {
            break;
        }
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

        let row: CleanedRow = match serde_json::from_str(&line) {
            Ok(row) => row,
            Err(e) => {
                log::warn!("[load] Line {}: not a cleaned row ({})", idx + 1, e);
                stats.skipped += 1;
                continue;
            }
        };
        let mut record = row.to_record();
        if record.source.is_none() {
            record.source = Some(CLEAN_SOURCE.to_string());
        }
        let timestamp = clock::parse_loose(Some(&row.timestamp));
        match batch.upsert(&record, &timestamp) {
            Ok(UpsertOutcome::Skipped) => stats.skipped += 1,
            Ok(outcome) => stats.record(outcome),
            Err(e) => {
                log::error!("[load] Line {} failed: {}", idx + 1, e);
                stats.failed += 1;
            }
        }
    }

    batch.finish().map_err(|e| format!("final commit failed: {}", e))?;
    if let Some(e) = read_error {
        return Err(e);
    }
    log::info!(
        "[load] Done: {} rows, {} inserted, {} updated, {} skipped, {} failed",
        stats.processed,
        stats.inserted,
        stats.updated,
        stats.skipped,
        stats.failed
    );
    Ok(stats)
}

/// Open the output file for NDJSON rows, creating parent directories
pub fn create_output(path: &Path) -> io::Result<io::BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(io::BufWriter::new(File::create(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provider;
    use crate::providers::ProviderCatalog;
    use std::io::Cursor;

    fn cleaner() -> Cleaner {
        Cleaner::new(Arc::new(MessageParser::new(Arc::new(ProviderCatalog::defaults()))))
    }

    #[test]
    fn test_channel_url_forms() {
        assert_eq!(channel_url("@movies_hd").as_deref(), Some("https://t.me/movies_hd"));
        assert_eq!(channel_url("https://t.me/movies_hd/123").as_deref(), Some("https://t.me/movies_hd"));
        assert_eq!(channel_url("ab"), None);
        assert_eq!(detect_channel("加入 https://t.me/+AbCdEf 或 https://t.me/share_hub/9"), Some("share_hub".to_string()));
    }

    #[test]
    fn test_clean_line_plain_text() {
        let row = cleaner()
            .clean_line("电影C #科幻 https://t.me/share_hub/77 @uploader https://pan.quark.cn/s/c3")
            .unwrap();
        assert_eq!(row.channel, "https://t.me/share_hub");
        assert_eq!(row.links.get(&Provider::Quark).map(String::as_str), Some("https://pan.quark.cn/s/c3"));
        assert_eq!(row.tags, vec!["科幻"]);
        assert!(!row.title.contains("t.me"));
        assert!(!row.title.contains("@uploader"));
        assert_eq!(row.source, CLEAN_SOURCE);
    }

    #[test]
    fn test_clean_line_json_and_drops() {
        let c = cleaner();
        let row = c
            .clean_line(r#"{"text":"剧集D\nhttps://pan.baidu.com/s/1dd","tags":["美剧"],"date":"2024-03-01T00:00:00Z","channel":"@series_box"}"#)
            .unwrap();
        assert_eq!(row.timestamp, "2024-03-01 08:00:00");
        assert_eq!(row.channel, "https://t.me/series_box");
        assert_eq!(row.tags, vec!["美剧"]);

        assert_eq!(c.clean_line("投稿 https://pan.quark.cn/s/x1").unwrap_err(), CleanSkip::Noise);
        assert_eq!(c.clean_line("资源 https://pan.quark.cn/file/x1").unwrap_err(), CleanSkip::NoLinks);
        assert_eq!(c.clean_line("   ").unwrap_err(), CleanSkip::Empty);
    }

    #[test]
    fn test_clean_only_dedups_identical_links() {
        let input = [
            r#"{"text":"电影E\nhttps://pan.quark.cn/s/e5"}"#,
            r#"{"text":"电影E 重发\nhttps://pan.quark.cn/s/e5"}"#,
        ]
        .join("\n");
        let mut out = Vec::new();
        let mut seen = SeenLinks::new();
        let mut report = CleanReport::default();
        cleaner()
            .clean_into(Cursor::new(input), &mut out, Some(&mut seen), &mut report)
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert_eq!(report.rows_written, 1);
        assert_eq!(report.stats.duplicates, 1);
        let row: CleanedRow = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(row.title, "电影E");
    }

    #[test]
    fn test_sample_rotates_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.txt");
        let lines: Vec<String> = (1..=6).map(|i| format!("资源{} https://pan.quark.cn/s/s{}", i, i)).collect();
        std::fs::write(&path, lines.join("\n")).unwrap();

        let rows = cleaner().sample(&[path], 3, 4).unwrap();
        let titles: Vec<_> = rows.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["资源3", "资源6", "资源1", "资源4"]);
    }

    #[test]
    fn test_clean_and_upsert_with_copy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.txt");
        std::fs::write(
            &path,
            "甲 https://pan.quark.cn/s/u1\n甲更新 https://pan.quark.cn/s/u1\n无链接\n",
        )
        .unwrap();
        let db = Database::new(":memory:").unwrap();
        let mut copy = Vec::new();
        let report = cleaner()
            .clean_and_upsert(&[path], &db, 10, Some(&mut copy))
            .unwrap();
        assert_eq!(report.stats.inserted, 1);
        assert_eq!(report.stats.updated, 1);
        assert_eq!(report.no_links, 1);
        assert_eq!(report.rows_written, 2);
        assert_eq!(db.count_messages().unwrap(), 1);
        let (rows, _) = db.list_messages(&Default::default()).unwrap();
        assert_eq!(rows[0].source.as_deref(), Some(CLEAN_SOURCE));
    }

    #[test]
    fn test_clean_only_output_loads_into_store() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("export.txt");
        std::fs::write(
            &raw,
            [
                r#"{"text":"电影H\nhttps://pan.quark.cn/s/h8","date":"2024-06-01T00:00:00Z","channel":"@movie_box"}"#,
                r#"{"text":"电影H 重发\nhttps://pan.quark.cn/s/h8"}"#,
                "剧集I https://pan.baidu.com/s/1i9",
                "没有链接",
            ]
            .join("\n"),
        )
        .unwrap();

        let mut cleaned = Vec::new();
        let report = cleaner().clean_only(&[raw], &mut cleaned, true).unwrap();
        assert_eq!(report.rows_written, 2);

        let db = Database::new(":memory:").unwrap();
        let stats = load_cleaned(Cursor::new(cleaned), &db, 1, None).unwrap();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.inserted, 2);
        assert_eq!(db.count_messages().unwrap(), 2);

        let (rows, _) = db.list_messages(&Default::default()).unwrap();
        let movie = rows.iter().find(|r| r.title == "电影H").unwrap();
        assert_eq!(movie.channel.as_deref(), Some("https://t.me/movie_box"));
        assert_eq!(movie.source.as_deref(), Some(CLEAN_SOURCE));
        assert_eq!(clock::format_plain(&movie.timestamp), "2024-06-01 08:00:00");
    }

    #[test]
    fn test_load_cleaned_limit_and_bad_lines() {
        let input = [
            r#"{"title":"甲","links":{"quark":"https://pan.quark.cn/s/l1"}}"#,
            "not json",
            r#"{"title":"无链接","links":{}}"#,
            r#"{"title":"乙","links":{"baidu":"https://pan.baidu.com/s/1l2"}}"#,
            r#"{"title":"丙","links":{"quark":"https://pan.quark.cn/s/l3"}}"#,
        ]
        .join("\n");
        let db = Database::new(":memory:").unwrap();
        let stats = load_cleaned(Cursor::new(input), &db, 500, Some(2)).unwrap();
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.skipped, 2);
        assert_eq!(db.count_messages().unwrap(), 2);
    }
}
