//! Provider catalog loaded from RON
//!
//! Each entry carries the heuristic keywords used to label loosely formatted
//! links, the strict share-URL grammars used to accept links from rich
//! annotations, and the display names that appear as residue in post text.

use regex::Regex;
use serde::Deserialize;
use std::path::Path;

use crate::models::Provider;

/// One catalog entry as written in `providers.ron`
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEntry {
    /// Storage key, e.g. "quark" or "115"
    pub provider: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub display_names: Vec<String>,
}

#[derive(Debug)]
struct CatalogEntry {
    provider: Provider,
    keywords: Vec<String>,
    grammars: Vec<Regex>,
    display_names: Vec<String>,
}

/// A strict grammar hit inside a larger text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrictMatch {
    pub provider: Provider,
    pub url: String,
    pub start: usize,
}

#[derive(Debug)]
pub struct ProviderCatalog {
    entries: Vec<CatalogEntry>,
}

impl ProviderCatalog {
    /// Build a catalog; entries are ordered by provider priority regardless of
    /// their order in the input.
    pub fn from_entries(raw: Vec<ProviderEntry>) -> Result<Self, String> {
        let mut entries = Vec::with_capacity(raw.len());
        for entry in raw {
            let provider = Provider::from_name(&entry.provider)
                .ok_or_else(|| format!("unknown provider '{}'", entry.provider))?;
            let grammars = entry
                .patterns
                .iter()
                .map(|p| Regex::new(p).map_err(|e| format!("bad pattern for {}: {}", provider, e)))
                .collect::<Result<Vec<_>, _>>()?;
            let mut display_names = entry.display_names;
            // Longest first so "百度网盘" is removed before "百度"
            display_names.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
            entries.push(CatalogEntry {
                provider,
                keywords: entry.keywords.iter().map(|k| k.to_lowercase()).collect(),
                grammars,
                display_names,
            });
        }
        entries.sort_by_key(|e| e.provider);
        Ok(Self { entries })
    }

    /// Load `providers.ron` from the config directory, falling back to the
    /// built-in table when the file is missing or invalid.
    pub fn load(config_dir: &Path) -> Self {
        let path = config_dir.join("providers.ron");
        if !path.exists() {
            log::warn!("[providers] Catalog file not found: {:?}, using defaults", path);
            return Self::defaults();
        }

        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => match ron::from_str::<Vec<ProviderEntry>>(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    log::error!("[providers] Failed to parse catalog: {}", e);
                    return Self::defaults();
                }
            },
            Err(e) => {
                log::error!("[providers] Failed to read catalog file: {}", e);
                return Self::defaults();
            }
        };

        match Self::from_entries(entries) {
            Ok(catalog) => {
                log::info!("[providers] Loaded {} providers from {:?}", catalog.len(), path);
                catalog
            }
            Err(e) => {
                log::error!("[providers] Invalid catalog: {}", e);
                Self::defaults()
            }
        }
    }

    pub fn defaults() -> Self {
        match Self::from_entries(default_entries()) {
            Ok(catalog) => catalog,
            Err(e) => {
                // Only reachable if the built-in table is edited badly
                log::error!("[providers] Built-in catalog rejected: {}", e);
                Self { entries: Vec::new() }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Heuristic labelling. Evidence in the URL itself is checked for every
    /// provider before the surrounding context is consulted.
    pub fn classify(&self, url: &str, context: &str) -> Provider {
        let url = url.to_lowercase();
        if let Some(entry) = self
            .entries
            .iter()
            .find(|e| e.keywords.iter().any(|k| url.contains(k.as_str())))
        {
            return entry.provider;
        }

        let context = context.to_lowercase();
        self.entries
            .iter()
            .find(|e| e.keywords.iter().any(|k| context.contains(k.as_str())))
            .map(|e| e.provider)
            .unwrap_or(Provider::Other)
    }

    /// First strict grammar that matches anywhere in `candidate`
    pub fn match_strict(&self, candidate: &str) -> Option<(Provider, String)> {
        self.entries.iter().find_map(|entry| {
            entry
                .grammars
                .iter()
                .find_map(|g| g.find(candidate))
                .map(|m| (entry.provider, m.as_str().to_string()))
        })
    }

    /// Every strict grammar hit in `text`, ordered by position
    pub fn find_strict(&self, text: &str) -> Vec<StrictMatch> {
        let mut matches: Vec<StrictMatch> = self
            .entries
            .iter()
            .flat_map(|entry| {
                entry.grammars.iter().flat_map(move |g| {
                    g.find_iter(text).map(move |m| StrictMatch {
                        provider: entry.provider,
                        url: m.as_str().to_string(),
                        start: m.start(),
                    })
                })
            })
            .collect();
        matches.sort_by_key(|m| (m.start, m.provider));
        matches
    }

    /// All display names, longest first
    pub fn display_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .entries
            .iter()
            .flat_map(|e| e.display_names.iter().map(String::as_str))
            .collect();
        names.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
        names
    }

    pub fn providers(&self) -> impl Iterator<Item = Provider> + '_ {
        self.entries.iter().map(|e| e.provider)
    }
}

fn entry(provider: &str, keywords: &[&str], patterns: &[&str], display_names: &[&str]) -> ProviderEntry {
    let owned = |items: &[&str]| -> Vec<String> { items.iter().map(|s| s.to_string()).collect() };
    ProviderEntry {
        provider: provider.to_string(),
        keywords: owned(keywords),
        patterns: owned(patterns),
        display_names: owned(display_names),
    }
}

/// Built-in table, mirrored by `config/providers.ron`
fn default_entries() -> Vec<ProviderEntry> {
    vec![
        entry(
            "quark",
            &["quark", "夸克"],
            &[r"https://pan\.quark\.cn/s/[A-Za-z0-9_-]+"],
            &["夸克网盘", "夸克云盘", "夸克"],
        ),
        entry(
            "aliyun",
            &["aliyundrive", "alipan", "aliyun", "阿里"],
            &[
                r"https://www\.aliyundrive\.com/s/[A-Za-z0-9_-]+",
                r"https://www\.alipan\.com/s/[A-Za-z0-9_-]+",
            ],
            &["阿里云盘", "阿里网盘", "阿里"],
        ),
        entry(
            "baidu",
            &["pan.baidu", "baidu", "百度"],
            &[r"https://pan\.baidu\.com/s/[A-Za-z0-9_-]+(?:\?pwd=[A-Za-z0-9]+)?"],
            &["百度网盘", "百度云盘", "百度云", "百度"],
        ),
        entry(
            "115",
            &["115.com", "115cdn", "115网盘", "115pan"],
            &[r"https://115(?:cdn)?\.com/s/[A-Za-z0-9_-]+(?:\?password=[A-Za-z0-9]+)?"],
            &["115网盘", "115云盘"],
        ),
        entry(
            "xunlei",
            &["xunlei", "thunder", "迅雷"],
            &[r"https://pan\.xunlei\.com/s/[A-Za-z0-9_-]+(?:\?pwd=[A-Za-z0-9]+)?#?"],
            &["迅雷网盘", "迅雷云盘", "迅雷"],
        ),
        entry(
            "uc",
            &["drive.uc.cn", "ucdisk", "uc网盘", "ucloud"],
            &[r"https://drive\.uc\.cn/s/[A-Za-z0-9]+(?:\?public=1)?"],
            &["UC网盘", "UC云盘", "uc网盘"],
        ),
        entry(
            "123pan",
            &["123pan", "123684", "123865", "123912", "123网盘", "123云盘"],
            &[
                r"https://www\.123pan\.com/s/[A-Za-z0-9_-]+(?:\?pwd=[A-Za-z0-9]+)?",
                r"https://www\.123684\.com/s/[A-Za-z0-9_-]+(?:\?pwd=[A-Za-z0-9]+)?",
                r"https://www\.123865\.com/s/[A-Za-z0-9_-]+(?:\?pwd=[A-Za-z0-9]+)?",
                r"https://www\.123912\.com/s/[A-Za-z0-9_-]+(?:\?pwd=[A-Za-z0-9]+)?",
            ],
            &["123云盘", "123网盘"],
        ),
        entry(
            "tianyi",
            &["cloud.189", "189.cn", "天翼"],
            &[r"https://cloud\.189\.cn/t/[A-Za-z0-9]+"],
            &["天翼云盘", "天翼"],
        ),
        entry(
            "caiyun",
            &["caiyun", "139.com", "移动云盘", "和彩云"],
            &[r"https://caiyun\.139\.com/w/i/[A-Za-z0-9]+"],
            &["移动云盘", "和彩云"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_ordered_by_priority() {
        let catalog = ProviderCatalog::defaults();
        let order: Vec<Provider> = catalog.providers().collect();
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(order, sorted);
        assert_eq!(catalog.len(), 9);
    }

    #[test]
    fn test_classify_prefers_url_evidence() {
        let catalog = ProviderCatalog::defaults();
        assert_eq!(
            catalog.classify("https://pan.baidu.com/s/1abc", "阿里云盘也有"),
            Provider::Baidu
        );
        assert_eq!(catalog.classify("https://x.example/abc", "夸克"), Provider::Quark);
        assert_eq!(catalog.classify("https://x.example/abc", ""), Provider::Other);
    }

    #[test]
    fn test_classify_priority_on_ambiguous_context() {
        let catalog = ProviderCatalog::defaults();
        assert_eq!(catalog.classify("https://x.example/a", "百度 夸克"), Provider::Quark);
    }

    #[test]
    fn test_strict_quark_accepts_share_and_rejects_other_paths() {
        let catalog = ProviderCatalog::defaults();
        assert_eq!(
            catalog.match_strict("https://pan.quark.cn/s/AbC123"),
            Some((Provider::Quark, "https://pan.quark.cn/s/AbC123".to_string()))
        );
        assert_eq!(catalog.match_strict("https://pan.quark.cn/file/AbC123"), None);
    }

    #[test]
    fn test_strict_keeps_password_suffix() {
        let catalog = ProviderCatalog::defaults();
        let (provider, url) = catalog
            .match_strict("see https://pan.baidu.com/s/1xYz_9?pwd=ab12 now")
            .unwrap();
        assert_eq!(provider, Provider::Baidu);
        assert_eq!(url, "https://pan.baidu.com/s/1xYz_9?pwd=ab12");
    }

    #[test]
    fn test_find_strict_orders_by_position() {
        let catalog = ProviderCatalog::defaults();
        let text = "a https://cloud.189.cn/t/xyz b https://pan.quark.cn/s/q1";
        let hits = catalog.find_strict(text);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].provider, Provider::Tianyi);
        assert_eq!(hits[1].provider, Provider::Quark);
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        let err = ProviderCatalog::from_entries(vec![entry("dropbox", &[], &[], &[])]).unwrap_err();
        assert!(err.contains("dropbox"));
    }

    #[test]
    fn test_load_reads_ron_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("providers.ron"),
            r#"[
                (
                    provider: "quark",
                    keywords: ["quark"],
                    patterns: ["https://pan\\.quark\\.cn/s/[A-Za-z0-9]+"],
                ),
            ]"#,
        )
        .unwrap();
        let catalog = ProviderCatalog::load(dir.path());
        assert_eq!(catalog.len(), 1);
        assert!(catalog.display_names().is_empty());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(ProviderCatalog::load(dir.path()).len(), 9);
    }
}
