//! Free-text post parsing
//!
//! Turns a raw post into a `ParsedMessage`: provenance is cut from
//! signature lines, labelled fields are read, loose links and hashtags are
//! lifted out of the narrative, and what is left becomes title and
//! description.

pub mod fields;
pub mod noise;
pub mod redirect;
pub mod strict;

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

use crate::models::{LinkMap, ParsedMessage};
use crate::providers::ProviderCatalog;
use fields::{scan_line, split_tag_value, FieldLabel};
use noise::{strip_noise, SignatureKind};

pub use redirect::{HttpRedirectResolver, RedirectResolver};
pub use strict::{RichAnnotations, StrictExtractor};

pub const TITLE_MAX_CHARS: usize = 200;
pub const DESCRIPTION_MAX_CHARS: usize = 1000;
pub const TAG_MAX_CHARS: usize = 20;

/// URL characters stop at whitespace, quotes and full-width punctuation
const URL_BODY: &str = r#"https?://[^\s<>"'，。；！？、）】」》（【「《]+"#;

static KEY_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"([\p{{Han}}A-Za-z0-9#]+)[ \t]*[：:][ \t]*({})", URL_BODY))
        .expect("key-url pattern")
});

static BARE_URL: Lazy<Regex> = Lazy::new(|| Regex::new(URL_BODY).expect("url pattern"));

static HASHTAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#([\p{Han}A-Za-z0-9_]+)").expect("hashtag pattern"));

static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").expect("spaces pattern"));

fn trim_url(url: &str) -> &str {
    url.trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | ')' | ']' | '}'))
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}

/// Order-preserving, duplicate-free tag list
#[derive(Debug, Default)]
struct TagSet(Vec<String>);

impl TagSet {
    fn push(&mut self, tag: &str) {
        let tag = tag.trim();
        if tag.is_empty() || tag.chars().count() > TAG_MAX_CHARS {
            return;
        }
        if !self.0.iter().any(|t| t == tag) {
            self.0.push(tag.to_string());
        }
    }
}

pub struct MessageParser {
    catalog: Arc<ProviderCatalog>,
    residue_line: Option<Regex>,
    residue_suffix: Option<Regex>,
}

impl MessageParser {
    pub fn new(catalog: Arc<ProviderCatalog>) -> Self {
        let names: Vec<String> = catalog
            .display_names()
            .into_iter()
            .map(regex::escape)
            .collect();
        let (residue_line, residue_suffix) = if names.is_empty() {
            (None, None)
        } else {
            let alternation = names.join("|");
            (
                Regex::new(&format!("(?i){}", alternation)).ok(),
                Regex::new(&format!(r"(?i)\s*(?:{})\s*[:：]\s*$", alternation)).ok(),
            )
        };
        Self {
            catalog,
            residue_line,
            residue_suffix,
        }
    }

    pub fn catalog(&self) -> &Arc<ProviderCatalog> {
        &self.catalog
    }

    /// Parse a raw post. Never fails; empty input gives an empty record.
    pub fn parse(&self, raw: &str) -> ParsedMessage {
        let stripped = strip_noise(raw);
        let mut out = ParsedMessage::default();

        for sig in stripped.signatures {
            let slot = match sig.kind {
                SignatureKind::Source => &mut out.source,
                SignatureKind::Channel => &mut out.channel,
                SignatureKind::Group => &mut out.group_name,
                SignatureKind::Submitter => &mut out.bot,
                SignatureKind::Advert => continue,
            };
            if slot.is_none() {
                *slot = Some(sig.value);
            }
        }

        let mut tags = TagSet::default();
        let mut labeled_title: Option<String> = None;
        let mut narrative: Vec<String> = Vec::new();

        for (idx, line) in stripped.lines.iter().enumerate() {
            let Some(field) = scan_line(line) else {
                narrative.push(line.clone());
                continue;
            };
            match field.label {
                // Only a label on the first line names the post
                FieldLabel::Name if idx == 0 => {
                    if !field.value.is_empty() {
                        labeled_title = Some(field.value.to_string());
                    }
                }
                FieldLabel::Name => narrative.push(line.clone()),
                FieldLabel::Tags => split_tag_value(field.value).for_each(|t| tags.push(t)),
                FieldLabel::Description => {
                    if !field.value.is_empty() {
                        narrative.push(field.value.to_string());
                    }
                }
                FieldLabel::Link => {
                    if let Some(m) = BARE_URL.find(field.value) {
                        let url = trim_url(m.as_str());
                        let provider = self.catalog.classify(url, field.value);
                        out.links.insert(provider, url.to_string());
                    }
                }
            }
        }

        let mut remaining: Vec<String> = narrative
            .iter()
            .map(|line| self.lift_inline(line, &mut out.links, &mut tags))
            .filter(|line| !self.is_residue(line))
            .map(|line| self.strip_residue_suffix(&line))
            .filter(|line| !line.is_empty())
            .collect();

        let title = match labeled_title {
            Some(t) => {
                let mut scratch = LinkMap::new();
                self.lift_inline(&t, &mut scratch, &mut tags)
            }
            None if !remaining.is_empty() => remaining.remove(0),
            None => String::new(),
        };

        out.title = truncate_chars(&title, TITLE_MAX_CHARS);
        out.description = truncate_chars(&remaining.join("\n"), DESCRIPTION_MAX_CHARS);
        out.tags = tags.0;
        out
    }

    /// Remove key:value links, bare links and hashtags from one line,
    /// recording what was found. Returns the leftover text.
    fn lift_inline(&self, line: &str, links: &mut LinkMap, tags: &mut TagSet) -> String {
        for caps in KEY_URL.captures_iter(line) {
            let key = &caps[1];
            let url = trim_url(&caps[2]);
            links.insert(self.catalog.classify(url, key), url.to_string());
        }
        let rest = KEY_URL.replace_all(line, " ");

        let context = BARE_URL.replace_all(&rest, " ");
        for m in BARE_URL.find_iter(&rest) {
            let url = trim_url(m.as_str());
            links.insert(self.catalog.classify(url, &context), url.to_string());
        }

        for caps in HASHTAG.captures_iter(&context) {
            tags.push(&caps[1]);
        }
        let rest = HASHTAG.replace_all(&context, " ");

        SPACES.replace_all(&rest, " ").trim().to_string()
    }

    /// A line made only of provider display names and punctuation
    fn is_residue(&self, line: &str) -> bool {
        let without_names = match &self.residue_line {
            Some(re) => re.replace_all(line, ""),
            None => line.into(),
        };
        !without_names.chars().any(char::is_alphanumeric)
    }

    fn strip_residue_suffix(&self, line: &str) -> String {
        match &self.residue_suffix {
            Some(re) => re.replace(line, "").trim().to_string(),
            None => line.trim().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provider;

    fn parser() -> MessageParser {
        MessageParser::new(Arc::new(ProviderCatalog::defaults()))
    }

    #[test]
    fn test_labelled_post() {
        let text = "名称：流浪地球2\n描述：太阳即将毁灭\n链接：https://pan.quark.cn/s/abc123\n🏷 标签：#科幻 #电影\n📢 频道：@quarkshare";
        let parsed = parser().parse(text);
        assert_eq!(parsed.title, "流浪地球2");
        assert_eq!(parsed.description, "太阳即将毁灭");
        assert_eq!(parsed.tags, vec!["科幻", "电影"]);
        assert_eq!(
            parsed.links.get(&Provider::Quark).map(String::as_str),
            Some("https://pan.quark.cn/s/abc123")
        );
        assert_eq!(parsed.channel.as_deref(), Some("@quarkshare"));
    }

    #[test]
    fn test_unlabelled_post_uses_first_line_as_title() {
        let text = "某剧 全集\n夸克：https://pan.quark.cn/s/q1\n百度：https://pan.baidu.com/s/1b?pwd=x1y2\n更新至10集";
        let parsed = parser().parse(text);
        assert_eq!(parsed.title, "某剧 全集");
        assert_eq!(parsed.description, "更新至10集");
        assert_eq!(parsed.links.len(), 2);
        assert_eq!(
            parsed.links.get(&Provider::Baidu).map(String::as_str),
            Some("https://pan.baidu.com/s/1b?pwd=x1y2")
        );
    }

    #[test]
    fn test_tags_are_deduplicated_in_order() {
        let parsed = parser().parse("hello #a #b #a world");
        assert_eq!(parsed.tags, vec!["a", "b"]);
        assert_eq!(parsed.title, "hello world");
        assert!(parsed.links.is_empty());
    }

    #[test]
    fn test_bare_url_classified_by_host() {
        let parsed = parser().parse("资源 https://www.aliyundrive.com/s/Ab1 来看");
        assert_eq!(parsed.links.len(), 1);
        assert!(parsed.links.contains_key(&Provider::Aliyun));
        assert_eq!(parsed.title, "资源 来看");
    }

    #[test]
    fn test_unknown_host_is_other() {
        let parsed = parser().parse("看这里 https://example.org/x");
        assert_eq!(
            parsed.links.get(&Provider::Other).map(String::as_str),
            Some("https://example.org/x")
        );
    }

    #[test]
    fn test_display_name_residue_removed() {
        let text = "好电影\n夸克网盘：\n👉 百度网盘 ｜ 阿里云盘\n简介在此 夸克：";
        let parsed = parser().parse(text);
        assert_eq!(parsed.title, "好电影");
        assert_eq!(parsed.description, "简介在此");
    }

    #[test]
    fn test_name_label_after_first_line_stays_in_description() {
        let parsed = parser().parse("Intro line here\n名称：Movie X\nhttps://pan.quark.cn/s/abc");
        assert_eq!(parsed.title, "Intro line here");
        assert_eq!(parsed.description, "名称：Movie X");
        assert!(parsed.links.contains_key(&Provider::Quark));
    }

    #[test]
    fn test_display_name_inside_prose_is_kept() {
        let parsed = parser().parse("好电影\n这是夸克网盘的高清资源\n夸克网盘：");
        assert_eq!(parsed.title, "好电影");
        assert_eq!(parsed.description, "这是夸克网盘的高清资源");
    }

    #[test]
    fn test_trailing_punctuation_not_part_of_url() {
        let parsed = parser().parse("链接 https://pan.quark.cn/s/zz9。");
        assert_eq!(
            parsed.links.get(&Provider::Quark).map(String::as_str),
            Some("https://pan.quark.cn/s/zz9")
        );
    }

    #[test]
    fn test_caps_apply_to_title_and_description() {
        let long_line = "长".repeat(300);
        let body = "字".repeat(1500);
        let parsed = parser().parse(&format!("{}\n{}", long_line, body));
        assert_eq!(parsed.title.chars().count(), TITLE_MAX_CHARS);
        assert_eq!(parsed.description.chars().count(), DESCRIPTION_MAX_CHARS);
    }

    #[test]
    fn test_empty_input() {
        let parsed = parser().parse("   \n\n");
        assert_eq!(parsed, ParsedMessage::default());
    }
}
