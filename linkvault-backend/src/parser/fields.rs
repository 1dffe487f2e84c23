use once_cell::sync::Lazy;
use regex::Regex;

static LABELED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^[^\p{L}\p{N}]{0,4}\s*(资源名称|名称|标题|片名|name|title|标签|tags?|描述|简介|介绍|description|desc|链接|地址|link|url)\s*[:：]\s*(.*)$",
    )
    .expect("field label pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLabel {
    Name,
    Tags,
    Description,
    Link,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledLine<'a> {
    pub label: FieldLabel,
    pub value: &'a str,
}

fn field_label(raw: &str) -> Option<FieldLabel> {
    match raw.to_lowercase().as_str() {
        "资源名称" | "名称" | "标题" | "片名" | "name" | "title" => Some(FieldLabel::Name),
        "标签" | "tag" | "tags" => Some(FieldLabel::Tags),
        "描述" | "简介" | "介绍" | "description" | "desc" => Some(FieldLabel::Description),
        "链接" | "地址" | "link" | "url" => Some(FieldLabel::Link),
        _ => None,
    }
}

/// Recognise a `label：value` line
pub fn scan_line(line: &str) -> Option<LabeledLine<'_>> {
    let caps = LABELED.captures(line)?;
    let label = field_label(caps.get(1)?.as_str())?;
    let value = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
    Some(LabeledLine { label, value })
}

/// Split a tag label value such as "#剧集 #国产, 悬疑"
pub fn split_tag_value(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | '，' | '、' | ';' | '；'))
        .map(|t| t.trim_start_matches('#').trim())
        .filter(|t| !t.is_empty())
}
