//! Signature and noise removal
//!
//! Reposted content usually ends with attribution lines ("来自：…",
//! "频道：@…", "投稿：…"). Those lines are removed from the body, but their
//! values are kept because they are the record's provenance.

use once_cell::sync::Lazy;
use regex::Regex;

static INVISIBLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x{200B}-\x{200D}\x{2060}\x{FEFF}]").expect("invisible pattern"));

static SIGNATURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^[^\p{L}\p{N}]{0,4}\s*(来\s*自|频\s*道|群\s*组|投\s*稿(?:人)?|搜\s*资\s*源|from|source|channel|group|submitted\s+by)\s*[:：]\s*(.*)$",
    )
    .expect("signature pattern")
});

static HANDLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|\s)@[\p{L}\p{N}_]+").expect("handle pattern"));

static SPACES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t\x{3000}\x{00A0}]{2,}").expect("spaces pattern"));

/// Which provenance field a signature line fills
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureKind {
    Source,
    Channel,
    Group,
    Submitter,
    /// "搜资源" style advertising; dropped without keeping a value
    Advert,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub kind: SignatureKind,
    pub value: String,
}

#[derive(Debug, Clone, Default)]
pub struct StrippedText {
    pub lines: Vec<String>,
    pub signatures: Vec<Signature>,
}

fn signature_kind(label: &str) -> SignatureKind {
    let label: String = label.chars().filter(|c| !c.is_whitespace()).collect::<String>().to_lowercase();
    match label.as_str() {
        "来自" | "from" | "source" => SignatureKind::Source,
        "频道" | "channel" => SignatureKind::Channel,
        "群组" | "group" => SignatureKind::Group,
        "投稿" | "投稿人" | "submittedby" => SignatureKind::Submitter,
        _ => SignatureKind::Advert,
    }
}

/// Split `raw` into cleaned non-empty lines plus the attribution that was cut.
pub fn strip_noise(raw: &str) -> StrippedText {
    let visible = INVISIBLE.replace_all(raw, "");
    let mut out = StrippedText::default();

    for line in visible.lines() {
        if let Some(caps) = SIGNATURE.captures(line) {
            let kind = signature_kind(&caps[1]);
            let value = caps[2].trim();
            if kind != SignatureKind::Advert && !value.is_empty() {
                out.signatures.push(Signature {
                    kind,
                    value: value.to_string(),
                });
            }
            continue;
        }

        let without_handles = HANDLE.replace_all(line, "$1");
        let collapsed = SPACES.replace_all(&without_handles, " ");
        let trimmed = collapsed.trim();
        if !trimmed.is_empty() {
            out.lines.push(trimmed.to_string());
        }
    }

    out
}
