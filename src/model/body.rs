//! Message body segmentation
//!
//! Bodies use a fixed delimiter syntax: triple-backtick fences with an
//! optional language tag for code blocks, single backticks for inline spans.

use regex::Regex;
use std::sync::LazyLock;

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```(\w*)\n([\s\S]*?)```").expect("fenced block pattern is valid")
});

static INLINE_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("inline span pattern is valid"));

/// A displayable piece of a message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    InlineCode(String),
    CodeBlock {
        language: Option<String>,
        code: String,
    },
}

/// Split a body into ordered segments. Empty text pieces are dropped.
pub fn segments(body: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut cursor = 0;

    for caps in FENCED_BLOCK.captures_iter(body) {
        let (Some(whole), Some(code)) = (caps.get(0), caps.get(2)) else {
            continue;
        };
        push_inline(&mut out, body.get(cursor..whole.start()).unwrap_or_default());
        let language = caps
            .get(1)
            .map(|m| m.as_str())
            .filter(|lang| !lang.is_empty())
            .map(str::to_string);
        out.push(Segment::CodeBlock {
            language,
            code: code.as_str().to_string(),
        });
        cursor = whole.end();
    }

    push_inline(&mut out, body.get(cursor..).unwrap_or_default());
    out
}

fn push_inline(out: &mut Vec<Segment>, text: &str) {
    let mut cursor = 0;
    for caps in INLINE_SPAN.captures_iter(text) {
        let (Some(whole), Some(span)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        push_text(out, text.get(cursor..whole.start()).unwrap_or_default());
        out.push(Segment::InlineCode(span.as_str().to_string()));
        cursor = whole.end();
    }
    push_text(out, text.get(cursor..).unwrap_or_default());
}

fn push_text(out: &mut Vec<Segment>, text: &str) {
    if !text.is_empty() {
        out.push(Segment::Text(text.to_string()));
    }
}
