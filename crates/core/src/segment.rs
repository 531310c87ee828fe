//! Splits a raw assistant reply into its semantic segments and classifies
//! plain message text into renderer-agnostic lines.
//!
//! Parsing happens at render time, never at storage time, so the raw text in
//! the transcript stays the single source of truth even while a reply is
//! still streaming.

/// A line containing only this delimiter separates the reply segments.
pub const SEGMENT_DELIMITER: &str = "---";

const SOURCES_MARKER: &str = "*Sources";
const ORIGINAL_MARKER: &str = "*Texte Original";

/// Derived view of one assistant reply. Recomputed on demand, never cached.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedReply {
    /// The narrative answer, always present (possibly empty).
    pub answer: String,
    /// Flat citation lines from the sources block, bullets stripped.
    pub sources: Option<Vec<String>>,
    /// The original-language excerpt, header line stripped.
    pub original: Option<String>,
}

/// Splits `raw` into `{answer, sources, original}`.
///
/// The reply is up to three parts separated by a line holding only `---`:
/// the narrative answer first, then a part whose first line marks it as the
/// sources block, then one whose first line marks it as the original-text
/// block. Missing parts yield `None`, never an error.
pub fn segment(raw: &str) -> ParsedReply {
    let mut parts: Vec<Vec<&str>> = vec![Vec::new()];
    for line in raw.lines() {
        if line.trim() == SEGMENT_DELIMITER {
            parts.push(Vec::new());
        } else if let Some(current) = parts.last_mut() {
            current.push(line);
        }
    }

    let answer = parts[0].join("\n").trim().to_string();
    let mut sources = None;
    let mut original = None;

    for part in &parts[1..] {
        let Some(first_idx) = part.iter().position(|l| !l.trim().is_empty()) else {
            continue;
        };
        let first = part[first_idx].trim();
        let body = &part[first_idx + 1..];
        if sources.is_none() && first.starts_with(SOURCES_MARKER) {
            sources = Some(
                body.iter()
                    .map(|line| strip_bullet(line))
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect(),
            );
        } else if original.is_none() && first.starts_with(ORIGINAL_MARKER) {
            let text = body.join("\n").trim().to_string();
            if !text.is_empty() {
                original = Some(text);
            }
        }
    }

    ParsedReply {
        answer,
        sources,
        original,
    }
}

fn strip_bullet(line: &str) -> &str {
    let line = line.trim();
    for marker in ["- ", "* ", "• "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return rest.trim();
        }
    }
    line
}

/// One inline span of a text line. Only `**bold**` pairs are recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inline {
    Text(String),
    Bold(String),
}

/// One classified line of plain message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// `N. **Title**: description`
    NumberedRow {
        number: u32,
        title: String,
        description: String,
    },
    /// `- **Title**: description`
    BulletRow { title: String, description: String },
    /// Any other non-empty line, inline-bold parsed.
    Text(Vec<Inline>),
    /// Paragraph break.
    Blank,
}

/// Tags every line of `text` with its grammar variant.
pub fn classify_lines(text: &str) -> Vec<Line> {
    text.lines().map(classify_line).collect()
}

pub fn classify_line(line: &str) -> Line {
    if line.trim().is_empty() {
        return Line::Blank;
    }
    if let Some(row) = parse_numbered_row(line) {
        return row;
    }
    if let Some(row) = parse_bullet_row(line) {
        return row;
    }
    Line::Text(parse_inline(line))
}

fn parse_numbered_row(line: &str) -> Option<Line> {
    let digits_end = line.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }
    let number: u32 = line[..digits_end].parse().ok()?;
    let rest = line[digits_end..].strip_prefix('.')?;
    let rest = rest.strip_prefix(|c: char| c.is_whitespace())?;
    let (title, description) = parse_titled(rest)?;
    Some(Line::NumberedRow {
        number,
        title,
        description,
    })
}

fn parse_bullet_row(line: &str) -> Option<Line> {
    let rest = line.strip_prefix('-')?;
    let rest = rest.strip_prefix(|c: char| c.is_whitespace())?;
    let (title, description) = parse_titled(rest)?;
    Some(Line::BulletRow { title, description })
}

fn parse_titled(rest: &str) -> Option<(String, String)> {
    let rest = rest.strip_prefix("**")?;
    let close = rest.find("**")?;
    let title = rest[..close].to_string();
    let after = rest[close + 2..].trim_start();
    let description = after.strip_prefix(':')?.trim_start().to_string();
    Some((title, description))
}

/// Scans a line for `**bold**` pairs. An unterminated marker stays literal.
pub fn parse_inline(text: &str) -> Vec<Inline> {
    let mut spans = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("**") {
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("**") else {
            break;
        };
        if open > 0 {
            spans.push(Inline::Text(rest[..open].to_string()));
        }
        spans.push(Inline::Bold(after_open[..close].to_string()));
        rest = &after_open[close + 2..];
    }
    if !rest.is_empty() {
        spans.push(Inline::Text(rest.to_string()));
    }
    spans
}
