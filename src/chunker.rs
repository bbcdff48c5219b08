//! Deterministic splitting of classified documents into time buckets.
//!
//! Log documents are cut on leading `M/D/Y` date lines into month buckets
//! (`YYYY-MM`); meta documents become a single bucket keyed by their year
//! hint; reference and unknown documents produce nothing. The mapping is
//! fully recomputed on every run; only the identity+hash pair is compared
//! against history downstream.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::config::ChunkerConfig;
use crate::models::DocKind;

/// Sentinel bucket for content with no derivable time address.
pub const UNKNOWN_BUCKET: &str = "Unknown";

/// Leading date pattern: 1-2 digit month/day, 2 or 4 digit year.
fn date_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{2,4})\b").unwrap())
}

/// Split a document into bucket-id → chunk-text. Deterministic: the same
/// content and hints always produce byte-identical output.
pub fn chunk_document(
    kind: DocKind,
    year_hint: Option<&str>,
    content: &str,
    config: &ChunkerConfig,
) -> BTreeMap<String, String> {
    match kind {
        DocKind::Log => chunk_log(year_hint, content, config),
        DocKind::Meta => chunk_meta(year_hint, content),
        DocKind::Reference | DocKind::Unknown => BTreeMap::new(),
    }
}

fn fallback_bucket(year_hint: Option<&str>) -> String {
    year_hint
        .filter(|y| !y.is_empty())
        .unwrap_or(UNKNOWN_BUCKET)
        .to_string()
}

fn chunk_log(
    year_hint: Option<&str>,
    content: &str,
    config: &ChunkerConfig,
) -> BTreeMap<String, String> {
    if !content
        .lines()
        .any(|line| date_line_re().is_match(line.trim()))
    {
        // No per-line timestamps anywhere: fall back to paragraph
        // accumulation under the year hint.
        return chunk_paragraphs(year_hint, content, config.paragraph_max_chars);
    }

    let mut segments: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut current_bucket = fallback_bucket(year_hint);
    let mut current_lines: Vec<&str> = Vec::new();

    let mut flush = |bucket: &str, lines: &mut Vec<&str>, segs: &mut BTreeMap<String, Vec<String>>| {
        if !lines.is_empty() {
            segs.entry(bucket.to_string())
                .or_default()
                .push(lines.join("\n"));
            lines.clear();
        }
    };

    for line in content.lines() {
        if let Some(caps) = date_line_re().captures(line.trim()) {
            let month = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let mut year = caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_default();
            if year.len() == 2 {
                // 2-digit years are assumed 20xx.
                year = format!("20{}", year);
            }

            flush(&current_bucket, &mut current_lines, &mut segments);
            current_bucket = format!("{}-{:0>2}", year, month);
            current_lines.push(line);
        } else {
            current_lines.push(line);
        }
    }
    flush(&current_bucket, &mut current_lines, &mut segments);

    // A bucket opened more than once keeps its segments in document order.
    segments
        .into_iter()
        .map(|(bucket, parts)| (bucket, parts.join("\n")))
        .filter(|(_, text)| !text.trim().is_empty())
        .collect()
}

/// Paragraph-accumulation mode for logs without reliable timestamps:
/// paragraphs accumulate into one year-hint bucket up to a size ceiling.
fn chunk_paragraphs(
    year_hint: Option<&str>,
    content: &str,
    max_chars: usize,
) -> BTreeMap<String, String> {
    let mut buf = String::new();
    for para in content.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !buf.is_empty() && buf.len() + 2 + trimmed.len() > max_chars {
            break;
        }
        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(trimmed);
    }

    let mut chunks = BTreeMap::new();
    if !buf.is_empty() {
        chunks.insert(fallback_bucket(year_hint), buf);
    }
    chunks
}

fn chunk_meta(year_hint: Option<&str>, content: &str) -> BTreeMap<String, String> {
    let mut chunks = BTreeMap::new();
    if !content.trim().is_empty() {
        chunks.insert(fallback_bucket(year_hint), content.to_string());
    }
    chunks
}
