//! Core data models used throughout Annal.
//!
//! These types represent the classified documents, work-queue items, and
//! structured events that flow through the ingestion pipeline. All of them
//! serialize to JSON because every pipeline artifact is a plain JSON file
//! on disk.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Category assigned to a raw document by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocKind {
    /// A chronological journal with dated entries.
    Log,
    /// A strategic/career document (reviews, insight dumps) spanning a year range.
    Meta,
    /// A cheat sheet, config dump, or how-to guide. Never chunked.
    Reference,
    /// Classification failed; flagged for manual review.
    Unknown,
}

impl DocKind {
    /// Queue priority for chunks of this kind. Strategic documents outrank
    /// ordinary logs.
    pub fn priority(self) -> i64 {
        match self {
            DocKind::Meta => 20,
            DocKind::Log => 10,
            DocKind::Reference | DocKind::Unknown => 0,
        }
    }
}

/// One manifest entry: the classifier's one-time decision for a filename.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassRecord {
    #[serde(rename = "type")]
    pub kind: DocKind,
    /// Best-effort year hint: `"2016"` or a range like `"2008-2018"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    /// Short topic label for reference documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Provenance note ("manual override", "fallback heuristic", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Set when the engine result was unusable and a human should look.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub manual_review: bool,
}

/// Mapping filename → classification. Owned by the classifier; read-only
/// downstream. A `BTreeMap` keeps the persisted file diff-stable.
pub type Manifest = BTreeMap<String, ClassRecord>;

/// Mapping chunk identity (`"filename::bucket"`) → last committed content hash.
pub type StateMap = BTreeMap<String, String>;

/// Build the canonical chunk identity string for a document/bucket pair.
pub fn chunk_identity(filename: &str, bucket: &str) -> String {
    format!("{}::{}", filename, bucket)
}

/// One pending unit of extraction work. The chunk's full text travels with
/// the item so the queue file alone is enough to resume after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Chunk identity: `"filename::bucket"`.
    pub id: String,
    pub filename: String,
    /// Bucket id: `"YYYY-MM"` for logs, `"YYYY"` or `"YYYY-YYYY"` for meta.
    pub bucket: String,
    #[serde(rename = "type")]
    pub kind: DocKind,
    pub priority: i64,
    pub content: String,
}

/// Sensitivity classification attached to every candidate event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Sensitivity {
    #[default]
    Public,
    Sensitive,
}

/// Marker embedded in anchor-event summaries. Anchors are pinned to the
/// start of every year in their strategic range and survive cross-year
/// cleanup.
pub const ANCHOR_MARKER: &str = "[STRATEGIC_ANCHOR]";

/// One structured fact extracted from the corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Normalized `YYYY-MM-DD`.
    pub date: String,
    pub summary: String,
    #[serde(default)]
    pub evidence: String,
    #[serde(default)]
    pub sensitivity: Sensitivity,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Optional quality rank assigned by later refinement passes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u8>,
}

impl Event {
    pub fn is_anchor(&self) -> bool {
        self.summary.contains(ANCHOR_MARKER)
    }

    /// Exact-dedup fingerprint: `date | normalized summary` (lower-cased,
    /// trimmed, trailing period stripped).
    pub fn fingerprint(&self) -> String {
        let summary = self.summary.trim().to_lowercase();
        let summary = summary.trim_end_matches('.');
        format!("{}|{}", self.date, summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(date: &str, summary: &str) -> Event {
        Event {
            date: date.into(),
            summary: summary.into(),
            evidence: String::new(),
            sensitivity: Sensitivity::Public,
            tags: vec![],
            rank: None,
        }
    }

    #[test]
    fn fingerprint_normalizes_summary() {
        let a = event("2020-03-01", "Fixed Simics timeout bug.");
        let b = event("2020-03-01", "  fixed simics timeout bug");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_distinguishes_dates() {
        let a = event("2020-03-01", "Same text");
        let b = event("2020-04-01", "Same text");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn meta_outranks_log() {
        assert!(DocKind::Meta.priority() > DocKind::Log.priority());
    }

    #[test]
    fn class_record_roundtrips_kind_tag() {
        let rec = ClassRecord {
            kind: DocKind::Log,
            year: Some("2016".into()),
            topic: None,
            tags: vec![],
            note: None,
            manual_review: false,
        };
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("\"type\":\"LOG\""));
        let back: ClassRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, DocKind::Log);
    }
}
