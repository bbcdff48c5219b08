//! Corpus discovery and document sampling.
//!
//! Walks the raw-notes root with include/exclude glob sets and returns
//! documents in a deterministic order. Also builds the head+middle text
//! sample used by the classifier, so a log that starts with pages of
//! non-chronological preamble is still recognized as a log.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::PathBuf;
use walkdir::WalkDir;

use crate::config::CorpusConfig;

/// A raw document found under the corpus root. Content is read eagerly;
/// the corpus is plain text and small relative to everything downstream.
#[derive(Debug, Clone)]
pub struct RawDocument {
    /// Stable identity: the bare filename, unique across the corpus.
    pub filename: String,
    pub path: PathBuf,
    pub content: String,
}

/// Scan the corpus root and return all matching documents, sorted by
/// filename for deterministic ordering.
pub fn scan_corpus(config: &CorpusConfig) -> Result<Vec<RawDocument>> {
    if !config.root.exists() {
        bail!("corpus root does not exist: {}", config.root.display());
    }

    let include_set = build_globset(&config.include_globs)?;
    let exclude_set = build_globset(&config.exclude_globs)?;

    let mut docs = Vec::new();

    for entry in WalkDir::new(&config.root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(&config.root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        // Unreadable or non-UTF-8 files become empty documents rather
        // than failing the scan.
        let content = std::fs::read(path)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default();

        docs.push(RawDocument {
            filename,
            path: path.to_path_buf(),
            content,
        });
    }

    docs.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(docs)
}

/// Head window plus a window from the middle of the document, joined by a
/// skip marker. The middle window catches chronological content hiding
/// behind a long backlog or preamble.
pub fn sample_text(content: &str, window: usize) -> String {
    let head: String = take_chars(content, 0, window);
    if content.chars().count() <= window {
        return head;
    }

    let total = content.chars().count();
    let mid_start = (total / 2).saturating_sub(window / 2);
    let middle: String = take_chars(content, mid_start, window);

    format!("{}\n\n...[SKIP]...\n\n{}", head, middle)
}

fn take_chars(s: &str, start: usize, count: usize) -> String {
    s.chars().skip(start).take(count).collect()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
