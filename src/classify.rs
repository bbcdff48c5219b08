//! Document classification into the persistent manifest.
//!
//! Each unclassified document is inspected exactly once. Decision inputs,
//! in priority order: the override table for known-tricky filenames, a
//! filename era tag seeding the year hint, the extraction engine's
//! judgment over a head+middle sample, and finally a filename heuristic
//! that flags the document for manual review. The manifest is saved after
//! every newly classified document so a crashed run keeps its progress.

use anyhow::Result;
use regex::Regex;
use std::sync::OnceLock;

use crate::config::Config;
use crate::corpus::{sample_text, scan_corpus, RawDocument};
use crate::engine::ExtractionEngine;
use crate::models::{ClassRecord, DocKind};
use crate::reply;
use crate::status::{self, Phase};
use crate::store::Store;

fn year_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"20\d{2}").unwrap())
}

fn date_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{1,2}/\d{1,2}/\d{2,4}").unwrap())
}

/// Classify every document not yet present in the manifest. Returns the
/// number of newly classified documents.
pub async fn run_classify(
    config: &Config,
    store: &Store,
    engine: &dyn ExtractionEngine,
) -> Result<usize> {
    store.ensure_dirs()?;
    let mut manifest = store.load_manifest();
    let docs = scan_corpus(&config.corpus)?;

    let mut classified = 0usize;
    for doc in &docs {
        // Classification is a one-time decision per filename.
        if manifest.contains_key(&doc.filename) {
            continue;
        }

        let record = classify_document(config, engine, doc).await;
        tracing::info!(
            "classified {} as {:?} ({})",
            doc.filename,
            record.kind,
            record
                .year
                .as_deref()
                .or(record.topic.as_deref())
                .unwrap_or("-")
        );
        manifest.insert(doc.filename.clone(), record);
        store.save_manifest(&manifest)?;
        status::update_status(
            store,
            Phase::Online,
            &format!("Classifying file: {}", doc.filename),
            None,
            Some(&doc.filename),
            Some(engine.name()),
        )?;
        classified += 1;
    }

    Ok(classified)
}

async fn classify_document(
    config: &Config,
    engine: &dyn ExtractionEngine,
    doc: &RawDocument,
) -> ClassRecord {
    // 1. Override table always wins.
    if let Some(kind_str) = config.classifier.overrides.get(&doc.filename) {
        if let Some(kind) = parse_kind(kind_str) {
            return ClassRecord {
                kind,
                year: year_hint_from_filename(config, &doc.filename),
                topic: None,
                tags: vec![],
                note: Some("manual override".to_string()),
                manual_review: false,
            };
        }
        tracing::warn!(
            "override for {} has unknown kind '{}'; ignoring",
            doc.filename,
            kind_str
        );
    }

    // 2. Era tag seeds the year hint before the engine is consulted.
    let year_seed = year_hint_from_filename(config, &doc.filename);

    // 3. Engine judgment over the head+middle sample.
    let sample = sample_text(&doc.content, config.classifier.sample_window);
    let prompt = rubric_prompt(&doc.filename, &sample);
    match engine.generate(&prompt).await {
        Ok(text) => {
            if let Some(mut record) = record_from_reply(&text) {
                if record.year.is_none() {
                    record.year = year_seed;
                }
                return record;
            }
            tracing::warn!("unusable classification reply for {}", doc.filename);
        }
        Err(e) => tracing::warn!("classification engine failed for {}: {}", doc.filename, e),
    }

    // 4. Filename heuristic fallback.
    fallback_record(&doc.filename, year_seed)
}

/// Era tag (e.g. `MVE`) embedded in the filename, matched against the
/// configured tag → year-range lookup.
fn year_hint_from_filename(config: &Config, filename: &str) -> Option<String> {
    for (tag, years) in &config.classifier.era_tags {
        if filename.contains(tag.as_str()) {
            return Some(years.clone());
        }
    }
    year_token_re()
        .find(filename)
        .map(|m| m.as_str().to_string())
}

fn rubric_prompt(filename: &str, sample: &str) -> String {
    let date_hint = if date_token_re().is_match(sample) {
        "Contains chronological date entries."
    } else {
        "No obvious dates found."
    };

    format!(
        r#"[TASK]
Act as a digital librarian. Analyze this file sample (header + middle) and classify it.

[FILENAME]
{filename}

[HINT]
{date_hint}

[CATEGORIES]
- LOG: A chronological engineering journal. (MUST contain dates).
- REFERENCE: A cheat sheet, config file, how-to guide, or topic dump.
- META: Personal career docs, resumes, performance reviews.

[TEXT SAMPLE]
{sample}

[OUTPUT]
Return a JSON object:
{{
  "type": "LOG" | "REFERENCE" | "META",
  "year": "YYYY" (best guess for LOG, or null),
  "topic": "short 2-3 word topic if REFERENCE",
  "confidence": 0.0 to 1.0
}}"#
    )
}

fn record_from_reply(text: &str) -> Option<ClassRecord> {
    let obj = reply::parse_object(text)?;
    let kind = parse_kind(obj.get("type")?.as_str()?)?;
    Some(ClassRecord {
        kind,
        year: obj
            .get("year")
            .and_then(|y| y.as_str())
            .filter(|y| !y.is_empty() && *y != "null")
            .map(String::from),
        topic: obj
            .get("topic")
            .and_then(|t| t.as_str())
            .filter(|t| !t.is_empty())
            .map(String::from),
        tags: vec![],
        note: None,
        manual_review: false,
    })
}

fn fallback_record(filename: &str, year_seed: Option<String>) -> ClassRecord {
    if filename.contains("notes_") && filename.chars().any(|c| c.is_ascii_digit()) {
        return ClassRecord {
            kind: DocKind::Log,
            year: year_seed,
            topic: None,
            tags: vec![],
            note: Some("fallback heuristic".to_string()),
            manual_review: false,
        };
    }
    ClassRecord {
        kind: DocKind::Unknown,
        year: year_seed,
        topic: None,
        tags: vec![],
        note: Some("fallback heuristic".to_string()),
        manual_review: true,
    }
}

fn parse_kind(s: &str) -> Option<DocKind> {
    match s.trim().to_uppercase().as_str() {
        "LOG" => Some(DocKind::Log),
        "META" => Some(DocKind::Meta),
        "REFERENCE" => Some(DocKind::Reference),
        "UNKNOWN" => Some(DocKind::Unknown),
        _ => None,
    }
}

/// Force matching filenames back through the pipeline: drop their
/// manifest entries (re-classification) and their state-map hashes
/// (re-extraction). Returns `(manifest_removed, state_removed)`.
pub fn nudge(store: &Store, pattern: &str) -> Result<(usize, usize)> {
    let mut manifest = store.load_manifest();
    let before = manifest.len();
    manifest.retain(|filename, _| !filename.contains(pattern));
    let manifest_removed = before - manifest.len();
    if manifest_removed > 0 {
        store.save_manifest(&manifest)?;
    }

    let mut state = store.load_state();
    let before = state.len();
    state.retain(|identity, _| {
        identity
            .split_once("::")
            .map(|(filename, _)| !filename.contains(pattern))
            .unwrap_or(true)
    });
    let state_removed = before - state.len();
    if state_removed > 0 {
        store.save_state(&state)?;
    }

    Ok((manifest_removed, state_removed))
}
