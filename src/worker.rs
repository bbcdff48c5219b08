//! Extraction worker: turns queued chunks into archived events.
//!
//! For each work item the worker waits for the politeness gate, asks the
//! extraction engine to convert chunk text (plus strategic background
//! context and the bucket's current records) into candidate events, then
//! validates, filters, de-duplicates, and merges the result into the
//! bucket file with an atomic write.
//!
//! The state map is committed only after a successful write with at least
//! one accepted event. Engine failures and empty results leave the chunk
//! un-committed so the next scan re-enqueues it; transient outages
//! self-heal by retry.

use anyhow::Result;
use std::collections::{BTreeMap, HashSet};

use crate::config::Config;
use crate::corpus::scan_corpus;
use crate::engine::ExtractionEngine;
use crate::gate;
use crate::models::{DocKind, Event, Sensitivity, WorkItem};
use crate::queue::content_hash;
use crate::reply;
use crate::status::{self, Phase};
use crate::store::Store;

/// Outcome of one extract run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractReport {
    pub items_processed: usize,
    pub events_accepted: usize,
    pub events_audited: usize,
    /// True when the run ended because the gate never cleared.
    pub yielded: bool,
}

/// Consume the queue: highest priority first, or items matching a
/// filename substring when `target` is given. `limit` bounds the number
/// of items processed in this run.
pub async fn run_extract(
    config: &Config,
    store: &Store,
    engine: &dyn ExtractionEngine,
    limit: Option<usize>,
    target: Option<&str>,
) -> Result<ExtractReport> {
    store.ensure_dirs()?;
    let mut report = ExtractReport::default();

    let mut queue = store.load_queue();
    if queue.is_empty() {
        finish_idle(store, engine)?;
        return Ok(report);
    }

    let strategic = strategic_context(config, store);

    loop {
        if let Some(max) = limit {
            if report.items_processed >= max {
                break;
            }
        }

        let Some(index) = pick_item(&queue, target) else {
            break;
        };

        // Blocked items stay queued; a gate that never clears ends the
        // run instead of dropping work.
        if !gate::wait_until_clear(&config.gate).await {
            status::update_status(store, Phase::Blocked, "Waiting for resources", None, None, None)?;
            report.yielded = true;
            break;
        }

        let item = queue.remove(index);
        tracing::info!("extracting {} ({})", item.id, item.bucket);
        status::update_status(
            store,
            Phase::Online,
            &format!("Processing {}", item.bucket),
            None,
            Some(&item.filename),
            Some(engine.name()),
        )?;

        let outcome = process_item(config, store, engine, &strategic, &item).await?;
        report.items_processed += 1;
        report.events_accepted += outcome.accepted;
        report.events_audited += outcome.audited;

        if outcome.accepted > 0 {
            // Commit the content hash only now: the bucket write succeeded
            // and produced at least one event.
            let mut state = store.load_state();
            state.insert(item.id.clone(), content_hash(&item.content));
            store.save_state(&state)?;
            status::update_status(
                store,
                Phase::Online,
                &format!("Processed {}", item.bucket),
                Some(outcome.accepted as u64),
                Some(&item.filename),
                Some(engine.name()),
            )?;
        } else {
            tracing::info!("no usable events for {}; left uncommitted", item.id);
        }

        // The queue is persisted after the item completes, so a crash
        // mid-item leaves it on disk and it is retried from scratch.
        store.save_queue(&queue)?;
    }

    if queue.is_empty() {
        finish_idle(store, engine)?;
    }
    Ok(report)
}

fn finish_idle(store: &Store, engine: &dyn ExtractionEngine) -> Result<()> {
    let total = status::total_events(store);
    status::update_status(
        store,
        Phase::Idle,
        &format!("Archives synced. Total records: {}", total),
        None,
        None,
        Some(engine.name()),
    )
}

/// Highest-priority pending item, or the first item whose filename
/// contains the target substring.
fn pick_item(queue: &[WorkItem], target: Option<&str>) -> Option<usize> {
    match target {
        Some(needle) => queue.iter().position(|item| item.filename.contains(needle)),
        None => {
            let best = queue.iter().map(|item| item.priority).max()?;
            queue.iter().position(|item| item.priority == best)
        }
    }
}

struct ItemOutcome {
    accepted: usize,
    audited: usize,
}

async fn process_item(
    config: &Config,
    store: &Store,
    engine: &dyn ExtractionEngine,
    strategic: &str,
    item: &WorkItem,
) -> Result<ItemOutcome> {
    let bucket_path = store.bucket_path(&item.bucket);
    let existing = store.load_events(&bucket_path);

    let prompt = build_prompt(config, strategic, &existing, item);

    // Engine trouble is a transient failure: zero candidates, no commit.
    let candidates = match engine.generate(&prompt).await {
        Ok(text) => reply::parse_events(&text),
        Err(e) => {
            tracing::warn!("engine failed for {}: {}", item.id, e);
            Vec::new()
        }
    };

    let merge = merge_candidates(
        &existing,
        candidates,
        &item.bucket,
        config.worker.similarity_threshold,
    );

    for event in &merge.audited {
        store.append_audit(event)?;
    }

    let accepted = merge.accepted.len();
    if accepted > 0 {
        let mut events = existing;
        events.extend(merge.accepted);
        sort_bucket(&mut events);
        store.save_events(&bucket_path, &events)?;
    }

    Ok(ItemOutcome {
        accepted,
        audited: merge.audited.len(),
    })
}

/// Ascending date, anchors pinned before non-anchors on the same date.
pub fn sort_bucket(events: &mut [Event]) {
    events.sort_by_key(|e| (e.date.clone(), !e.is_anchor() as u8));
}

pub struct MergeResult {
    /// Public candidates that survived validation and de-duplication.
    pub accepted: Vec<Event>,
    /// Sensitive candidates routed to the privacy audit log.
    pub audited: Vec<Event>,
}

/// Validate, repair, filter, and de-duplicate candidate events against a
/// bucket's existing records.
pub fn merge_candidates(
    existing: &[Event],
    candidates: Vec<Event>,
    bucket: &str,
    similarity_threshold: f64,
) -> MergeResult {
    let mut seen: HashSet<String> = existing.iter().map(|e| e.fingerprint()).collect();

    // Same-date summaries for the fuzzy check; cross-date similarity is
    // never considered.
    let mut by_date: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for event in existing {
        by_date
            .entry(event.date.clone())
            .or_default()
            .push(normalized_summary(&event.summary));
    }

    let mut accepted = Vec::new();
    let mut audited = Vec::new();

    for mut candidate in candidates {
        // Establish a date or discard.
        let Some(date) = reply::normalize_date(&candidate.date, bucket) else {
            tracing::debug!("dropping candidate with no establishable date: {}", candidate.summary);
            continue;
        };
        candidate.date = date;

        if candidate.sensitivity == Sensitivity::Sensitive {
            audited.push(candidate);
            continue;
        }

        if seen.contains(&candidate.fingerprint()) {
            continue;
        }

        let summary_norm = normalized_summary(&candidate.summary);
        let fuzzy_dup = by_date
            .get(&candidate.date)
            .map(|neighbors| {
                neighbors
                    .iter()
                    .any(|n| strsim::jaro_winkler(n, &summary_norm) >= similarity_threshold)
            })
            .unwrap_or(false);
        if fuzzy_dup {
            tracing::debug!("fuzzy duplicate rejected: {}", candidate.summary);
            continue;
        }

        seen.insert(candidate.fingerprint());
        by_date
            .entry(candidate.date.clone())
            .or_default()
            .push(summary_norm);
        accepted.push(candidate);
    }

    MergeResult { accepted, audited }
}

fn normalized_summary(summary: &str) -> String {
    summary.trim().to_lowercase()
}

/// Assemble the extraction prompt: strategic background, the bucket's
/// current records for duplicate avoidance, and the chunk text.
fn build_prompt(config: &Config, strategic: &str, existing: &[Event], item: &WorkItem) -> String {
    let existing_sample: Vec<&Event> = existing
        .iter()
        .take(config.worker.existing_sample)
        .collect();
    let existing_json =
        serde_json::to_string_pretty(&existing_sample).unwrap_or_else(|_| "[]".to_string());

    let chunk_text: String = item
        .content
        .chars()
        .take(config.worker.chunk_budget)
        .collect();

    format!(
        r#"[ROLE]
You are an expert technical archivist.

[CONTEXT]
{strategic}

[EXISTING ARCHIVE ({bucket})]
{existing_json}

[RAW LOGS]
{chunk_text}

[TASK]
Analyze the RAW LOGS.
1. Extract technical events (technical win, bug fix, tool usage).
2. Compare with EXISTING ARCHIVE. Avoid duplicates.
3. Improve descriptions if the raw logs offer more detail.
4. PRIVACY: classify every event.
   - "Public": technical work, bug fixes, tool usage. If it contains a
     name or email, replace it with [REDACTED] and keep the technical
     context.
   - "Sensitive": personal feedback, salary, health, or purely internal
     non-technical notes.

Return a JSON list of NEW events:
[
  {{ "date": "YYYY-MM-DD", "summary": "...", "evidence": "quote", "sensitivity": "Public", "tags": ["Tag"] }}
]"#,
        bucket = item.bucket,
    )
}

/// Bounded excerpts of every meta document, used as background context
/// in each extraction prompt.
fn strategic_context(config: &Config, store: &Store) -> String {
    let manifest = store.load_manifest();
    let Ok(docs) = scan_corpus(&config.corpus) else {
        return String::new();
    };

    let mut sections = Vec::new();
    for doc in &docs {
        let Some(record) = manifest.get(&doc.filename) else {
            continue;
        };
        if record.kind != DocKind::Meta {
            continue;
        }
        let excerpt: String = doc.content.chars().take(config.worker.context_budget).collect();
        sections.push(format!("[{}]\n{}", doc.filename, excerpt));
    }
    sections.join("\n\n")
}
