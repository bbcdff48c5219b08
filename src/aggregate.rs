//! Year consolidation: merge bucket files into authoritative year files.
//!
//! Bucket stems name their target years directly (`2020_01` is a month of
//! 2020, `2008_2018` is a strategic range covering every year in it).
//! Existing year-file entries win fingerprint ties, so manual curation of
//! a year file survives re-aggregation. Anchor records are pinned to the
//! first day of every year in their range; everything else is distributed
//! only to the year its own date names.

use anyhow::Result;
use regex::Regex;
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::models::Event;
use crate::store::Store;

/// Outcome of one aggregation pass.
#[derive(Debug, Clone, Default)]
pub struct AggregateReport {
    pub years_updated: Vec<String>,
    pub events_total: usize,
}

/// Consolidate every bucket file into its year file(s). When `year` is
/// given only that year file is rewritten.
pub fn run_aggregate(store: &Store, year: Option<&str>) -> Result<AggregateReport> {
    store.ensure_dirs()?;

    let mut yearly: BTreeMap<String, Vec<Event>> = BTreeMap::new();

    for path in store.non_year_event_paths() {
        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };
        let targets = stem_years(&stem);
        if targets.is_empty() {
            // Unknown-bucket events have no year to land in yet.
            tracing::debug!("skipping {} (no target year)", path.display());
            continue;
        }

        let events = store.load_events(&path);
        for target in &targets {
            for event in &events {
                if let Some(placed) = place_event(event, target) {
                    yearly.entry(target.clone()).or_default().push(placed);
                }
            }
        }
    }

    let mut report = AggregateReport::default();
    for (target, new_events) in yearly {
        if let Some(only) = year {
            if target != only {
                continue;
            }
        }

        let year_file = store.year_path(&target);
        let existing = store.load_events(&year_file);
        let merged = consolidate(&target, existing, new_events);

        report.events_total += merged.len();
        store.save_events(&year_file, &merged)?;
        println!("  > Updated {}.json with {} total events.", target, merged.len());
        report.years_updated.push(target);
    }

    Ok(report)
}

/// Decide whether one bucket event belongs in `year`, rewriting anchor
/// and dateless dates to the year's first day.
fn place_event(event: &Event, year: &str) -> Option<Event> {
    let event_year = first_year_token(&event.date);

    if let Some(ref ey) = event_year {
        // A dated event goes only to its own year; anchors are pinned to
        // every year in their range.
        if ey != year && !event.is_anchor() {
            return None;
        }
    }

    let mut placed = event.clone();
    if event.is_anchor() || event_year.is_none() {
        placed.date = format!("{}-01-01", year);
    }
    Some(placed)
}

/// Merge existing year-file events with newly distributed ones. Existing
/// entries are walked first so they win fingerprint ties; entries that
/// leaked in from a different year are dropped unless anchored.
fn consolidate(year: &str, existing: Vec<Event>, new_events: Vec<Event>) -> Vec<Event> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged: Vec<Event> = Vec::new();

    for event in existing {
        if references_other_year(&event, year) && !event.is_anchor() {
            tracing::info!("dropping cross-year leak from {}: {}", year, event.summary);
            continue;
        }
        if seen.insert(event.fingerprint()) {
            merged.push(event);
        }
    }
    for event in new_events {
        if seen.insert(event.fingerprint()) {
            merged.push(event);
        }
    }

    // Anchors first, then ascending date.
    merged.sort_by_key(|e| (!e.is_anchor() as u8, e.date.clone()));
    merged
}

/// True when the event's date or summary names at least one four-digit
/// year and none of them is `year`.
fn references_other_year(event: &Event, year: &str) -> bool {
    let mut tokens: Vec<String> = year_tokens(&event.date);
    tokens.extend(year_tokens(&event.summary));
    !tokens.is_empty() && tokens.iter().all(|t| t != year)
}

fn year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(19|20)\d{2}\b").unwrap())
}

fn year_tokens(text: &str) -> Vec<String> {
    year_re()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

fn first_year_token(text: &str) -> Option<String> {
    year_re().find(text).map(|m| m.as_str().to_string())
}

/// Target years for a bucket file stem: `2020_01` → `["2020"]`,
/// `2008_2018` → every year in the range, `Unknown` → none.
fn stem_years(stem: &str) -> Vec<String> {
    static RANGE_RE: OnceLock<Regex> = OnceLock::new();
    let range_re =
        RANGE_RE.get_or_init(|| Regex::new(r"^(\d{4})_(\d{4})$").unwrap());

    if let Some(caps) = range_re.captures(stem) {
        let start: u32 = caps[1].parse().unwrap_or(0);
        let end: u32 = caps[2].parse().unwrap_or(0);
        if start <= end {
            return (start..=end).map(|y| y.to_string()).collect();
        }
    }

    static YEAR_RE: OnceLock<Regex> = OnceLock::new();
    let year_re = YEAR_RE.get_or_init(|| Regex::new(r"^(\d{4})").unwrap());
    year_re
        .captures(stem)
        .map(|caps| vec![caps[1].to_string()])
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Sensitivity, ANCHOR_MARKER};
    use tempfile::TempDir;

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

    fn anchor(summary: &str) -> Event {
        event("2008-2018", &format!("{} {}", ANCHOR_MARKER, summary))
    }

    #[test]
    fn stem_years_handles_all_forms() {
        assert_eq!(stem_years("2020_01"), vec!["2020"]);
        assert_eq!(stem_years("2016"), vec!["2016"]);
        assert_eq!(
            stem_years("2008_2010"),
            vec!["2008", "2009", "2010"]
        );
        assert!(stem_years("Unknown").is_empty());
    }

    #[test]
    fn month_buckets_fold_into_year_file() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        store
            .save_events(&store.bucket_path("2020-01"), &[event("2020-01-05", "jan fix")])
            .unwrap();
        store
            .save_events(&store.bucket_path("2020-11"), &[event("2020-11-02", "nov fix")])
            .unwrap();

        let report = run_aggregate(&store, None).unwrap();
        assert_eq!(report.years_updated, vec!["2020"]);

        let merged = store.load_events(&store.year_path("2020"));
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].date, "2020-01-05");
    }

    #[test]
    fn existing_year_file_wins_fingerprint_ties() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());

        let mut curated = event("2020-01-05", "Fixed IPMI retry bug");
        curated.evidence = "curated evidence".into();
        store
            .save_events(&store.year_path("2020"), &[curated])
            .unwrap();

        let mut fresh = event("2020-01-05", "Fixed IPMI retry bug");
        fresh.evidence = "raw quote".into();
        store
            .save_events(&store.bucket_path("2020-01"), &[fresh])
            .unwrap();

        run_aggregate(&store, None).unwrap();
        let merged = store.load_events(&store.year_path("2020"));
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].evidence, "curated evidence");
    }

    #[test]
    fn anchor_is_pinned_to_every_year_in_range() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        store
            .save_events(
                &store.bucket_path("2008-2010"),
                &[anchor("Era of validation tooling"), event("2009-06-01", "mid-range fix")],
            )
            .unwrap();

        let report = run_aggregate(&store, None).unwrap();
        assert_eq!(report.years_updated, vec!["2008", "2009", "2010"]);

        for year in ["2008", "2009", "2010"] {
            let merged = store.load_events(&store.year_path(year));
            assert!(merged[0].is_anchor());
            assert_eq!(merged[0].date, format!("{}-01-01", year));
        }
        // The dated event landed only in its own year.
        assert_eq!(store.load_events(&store.year_path("2009")).len(), 2);
        assert_eq!(store.load_events(&store.year_path("2008")).len(), 1);
    }

    #[test]
    fn cross_year_leak_is_cleaned_up() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        store
            .save_events(
                &store.year_path("2024"),
                &[event("2007-10-01", "ancient leak"), event("2024-03-01", "real")],
            )
            .unwrap();
        store
            .save_events(&store.bucket_path("2024-03"), &[event("2024-03-02", "fresh")])
            .unwrap();

        run_aggregate(&store, None).unwrap();
        let merged = store.load_events(&store.year_path("2024"));
        assert!(merged.iter().all(|e| e.summary != "ancient leak"));
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn anchors_survive_cleanup_and_sort_first() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        store
            .save_events(
                &store.year_path("2020"),
                &[
                    event("2020-01-05", "ordinary"),
                    event("2020-01-01", &format!("{} 2008 era anchor", ANCHOR_MARKER)),
                ],
            )
            .unwrap();
        store
            .save_events(&store.bucket_path("2020-02"), &[event("2020-02-01", "feb")])
            .unwrap();

        run_aggregate(&store, None).unwrap();
        let merged = store.load_events(&store.year_path("2020"));
        assert_eq!(merged.len(), 3);
        assert!(merged[0].is_anchor());
        assert_eq!(merged[1].date, "2020-01-05");
        assert_eq!(merged[2].date, "2020-02-01");
    }

    #[test]
    fn mention_of_own_year_is_not_a_leak() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        store
            .save_events(
                &store.year_path("2020"),
                &[event("2020-06-01", "planned the 2021 migration")],
            )
            .unwrap();
        store
            .save_events(&store.bucket_path("2020-06"), &[event("2020-06-02", "other")])
            .unwrap();

        run_aggregate(&store, None).unwrap();
        let merged = store.load_events(&store.year_path("2020"));
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn rerun_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        store
            .save_events(&store.bucket_path("2020-01"), &[event("2020-01-05", "once")])
            .unwrap();

        run_aggregate(&store, None).unwrap();
        let first = std::fs::read_to_string(store.year_path("2020")).unwrap();
        run_aggregate(&store, None).unwrap();
        let second = std::fs::read_to_string(store.year_path("2020")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn year_filter_limits_writes() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        store
            .save_events(&store.bucket_path("2019-05"), &[event("2019-05-01", "a")])
            .unwrap();
        store
            .save_events(&store.bucket_path("2020-01"), &[event("2020-01-05", "b")])
            .unwrap();

        let report = run_aggregate(&store, Some("2020")).unwrap();
        assert_eq!(report.years_updated, vec!["2020"]);
        assert!(!store.year_path("2019").exists());
        assert!(store.year_path("2020").exists());
    }

    #[test]
    fn unknown_bucket_is_left_alone() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        store
            .save_events(&store.bucket_path("Unknown"), &[event("2020-01-05", "orphan")])
            .unwrap();

        let report = run_aggregate(&store, None).unwrap();
        assert!(report.years_updated.is_empty());
        assert!(store.bucket_path("Unknown").exists());
    }
}
