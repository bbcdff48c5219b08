//! Persisted pipeline state: JSON files under the data directory.
//!
//! Every artifact (manifest, state map, queue, bucket files, year files,
//! status snapshot) is a plain JSON file mutated through the same two
//! primitives:
//!
//! - **load-or-empty**: a missing or corrupt file deserializes to the
//!   empty collection instead of failing the run;
//! - **atomic write**: serialize to `<path>.tmp`, then rename over the
//!   target, so a crash mid-write never leaves a half-written file.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::models::{Event, Manifest, StateMap, WorkItem};

/// Resolved locations of every persisted artifact.
#[derive(Debug, Clone)]
pub struct Store {
    data_dir: PathBuf,
}

impl Store {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create data dir {}", self.data_dir.display()))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.data_dir.join("file_manifest.json")
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("chunk_state.json")
    }

    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join("queue.json")
    }

    pub fn status_path(&self) -> PathBuf {
        self.data_dir.join("status.json")
    }

    pub fn audit_path(&self) -> PathBuf {
        self.data_dir.join("privacy_audit.jsonl")
    }

    /// Bucket file for a bucket id: `2020-01` → `2020_01.json`,
    /// `2008-2018` → `2008_2018.json`.
    pub fn bucket_path(&self, bucket: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", bucket.replace('-', "_")))
    }

    /// Authoritative year file: `2020.json`.
    pub fn year_path(&self, year: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", year))
    }

    pub fn load_manifest(&self) -> Manifest {
        load_json_or_default(&self.manifest_path())
    }

    pub fn save_manifest(&self, manifest: &Manifest) -> Result<()> {
        write_json_atomic(&self.manifest_path(), manifest)
    }

    pub fn load_state(&self) -> StateMap {
        load_json_or_default(&self.state_path())
    }

    pub fn save_state(&self, state: &StateMap) -> Result<()> {
        write_json_atomic(&self.state_path(), state)
    }

    pub fn load_queue(&self) -> Vec<WorkItem> {
        load_json_or_default(&self.queue_path())
    }

    pub fn save_queue(&self, queue: &[WorkItem]) -> Result<()> {
        write_json_atomic(&self.queue_path(), &queue)
    }

    pub fn load_events(&self, path: &Path) -> Vec<Event> {
        load_json_or_default(path)
    }

    pub fn save_events(&self, path: &Path, events: &[Event]) -> Result<()> {
        write_json_atomic(path, &events)
    }

    /// Append one rejected Sensitive candidate to the privacy audit log.
    /// The log is append-only JSONL and is never read back by the pipeline.
    pub fn append_audit(&self, event: &Event) -> Result<()> {
        let line = serde_json::to_string(event)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.audit_path())
            .with_context(|| format!("failed to open {}", self.audit_path().display()))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    /// All month-bucket files belonging to `year` (`YYYY_MM.json`), sorted.
    pub fn month_bucket_paths(&self, year: &str) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.data_dir)
            .into_iter()
            .flatten()
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                file_stem(p)
                    .map(|stem| is_month_bucket_of(&stem, year))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();
        paths
    }

    /// Every data file that holds extracted events but is not an
    /// authoritative year file: month buckets plus meta range buckets.
    pub fn non_year_event_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.data_dir)
            .into_iter()
            .flatten()
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                let Some(stem) = file_stem(p) else {
                    return false;
                };
                if p.extension().map(|e| e != "json").unwrap_or(true) {
                    return false;
                }
                if is_year_stem(&stem) {
                    return false;
                }
                !matches!(
                    stem.as_str(),
                    "file_manifest" | "chunk_state" | "queue" | "status"
                )
            })
            .collect();
        paths.sort();
        paths
    }
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().into_owned())
}

/// `"2020"` → true; `"2020_01"`, `"queue"` → false.
pub fn is_year_stem(stem: &str) -> bool {
    stem.len() == 4 && stem.chars().all(|c| c.is_ascii_digit())
}

fn is_month_bucket_of(stem: &str, year: &str) -> bool {
    let Some(rest) = stem.strip_prefix(year) else {
        return false;
    };
    let Some(month) = rest.strip_prefix('_') else {
        return false;
    };
    month.len() == 2 && month.chars().all(|c| c.is_ascii_digit())
}

/// Deserialize a JSON file, treating a missing or corrupt file as the
/// default (empty) value. Corruption is logged but never fatal.
pub fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let Ok(content) = fs::read_to_string(path) else {
        return T::default();
    };
    match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("treating corrupt {} as empty: {}", path.display(), e);
            T::default()
        }
    }
}

/// Serialize to `<path>.tmp`, then rename over the target.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to rename {} over {}", tmp.display(), path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sensitivity;
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

    #[test]
    fn missing_file_loads_as_empty() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        assert!(store.load_manifest().is_empty());
        assert!(store.load_state().is_empty());
        assert!(store.load_queue().is_empty());
    }

    #[test]
    fn corrupt_file_loads_as_empty() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        fs::write(store.state_path(), "{not json").unwrap();
        assert!(store.load_state().is_empty());
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        let path = store.bucket_path("2020-01");
        store.save_events(&path, &[event("2020-01-05", "a")]).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(store.load_events(&path).len(), 1);
    }

    #[test]
    fn interrupted_write_preserves_original() {
        // Simulate a crash between the temp write and the rename: the
        // original must still deserialize to its old contents.
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        let path = store.bucket_path("2020-01");
        store.save_events(&path, &[event("2020-01-05", "old")]).unwrap();

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, "partial garbage that never got renam").unwrap();

        let events = store.load_events(&path);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].summary, "old");
    }

    #[test]
    fn bucket_path_replaces_separator() {
        let store = Store::new("/data");
        assert!(store.bucket_path("2020-01").ends_with("2020_01.json"));
        assert!(store.bucket_path("2008-2018").ends_with("2008_2018.json"));
    }

    #[test]
    fn month_bucket_paths_filters_by_year() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        for name in ["2020_01.json", "2020_11.json", "2019_12.json", "2020.json", "queue.json"] {
            fs::write(tmp.path().join(name), "[]").unwrap();
        }
        let paths = store.month_bucket_paths("2020");
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|p| {
            let n = p.file_name().unwrap().to_string_lossy().into_owned();
            n == "2020_01.json" || n == "2020_11.json"
        }));
    }

    #[test]
    fn non_year_event_paths_excludes_pipeline_files() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        for name in [
            "2020_01.json",
            "2008_2018.json",
            "2020.json",
            "queue.json",
            "chunk_state.json",
            "status.json",
            "file_manifest.json",
        ] {
            fs::write(tmp.path().join(name), "[]").unwrap();
        }
        let stems: Vec<String> = store
            .non_year_event_paths()
            .iter()
            .map(|p| p.file_stem().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(stems, vec!["2008_2018", "2020_01"]);
    }

    #[test]
    fn audit_log_appends_jsonl() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        store.append_audit(&event("2020-01-01", "one")).unwrap();
        store.append_audit(&event("2020-01-02", "two")).unwrap();
        let content = fs::read_to_string(store.audit_path()).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
