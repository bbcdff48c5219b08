//! Pipeline status snapshot for external dashboards.
//!
//! One JSON file, rewritten atomically on every state transition. Fields
//! the caller does not supply (last processed file, progress) are carried
//! forward from the previous snapshot so the dashboard never loses them.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::store::{load_json_or_default, write_json_atomic, Store};

/// Coarse pipeline phase shown on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    #[default]
    Idle,
    Online,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StatusSnapshot {
    pub status: Phase,
    pub message: String,
    /// Events accepted by the most recent extraction.
    #[serde(default)]
    pub new_items: u64,
    /// Total events across all authoritative year files.
    #[serde(default)]
    pub total_events: u64,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_file: Option<String>,
}

/// Rewrite the status snapshot, preserving fields the new snapshot leaves
/// unset.
pub fn update_status(
    store: &Store,
    phase: Phase,
    message: &str,
    new_items: Option<u64>,
    last_file: Option<&str>,
    engine: Option<&str>,
) -> Result<()> {
    let previous: StatusSnapshot = load_json_or_default(&store.status_path());

    let snapshot = StatusSnapshot {
        status: phase,
        message: message.to_string(),
        new_items: new_items.unwrap_or(previous.new_items),
        total_events: total_events(store),
        timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        engine: engine.map(String::from).or(previous.engine),
        last_file: last_file.map(String::from).or(previous.last_file),
    };

    write_json_atomic(&store.status_path(), &snapshot)
}

/// Count events in year files only (`YYYY.json`), so monthly buckets are
/// not double-counted.
pub fn total_events(store: &Store) -> u64 {
    let Ok(entries) = std::fs::read_dir(store.data_dir()) else {
        return 0;
    };
    let mut count = 0u64;
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };
        if path.extension().map(|e| e != "json").unwrap_or(true) {
            continue;
        }
        if !crate::store::is_year_stem(&stem) {
            continue;
        }
        let events: Vec<crate::models::Event> = load_json_or_default(&path);
        count += events.len() as u64;
    }
    count
}

/// Print the current snapshot for `annal status`.
pub fn print_status(store: &Store) {
    let snapshot: StatusSnapshot = load_json_or_default(&store.status_path());
    let queue = store.load_queue();

    println!("Annal — Pipeline Status");
    println!("=======================");
    println!();
    println!("  Phase:         {:?}", snapshot.status);
    println!("  Message:       {}", snapshot.message);
    if let Some(file) = &snapshot.last_file {
        println!("  Last file:     {}", file);
    }
    if let Some(engine) = &snapshot.engine {
        println!("  Engine:        {}", engine);
    }
    println!("  Last update:   {}", snapshot.timestamp);
    println!();
    println!("  Pending items: {}", queue.len());
    println!("  Total events:  {}", total_events(store));
}
