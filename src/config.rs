use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub corpus: CorpusConfig,
    pub data: DataConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub chunker: ChunkerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub gate: GateConfig,
}

/// Where raw note documents live and which of them enter the pipeline.
#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    /// Filename substrings that must never be enqueued, regardless of how
    /// the file was classified (glossary/cheat-sheet style documents).
    #[serde(default = "default_reference_denylist")]
    pub reference_denylist: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/notes_*.txt".to_string(), "**/ras-*.txt".to_string()]
}

fn default_reference_denylist() -> Vec<String> {
    vec!["GIT".to_string(), "resume".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ClassifierConfig {
    /// Forced classifications for known-tricky filenames. Always wins.
    /// Values are manifest `type` strings: `LOG`, `META`, `REFERENCE`.
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
    /// Filename-embedded team/era tag → year range (`"MVE" = "2014-2016"`).
    /// Used to seed the year hint before the engine is consulted.
    #[serde(default)]
    pub era_tags: BTreeMap<String, String>,
    /// Bytes read from the head and from the middle of a document to form
    /// the classification sample.
    #[serde(default = "default_sample_window")]
    pub sample_window: usize,
}

fn default_sample_window() -> usize {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkerConfig {
    /// Size ceiling for one paragraph-mode bucket, in characters.
    #[serde(default = "default_paragraph_max_chars")]
    pub paragraph_max_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            paragraph_max_chars: default_paragraph_max_chars(),
        }
    }
}

fn default_paragraph_max_chars() -> usize {
    6000
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Jaro-Winkler similarity above which a same-date candidate is
    /// rejected as a fuzzy duplicate.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Character budget for each strategic-context excerpt in the prompt.
    #[serde(default = "default_context_budget")]
    pub context_budget: usize,
    /// Character budget for the chunk text included in the prompt.
    #[serde(default = "default_chunk_budget")]
    pub chunk_budget: usize,
    /// How many existing bucket records are shown to the engine for
    /// duplicate-avoidance context.
    #[serde(default = "default_existing_sample")]
    pub existing_sample: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            context_budget: default_context_budget(),
            chunk_budget: default_chunk_budget(),
            existing_sample: default_existing_sample(),
        }
    }
}

fn default_similarity_threshold() -> f64 {
    0.85
}
fn default_context_budget() -> usize {
    3000
}
fn default_chunk_budget() -> usize {
    6000
}
fn default_existing_sample() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Engine profile: `local` (Ollama), `remote` (OpenAI-compatible
    /// completions server), or `hybrid` (remote with local fallback).
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_local_url")]
    pub local_url: String,
    #[serde(default = "default_local_model")]
    pub local_model: String,
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default)]
    pub remote_model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            local_url: default_local_url(),
            local_model: default_local_model(),
            remote_url: None,
            remote_model: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_profile() -> String {
    "local".to_string()
}
fn default_local_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_local_model() -> String {
    "llama3.2:1b".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct GateConfig {
    /// Presence of this file means an interactive session owns the host;
    /// the whole pipeline yields until it disappears.
    #[serde(default)]
    pub lock_file: Option<PathBuf>,
    /// Optional Prometheus-style query endpoint for the 1-minute load
    /// average. When unset or unreachable the OS loadavg is used.
    #[serde(default)]
    pub metrics_url: Option<String>,
    #[serde(default = "default_max_load")]
    pub max_load: f64,
    /// Accelerator memory pressure (fraction of total) above which work
    /// is deferred.
    #[serde(default = "default_accel_threshold")]
    pub accel_threshold: f64,
    #[serde(default = "default_check_accel")]
    pub check_accel: bool,
    /// Seconds between gate re-checks while blocked.
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
    /// Give up waiting after this many seconds and end the run; queued
    /// items stay queued.
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            lock_file: None,
            metrics_url: None,
            max_load: default_max_load(),
            accel_threshold: default_accel_threshold(),
            check_accel: default_check_accel(),
            poll_secs: default_poll_secs(),
            max_wait_secs: default_max_wait_secs(),
        }
    }
}

fn default_max_load() -> f64 {
    4.0
}
fn default_accel_threshold() -> f64 {
    0.95
}
fn default_check_accel() -> bool {
    true
}
fn default_poll_secs() -> u64 {
    30
}
fn default_max_wait_secs() -> u64 {
    1800
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if !(0.0..=1.0).contains(&config.worker.similarity_threshold) {
        anyhow::bail!("worker.similarity_threshold must be in [0.0, 1.0]");
    }

    if config.chunker.paragraph_max_chars == 0 {
        anyhow::bail!("chunker.paragraph_max_chars must be > 0");
    }

    match config.engine.profile.as_str() {
        "local" => {}
        "remote" | "hybrid" => {
            if config.engine.remote_url.is_none() {
                anyhow::bail!(
                    "engine.remote_url must be set when profile is '{}'",
                    config.engine.profile
                );
            }
        }
        other => anyhow::bail!(
            "Unknown engine profile: '{}'. Must be local, remote, or hybrid.",
            other
        ),
    }

    Ok(config)
}
