//! # Annal CLI (`annal`)
//!
//! The `annal` binary drives the log-to-archive pipeline. Each stage is
//! independently invocable and idempotent; `annal run` chains them.
//!
//! ## Usage
//!
//! ```bash
//! annal --config ./annal.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `annal classify` | Classify unmanifested documents (LOG/META/REFERENCE) |
//! | `annal scan` | Chunk classified documents and enqueue new or changed chunks |
//! | `annal extract` | Consume the queue through the extraction engine |
//! | `annal aggregate` | Consolidate bucket files into year files |
//! | `annal run` | classify → scan → extract → aggregate in one pass |
//! | `annal nudge <pattern>` | Force matching files back through classification |
//! | `annal status` | Print the pipeline status snapshot |
//!
//! ## Examples
//!
//! ```bash
//! # First run over a fresh corpus
//! annal run --config ./annal.toml
//!
//! # Re-extract one document with the remote engine
//! annal nudge notes_2020
//! annal scan
//! annal extract --engine remote --target notes_2020
//!
//! # Rebuild a single year file
//! annal aggregate --year 2020
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use annal::config;
use annal::store::Store;
use annal::{aggregate, classify, engine, queue, status, worker};

/// Annal — an incremental personal-log archival pipeline.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `annal.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "annal",
    about = "Annal — turn free-form personal logs into a structured yearly event archive",
    version,
    long_about = "Annal classifies raw note files, splits them into month buckets, extracts \
    structured events through an LLM engine (local Ollama, remote, or hybrid with fallback), \
    de-duplicates them, and consolidates everything into authoritative per-year JSON archives."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./annal.toml`. Corpus location, engine profiles, and
    /// all thresholds are read from this file.
    #[arg(long, global = true, default_value = "./annal.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Classify unmanifested documents into the file manifest.
    ///
    /// Consults the override table, filename era tags, and the extraction
    /// engine's rubric judgment, in that order. Files already in the
    /// manifest are never re-classified; use `nudge` to force one through
    /// again.
    Classify,

    /// Chunk classified documents and enqueue new or changed chunks.
    ///
    /// Recomputes every chunk, compares content hashes against the state
    /// map, and enqueues only chunks whose text is new or changed. Safe to
    /// re-run at any time.
    Scan,

    /// Consume the work queue through the extraction engine.
    ///
    /// Processes items in descending priority order, waiting on the
    /// politeness gate before each one. Chunks whose extraction fails or
    /// comes back empty stay uncommitted and are retried on a later run.
    Extract {
        /// Engine profile override: `local`, `remote`, or `hybrid`.
        #[arg(long)]
        engine: Option<String>,

        /// Maximum number of queue items to process in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Only process items whose filename contains this substring.
        #[arg(long)]
        target: Option<String>,
    },

    /// Consolidate bucket files into authoritative year files.
    ///
    /// Existing year-file entries win ties, so manual curation survives.
    Aggregate {
        /// Only rebuild this year's file (e.g. `2020`).
        #[arg(long)]
        year: Option<String>,
    },

    /// Run the whole pipeline: classify, scan, extract, aggregate.
    Run {
        /// Maximum number of queue items to extract in this run.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Force files back through classification and re-extraction.
    ///
    /// Removes manifest entries whose filename contains the pattern and
    /// invalidates their chunk state, so the next `classify` and `scan`
    /// pick them up again.
    Nudge {
        /// Filename substring to invalidate.
        pattern: String,
    },

    /// Print the current pipeline status snapshot.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("annal=info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let store = Store::new(&cfg.data.dir);

    match cli.command {
        Commands::Classify => {
            let engine = engine::create_engine(&cfg.engine, None)?;
            let classified = classify::run_classify(&cfg, &store, engine.as_ref()).await?;
            println!("Classified {} new document(s).", classified);
        }
        Commands::Scan => {
            let report = queue::run_scan(&cfg, &store)?;
            println!(
                "Scanned {} document(s), {} chunk(s); enqueued {}, {} pending.",
                report.documents_seen, report.chunks_seen, report.enqueued, report.pending
            );
        }
        Commands::Extract {
            engine: profile,
            limit,
            target,
        } => {
            let engine = engine::create_engine(&cfg.engine, profile.as_deref())?;
            let report =
                worker::run_extract(&cfg, &store, engine.as_ref(), limit, target.as_deref())
                    .await?;
            print_extract_report(&report);
        }
        Commands::Aggregate { year } => {
            let report = aggregate::run_aggregate(&store, year.as_deref())?;
            println!(
                "Aggregated {} year(s), {} event(s) total.",
                report.years_updated.len(),
                report.events_total
            );
        }
        Commands::Run { limit } => {
            let engine = engine::create_engine(&cfg.engine, None)?;

            let classified = classify::run_classify(&cfg, &store, engine.as_ref()).await?;
            println!("Classified {} new document(s).", classified);

            let scan = queue::run_scan(&cfg, &store)?;
            println!("Enqueued {} chunk(s), {} pending.", scan.enqueued, scan.pending);

            let report =
                worker::run_extract(&cfg, &store, engine.as_ref(), limit, None).await?;
            print_extract_report(&report);

            let agg = aggregate::run_aggregate(&store, None)?;
            println!(
                "Aggregated {} year(s), {} event(s) total.",
                agg.years_updated.len(),
                agg.events_total
            );
        }
        Commands::Nudge { pattern } => {
            let (manifest_removed, state_removed) = classify::nudge(&store, &pattern)?;
            println!(
                "Nudged '{}': removed {} manifest entr(ies), invalidated {} chunk state(s).",
                pattern, manifest_removed, state_removed
            );
        }
        Commands::Status => {
            status::print_status(&store);
        }
    }

    Ok(())
}

fn print_extract_report(report: &worker::ExtractReport) {
    println!(
        "Processed {} item(s): {} event(s) archived, {} routed to the privacy audit.",
        report.items_processed, report.events_accepted, report.events_audited
    );
    if report.yielded {
        println!("Host is busy; remaining items stay queued. Re-run to continue.");
    }
}
