//! Hash-gated work queue construction.
//!
//! Recomputes every chunk of every classified document and enqueues
//! exactly those whose content hash differs from the state map's last
//! committed hash for that chunk identity. The queue is deduplicated by
//! identity on enqueue and kept sorted by descending priority; each item
//! carries the chunk's full text so the queue file alone can resume work.

use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::chunker::chunk_document;
use crate::config::Config;
use crate::corpus::scan_corpus;
use crate::models::{chunk_identity, DocKind, WorkItem};
use crate::store::Store;

/// Hex SHA-256 digest of a chunk's exact text. The sole signal used to
/// decide "already processed."
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Outcome of one scan pass.
#[derive(Debug, Clone, Copy)]
pub struct ScanReport {
    pub documents_seen: usize,
    pub chunks_seen: usize,
    pub enqueued: usize,
    pub pending: usize,
}

/// Rebuild chunks for the whole corpus and enqueue new or changed ones.
pub fn run_scan(config: &Config, store: &Store) -> Result<ScanReport> {
    store.ensure_dirs()?;
    let manifest = store.load_manifest();
    let state = store.load_state();
    let mut queue = store.load_queue();

    let docs = scan_corpus(&config.corpus)?;

    let mut report = ScanReport {
        documents_seen: 0,
        chunks_seen: 0,
        enqueued: 0,
        pending: 0,
    };

    for doc in &docs {
        let Some(record) = manifest.get(&doc.filename) else {
            // Unclassified documents wait for the next classify pass.
            continue;
        };
        if matches!(record.kind, DocKind::Reference | DocKind::Unknown) {
            continue;
        }
        if is_denylisted(config, &doc.filename) {
            tracing::debug!("skipping denylisted file {}", doc.filename);
            continue;
        }
        report.documents_seen += 1;

        let chunks = chunk_document(
            record.kind,
            record.year.as_deref(),
            &doc.content,
            &config.chunker,
        );

        for (bucket, content) in chunks {
            report.chunks_seen += 1;
            let identity = chunk_identity(&doc.filename, &bucket);
            let hash = content_hash(&content);

            if state.get(&identity) == Some(&hash) {
                continue;
            }
            // At most one pending item per chunk identity.
            if queue.iter().any(|item| item.id == identity) {
                continue;
            }

            tracing::info!("queueing {} (new or changed)", identity);
            queue.push(WorkItem {
                id: identity,
                filename: doc.filename.clone(),
                bucket,
                kind: record.kind,
                priority: record.kind.priority(),
                content,
            });
            report.enqueued += 1;
        }
    }

    // Stable sort: descending priority, insertion order within a priority.
    queue.sort_by_key(|item| std::cmp::Reverse(item.priority));
    store.save_queue(&queue)?;

    report.pending = queue.len();
    Ok(report)
}

/// Reference-style documents are never enqueued regardless of how they
/// were classified.
fn is_denylisted(config: &Config, filename: &str) -> bool {
    config
        .corpus
        .reference_denylist
        .iter()
        .any(|needle| filename.to_lowercase().contains(&needle.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CorpusConfig, DataConfig};
    use crate::models::{ClassRecord, Manifest};
    use std::fs;
    use tempfile::TempDir;

    fn test_config(root: &std::path::Path, data: &std::path::Path) -> Config {
        Config {
            corpus: CorpusConfig {
                root: root.to_path_buf(),
                include_globs: vec!["**/*.txt".into()],
                exclude_globs: vec![],
                reference_denylist: vec!["GIT".into(), "resume".into()],
            },
            data: DataConfig {
                dir: data.to_path_buf(),
            },
            classifier: Default::default(),
            chunker: Default::default(),
            worker: Default::default(),
            engine: Default::default(),
            gate: Default::default(),
        }
    }

    fn log_record(year: Option<&str>) -> ClassRecord {
        ClassRecord {
            kind: DocKind::Log,
            year: year.map(String::from),
            topic: None,
            tags: vec![],
            note: None,
            manual_review: false,
        }
    }

    fn setup(content: &str) -> (TempDir, Config, Store) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("notes");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("notes_2020.txt"), content).unwrap();

        let config = test_config(&root, &tmp.path().join("data"));
        let store = Store::new(&config.data.dir);
        store.ensure_dirs().unwrap();

        let mut manifest = Manifest::new();
        manifest.insert("notes_2020.txt".into(), log_record(Some("2020")));
        store.save_manifest(&manifest).unwrap();

        (tmp, config, store)
    }

    #[test]
    fn new_chunks_are_enqueued_with_content() {
        let (_tmp, config, store) = setup("1/5/2020 Fixed IPMI retry bug\n");
        let report = run_scan(&config, &store).unwrap();
        assert_eq!(report.enqueued, 1);

        let queue = store.load_queue();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].id, "notes_2020.txt::2020-01");
        assert_eq!(queue[0].content, "1/5/2020 Fixed IPMI retry bug");
    }

    #[test]
    fn committed_hash_suppresses_enqueue() {
        let (_tmp, config, store) = setup("1/5/2020 Fixed IPMI retry bug\n");

        let mut state = crate::models::StateMap::new();
        state.insert(
            "notes_2020.txt::2020-01".into(),
            content_hash("1/5/2020 Fixed IPMI retry bug"),
        );
        store.save_state(&state).unwrap();

        let report = run_scan(&config, &store).unwrap();
        assert_eq!(report.enqueued, 0);
        assert!(store.load_queue().is_empty());
    }

    #[test]
    fn one_character_change_reenqueues() {
        let (tmp, config, store) = setup("1/5/2020 Fixed IPMI retry bug\n");
        run_scan(&config, &store).unwrap();

        // Commit the current hash, then touch the content by one character.
        let mut state = crate::models::StateMap::new();
        state.insert(
            "notes_2020.txt::2020-01".into(),
            content_hash("1/5/2020 Fixed IPMI retry bug"),
        );
        store.save_state(&state).unwrap();
        store.save_queue(&[]).unwrap();

        fs::write(
            tmp.path().join("notes").join("notes_2020.txt"),
            "1/5/2020 Fixed IPMI retry bug!\n",
        )
        .unwrap();

        let report = run_scan(&config, &store).unwrap();
        assert_eq!(report.enqueued, 1);
    }

    #[test]
    fn rescan_does_not_duplicate_pending_items() {
        let (_tmp, config, store) = setup("1/5/2020 Fixed IPMI retry bug\n");
        run_scan(&config, &store).unwrap();
        let report = run_scan(&config, &store).unwrap();
        assert_eq!(report.enqueued, 0);
        assert_eq!(store.load_queue().len(), 1);
    }

    #[test]
    fn meta_chunks_sort_before_log_chunks() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("notes");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("notes_2020.txt"), "1/5/2020 log entry\n").unwrap();
        fs::write(root.join("review.txt"), "performance review text\n").unwrap();

        let mut config = test_config(&root, &tmp.path().join("data"));
        config.corpus.include_globs = vec!["**/*.txt".into()];
        let store = Store::new(&config.data.dir);
        store.ensure_dirs().unwrap();

        let mut manifest = Manifest::new();
        manifest.insert("notes_2020.txt".into(), log_record(Some("2020")));
        manifest.insert(
            "review.txt".into(),
            ClassRecord {
                kind: DocKind::Meta,
                year: Some("2008-2018".into()),
                topic: None,
                tags: vec![],
                note: None,
                manual_review: false,
            },
        );
        store.save_manifest(&manifest).unwrap();

        run_scan(&config, &store).unwrap();
        let queue = store.load_queue();
        assert_eq!(queue[0].kind, DocKind::Meta);
        assert!(queue[0].priority > queue[1].priority);
    }

    #[test]
    fn denylisted_files_never_enqueue() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("notes");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("notes_GIT_commands.txt"), "1/5/2020 not really\n").unwrap();

        let config = test_config(&root, &tmp.path().join("data"));
        let store = Store::new(&config.data.dir);
        store.ensure_dirs().unwrap();

        let mut manifest = Manifest::new();
        manifest.insert("notes_GIT_commands.txt".into(), log_record(None));
        store.save_manifest(&manifest).unwrap();

        let report = run_scan(&config, &store).unwrap();
        assert_eq!(report.enqueued, 0);
    }

    #[test]
    fn reference_and_unknown_documents_are_excluded() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("notes");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("cheatsheet.txt"), "how to do things\n").unwrap();

        let config = test_config(&root, &tmp.path().join("data"));
        let store = Store::new(&config.data.dir);
        store.ensure_dirs().unwrap();

        let mut manifest = Manifest::new();
        manifest.insert(
            "cheatsheet.txt".into(),
            ClassRecord {
                kind: DocKind::Reference,
                year: None,
                topic: Some("shell tricks".into()),
                tags: vec![],
                note: None,
                manual_review: false,
            },
        );
        store.save_manifest(&manifest).unwrap();

        let report = run_scan(&config, &store).unwrap();
        assert_eq!(report.enqueued, 0);
        assert_eq!(report.documents_seen, 0);
    }
}
