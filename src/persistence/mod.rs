//! Durable storage for the rebalance job document.
//!
//! A single JSON document at `storage/<name>.json` holds the live job.
//! Saves are write-then-atomic-replace so a crash mid-write never leaves a
//! torn document. Finished jobs are archived under `storage/archive/`
//! keyed by timestamp, which also clears the live document.

use crate::engine::job::RebalanceJob;
use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Single-document JSON store with atomic replace and archival.
pub struct StateStore {
    path: PathBuf,
    archive_dir: PathBuf,
}

impl StateStore {
    /// Create a store rooted at `dir`, persisting to `<dir>/<name>.json`.
    /// Directories are created lazily on first save.
    pub fn new<P: AsRef<Path>>(dir: P, name: &str) -> Self {
        let dir = dir.as_ref();
        Self {
            path: dir.join(format!("{}.json", name)),
            archive_dir: dir.join("archive"),
        }
    }

    /// Path of the live document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted job, or `None` when no document exists.
    pub fn load(&self) -> Result<Option<RebalanceJob>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read state document {:?}", self.path))
            }
        };

        let job: RebalanceJob = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse state document {:?}", self.path))?;

        info!(state = job.phase.name(), path = ?self.path, "Loaded persisted rebalance state");
        Ok(Some(job))
    }

    /// Persist the job. The document is written to a `.tmp` sibling and
    /// renamed over the live path, so readers only ever see a complete
    /// document.
    pub fn save(&self, job: &RebalanceJob) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create state directory {:?}", parent))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let raw = serde_json::to_string_pretty(job).context("Failed to serialize state")?;
        fs::write(&tmp, raw)
            .with_context(|| format!("Failed to write state document {:?}", tmp))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace state document {:?}", self.path))?;

        debug!(state = job.phase.name(), "State saved");
        Ok(())
    }

    /// Move the live document into the archive, keyed by the current
    /// timestamp, and clear the live slot. Returns the archived path.
    pub fn archive(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.archive_dir)
            .with_context(|| format!("Failed to create archive directory {:?}", self.archive_dir))?;

        let target = self
            .archive_dir
            .join(format!("rebalance-{}.json", Utc::now().timestamp_millis()));
        fs::rename(&self.path, &target)
            .with_context(|| format!("Failed to archive state document to {:?}", target))?;

        info!(archived = ?target, "Rebalance document archived");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::job::{JobSpec, RebalancePhase};
    use crate::token::Token;

    fn sample_job() -> RebalanceJob {
        RebalanceJob::new(RebalancePhase::Triggered {
            spec: JobSpec {
                src_token: Token::Btc,
                src_token_address: None,
                dst_token: Token::Usdc,
                dst_token_address: Some("usdc-mint".to_string()),
                amount_out: 100_000,
            },
        })
    }

    #[test]
    fn test_load_absent_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), "state");
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), "state");

        let job = sample_job();
        store.save(&job).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, job);

        // No stray temp file left behind.
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn test_save_replaces_previous_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), "state");

        store.save(&sample_job()).unwrap();
        let finished = RebalanceJob::new(RebalancePhase::Finished);
        store.save(&finished).unwrap();

        assert_eq!(store.load().unwrap().unwrap(), finished);
    }

    #[test]
    fn test_archive_moves_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), "state");

        store.save(&sample_job()).unwrap();
        let archived = store.archive().unwrap();

        assert!(archived.starts_with(dir.path().join("archive")));
        assert!(archived.file_name().unwrap().to_string_lossy().starts_with("rebalance-"));
        assert!(archived.exists());
        assert!(store.load().unwrap().is_none());
    }
}
