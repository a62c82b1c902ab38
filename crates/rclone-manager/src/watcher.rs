//! File watcher feeding the reconfiguration trigger.
//!
//! Watches the directories holding the desired-state file and the rclone
//! config file, so editors that replace a file instead of writing it in place
//! are still seen. Bursts of events are coalesced into one notification.

use anyhow::{Context, Result};
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Quiet time after the last event before a change is reported.
pub const DEBOUNCE: Duration = Duration::from_millis(500);

/// Watches a fixed set of files and sends `()` when any of them changes.
pub struct ConfigWatcher {
    _debouncer: Debouncer<RecommendedWatcher>,
}

impl ConfigWatcher {
    /// Watch `files`, notifying `changes` after each burst of edits.
    pub fn new(files: &[PathBuf], changes: mpsc::Sender<()>) -> Result<Self> {
        let files: BTreeSet<PathBuf> = files.iter().map(|f| absolute(f)).collect();
        let dirs: BTreeSet<PathBuf> = files
            .iter()
            .filter_map(|f| f.parent().map(Path::to_path_buf))
            .collect();

        let watched = files.clone();
        let mut debouncer = new_debouncer(DEBOUNCE, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    if is_relevant(events.iter().map(|e| e.path.as_path()), &watched) {
                        debug!("Config change detected");
                        notify_change(&changes);
                    }
                }
                Err(e) => warn!("File watcher error: {:?}", e),
            }
        })
        .context("Failed to create file watcher")?;

        for dir in &dirs {
            debouncer
                .watcher()
                .watch(dir, RecursiveMode::NonRecursive)
                .with_context(|| format!("Failed to watch {}", dir.display()))?;
        }
        for file in &files {
            info!("Watching {} for changes", file.display());
        }

        Ok(Self {
            _debouncer: debouncer,
        })
    }

    /// Stop watching.
    pub fn stop(self) {
        debug!("File watcher stopped");
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn notify_change(changes: &mpsc::Sender<()>) {
    match changes.try_send(()) {
        // A full channel already holds an unhandled notification.
        Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {}
        Err(mpsc::error::TrySendError::Closed(())) => {
            debug!("Reconfiguration trigger is gone; dropping change");
        }
    }
}

/// Whether any of the changed `paths` is one of the watched `files`.
fn is_relevant<'a>(mut paths: impl Iterator<Item = &'a Path>, files: &BTreeSet<PathBuf>) -> bool {
    paths.any(|p| files.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn files(paths: &[&str]) -> BTreeSet<PathBuf> {
        paths.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_is_relevant() {
        let watched = files(&["/data/config.yaml", "/data/rclone.conf"]);

        let batch = [Path::new("/data/notes.txt"), Path::new("/data/rclone.conf")];
        assert!(is_relevant(batch.into_iter(), &watched));

        let batch = [Path::new("/data/notes.txt"), Path::new("/data/.config.yaml.swp")];
        assert!(!is_relevant(batch.into_iter(), &watched));

        assert!(!is_relevant(std::iter::empty(), &watched));
    }

    #[test]
    fn test_closed_trigger_is_ignored() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        notify_change(&tx);
    }

    #[tokio::test]
    async fn test_write_is_reported_once() {
        let temp_dir = TempDir::new().unwrap();
        let config = temp_dir.path().join("config.yaml");
        std::fs::write(&config, "mounts: []\n").unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let watcher = ConfigWatcher::new(&[config.clone()], tx).unwrap();

        std::fs::write(&config, "mounts: []\nserves: []\n").unwrap();
        std::fs::write(&config, "serves: []\n").unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert_eq!(first.unwrap(), Some(()));
        let second = tokio::time::timeout(DEBOUNCE * 3, rx.recv()).await;
        assert!(second.is_err());

        watcher.stop();
    }

    #[tokio::test]
    async fn test_unrelated_file_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let config = temp_dir.path().join("config.yaml");
        std::fs::write(&config, "mounts: []\n").unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let watcher = ConfigWatcher::new(&[config], tx).unwrap();

        std::fs::write(temp_dir.path().join("notes.txt"), "x").unwrap();
        let change = tokio::time::timeout(DEBOUNCE * 3, rx.recv()).await;
        assert!(change.is_err());

        watcher.stop();
    }
}
