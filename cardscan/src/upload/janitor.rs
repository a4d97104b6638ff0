use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::Result;

use super::workspace::WORKSPACE_PREFIX;

/// Removes request workspaces left behind by a crashed or killed process.
pub struct WorkspaceSweeper {
    root: PathBuf,
    stale_after: Duration,
    interval_secs: u64,
}

impl WorkspaceSweeper {
    pub fn new(root: impl Into<PathBuf>, stale_after_secs: u64, interval_secs: u64) -> Self {
        Self {
            root: root.into(),
            stale_after: Duration::from_secs(stale_after_secs),
            interval_secs,
        }
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs.max(1)
    }

    /// Returns the number of workspaces removed.
    pub async fn run_once(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(WORKSPACE_PREFIX) {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(m) if m.is_dir() => m,
                _ => continue,
            };
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| modified.elapsed().ok());
            match age {
                Some(age) if age >= self.stale_after => {}
                _ => continue,
            }

            match tokio::fs::remove_dir_all(entry.path()).await {
                Ok(()) => {
                    debug!(path = %entry.path().display(), "Removed stale workspace");
                    removed += 1;
                }
                Err(e) => warn!(
                    path = %entry.path().display(),
                    "Failed to remove stale workspace: {}", e
                ),
            }
        }

        if removed > 0 {
            info!("Workspace sweeper removed {} stale workspaces", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_removes_only_prefixed_directories() {
        let root = tempfile::tempdir().unwrap();
        let stale = root.path().join(format!("{WORKSPACE_PREFIX}old-abc"));
        std::fs::create_dir(&stale).unwrap();
        std::fs::write(stale.join("0-card.png"), b"x").unwrap();
        let unrelated = root.path().join("someone-elses-dir");
        std::fs::create_dir(&unrelated).unwrap();
        let prefixed_file = root.path().join(format!("{WORKSPACE_PREFIX}note.txt"));
        std::fs::write(&prefixed_file, b"x").unwrap();

        let sweeper = WorkspaceSweeper::new(root.path(), 0, 600);
        let removed = sweeper.run_once().await.unwrap();

        assert_eq!(removed, 1);
        assert!(!stale.exists());
        assert!(unrelated.exists());
        assert!(prefixed_file.exists());
    }

    #[tokio::test]
    async fn test_keeps_fresh_workspaces() {
        let root = tempfile::tempdir().unwrap();
        let fresh = root.path().join(format!("{WORKSPACE_PREFIX}live"));
        std::fs::create_dir(&fresh).unwrap();

        let sweeper = WorkspaceSweeper::new(root.path(), 3600, 600);
        assert_eq!(sweeper.run_once().await.unwrap(), 0);
        assert!(fresh.exists());
    }

    #[tokio::test]
    async fn test_missing_root_is_not_an_error() {
        let sweeper = WorkspaceSweeper::new("/nonexistent/cardscan-root", 0, 600);
        assert_eq!(sweeper.run_once().await.unwrap(), 0);
    }

    #[test]
    fn test_interval_never_zero() {
        assert_eq!(WorkspaceSweeper::new("/tmp", 0, 0).interval_secs(), 1);
    }
}
