//! Request-scoped temporary storage.
//!
//! Every upload request gets its own directory under the configured temp
//! root, so two requests uploading `scan.png` at the same moment never
//! touch the same file. The directory and everything in it is removed
//! when the [`RequestWorkspace`] is dropped.

use std::fmt;
use std::path::{Path, PathBuf};

use axum::body::Bytes;
use futures::{Stream, StreamExt};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CardscanError, Result};
use crate::ocr::preprocessed_path;

/// Directory name prefix; the janitor only ever deletes entries carrying it.
pub const WORKSPACE_PREFIX: &str = "cardscan-";

pub struct RequestWorkspace {
    request_id: Uuid,
    dir: TempDir,
}

/// One uploaded file, fully written to disk.
///
/// The file and any preprocessed image derived from it are removed on drop.
/// The original client filename is kept for the response; the on-disk name
/// is sanitised.
#[derive(Debug)]
pub struct TempArtifact {
    pub index: usize,
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(preprocessed_path(&self.path));
        let _ = std::fs::remove_file(&self.path);
    }
}

impl RequestWorkspace {
    pub fn create(root: &Path, request_id: Uuid) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(|e| {
            warn!(root = %root.display(), "Cannot create temp root: {}", e);
            CardscanError::Storage("Could not create temp directory".to_string())
        })?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("{WORKSPACE_PREFIX}{request_id}-"))
            .tempdir_in(root)
            .map_err(|e| {
                warn!(root = %root.display(), "Cannot create request workspace: {}", e);
                CardscanError::Storage("Could not create temp directory".to_string())
            })?;

        debug!(path = %dir.path().display(), "Request workspace created");
        Ok(Self { request_id, dir })
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Stream `body` to `<workspace>/<index>-<sanitised filename>`.
    ///
    /// Read errors on `body` are client errors; write errors are storage errors.
    pub async fn persist<S, E>(&self, index: usize, filename: &str, body: S) -> Result<TempArtifact>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: fmt::Display,
    {
        let path = self
            .path()
            .join(format!("{index}-{}", sanitize_filename(filename)));

        let mut file = tokio::fs::File::create(&path).await.map_err(|e| {
            warn!(path = %path.display(), "Cannot create temp file: {}", e);
            CardscanError::Storage("Could not create temp file".to_string())
        })?;

        // Owns the path from here on so a failed copy leaves nothing behind.
        let mut artifact = TempArtifact {
            index,
            filename: filename.to_string(),
            path,
            size: 0,
        };

        let mut body = std::pin::pin!(body);
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| {
                CardscanError::Validation(format!(
                    "Error parsing form: failed to read '{filename}': {e}"
                ))
            })?;
            file.write_all(&chunk).await.map_err(|e| {
                warn!(path = %artifact.path.display(), "Cannot write temp file: {}", e);
                CardscanError::Storage("Could not write temp file".to_string())
            })?;
            artifact.size += chunk.len() as u64;
        }

        file.flush().await.map_err(|e| {
            warn!(path = %artifact.path.display(), "Cannot flush temp file: {}", e);
            CardscanError::Storage("Could not write temp file".to_string())
        })?;

        Ok(artifact)
    }

    /// Replace workspace paths in `message` so clients never see them.
    pub fn scrub(&self, message: &str) -> String {
        let root = self.path().to_string_lossy();
        message
            .replace(&format!("{root}{}", std::path::MAIN_SEPARATOR), "")
            .replace(root.as_ref(), "")
    }
}

/// Keep the final path component and replace anything outside `[A-Za-z0-9._-]`.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}
