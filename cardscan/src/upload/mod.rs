//! Upload orchestration: temp storage per request and the per-file fan-out
//! to the recognition backend.

pub mod janitor;
pub mod workspace;

use futures::{stream, StreamExt, TryStreamExt};

use crate::config::AggregationPolicy;
use crate::error::CardscanError;
use crate::ocr::Recognizer;

pub use janitor::WorkspaceSweeper;
pub use workspace::{sanitize_filename, RequestWorkspace, TempArtifact, WORKSPACE_PREFIX};

/// Result of recognising one uploaded file.
#[derive(Debug)]
pub struct FileOutcome {
    pub index: usize,
    pub filename: String,
    pub result: std::result::Result<String, CardscanError>,
}

/// The failure that aborted a fail-fast batch.
#[derive(Debug)]
pub struct FileFailure {
    pub index: usize,
    pub filename: String,
    pub error: CardscanError,
}

/// Recognise every artifact, at most `concurrency` at a time.
///
/// Outcomes come back in input order whatever order the backend finishes
/// in. Under [`AggregationPolicy::FailFast`] the first failure in input
/// order ends the batch and in-flight siblings are dropped; under
/// [`AggregationPolicy::Tolerant`] this never returns `Err`.
pub async fn process_batch(
    recognizer: &dyn Recognizer,
    artifacts: &[TempArtifact],
    language: &str,
    policy: AggregationPolicy,
    concurrency: usize,
) -> std::result::Result<Vec<FileOutcome>, FileFailure> {
    let calls: Vec<_> = artifacts.iter().map(|artifact| async move {
        let result = recognizer.recognize(&artifact.path, language).await;
        FileOutcome {
            index: artifact.index,
            filename: artifact.filename.clone(),
            result,
        }
    }).collect();
    let outcomes = stream::iter(calls).buffered(concurrency.max(1));

    match policy {
        AggregationPolicy::Tolerant => Ok(outcomes.collect().await),
        AggregationPolicy::FailFast => {
            outcomes
                .map(|outcome| match outcome.result {
                    Ok(_) => Ok(outcome),
                    Err(error) => Err(FileFailure {
                        index: outcome.index,
                        filename: outcome.filename,
                        error,
                    }),
                })
                .try_collect()
                .await
        }
    }
}
