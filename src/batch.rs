//! Batch ingestion.
//!
//! Identifiers are read from a text file (one per line, `#` comments and
//! blank lines skipped) and run through one shared [`Pipeline`]. Runs are
//! independent: up to `jobs` execute concurrently, a failed identifier never
//! stops the batch, and results come back in input order.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::error::{FailureCause, IngestError};
use crate::factory::ExtractorProvider;
use crate::fetcher::{DocumentFetcher, FetchRequest};
use crate::pipeline::{IngestOutcome, Pipeline, PipelineError, PipelineState};

/// Parse an identifier list.
pub fn parse_identifiers(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Read an identifier file, keeping at most `max` entries.
pub fn load_identifiers(path: &Path, max: Option<usize>) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read identifier file: {}", path.display()))?;
    let mut identifiers = parse_identifiers(&text);
    if let Some(max) = max {
        identifiers.truncate(max);
    }
    Ok(identifiers)
}

/// Result for one identifier.
#[derive(Debug)]
pub struct BatchItem {
    pub identifier: String,
    pub result: Result<IngestOutcome, PipelineError>,
}

/// One failed identifier, as reported in the summary.
#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub identifier: String,
    pub cause: FailureCause,
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    /// In input order.
    pub failures: Vec<BatchFailure>,
}

impl BatchSummary {
    pub fn from_items(items: &[BatchItem]) -> Self {
        let mut summary = BatchSummary {
            total: items.len(),
            ..Default::default()
        };
        for item in items {
            match &item.result {
                Ok(_) => summary.succeeded += 1,
                Err(e) => summary.failures.push(BatchFailure {
                    identifier: item.identifier.clone(),
                    cause: e.cause(),
                    kind: e.error.kind(),
                    message: e.error.to_string(),
                }),
            }
        }
        summary
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn count(&self, cause: FailureCause) -> usize {
        self.failures.iter().filter(|f| f.cause == cause).count()
    }

    /// `0` when everything succeeded, else the exit code of the first failure.
    pub fn exit_code(&self) -> u8 {
        self.failures
            .first()
            .map(|f| f.cause.exit_code())
            .unwrap_or(0)
    }

    /// Human-readable report listing at most `max_errors` failures.
    pub fn render(&self, max_errors: usize) -> String {
        let mut lines = vec![format!(
            "Processed {} identifiers: {} succeeded, {} failed",
            self.total,
            self.succeeded,
            self.failed()
        )];
        for cause in [
            FailureCause::FetchFailure,
            FailureCause::ExtractionFailure,
            FailureCause::ValidationFailure,
            FailureCause::UnexpectedFailure,
        ] {
            let n = self.count(cause);
            if n > 0 {
                lines.push(format!("  {}: {}", cause, n));
            }
        }
        for failure in self.failures.iter().take(max_errors) {
            lines.push(format!(
                "  {} -> {}: {}",
                failure.identifier, failure.kind, failure.message
            ));
        }
        if self.failed() > max_errors {
            lines.push(format!("  ... and {} more", self.failed() - max_errors));
        }
        lines.join("\n")
    }
}

/// Run every request through `pipeline` with at most `jobs` in flight.
pub async fn run_batch<F, P>(
    pipeline: Arc<Pipeline<F, P>>,
    requests: Vec<FetchRequest>,
    jobs: usize,
) -> Vec<BatchItem>
where
    F: DocumentFetcher + 'static,
    P: ExtractorProvider + 'static,
{
    let identifiers: Vec<String> = requests.iter().map(|r| r.identifier.clone()).collect();
    let semaphore = Arc::new(Semaphore::new(jobs.max(1)));
    let mut set = JoinSet::new();

    info!(identifiers = requests.len(), jobs = jobs.max(1), "starting batch");

    for (index, request) in requests.into_iter().enumerate() {
        let pipeline = Arc::clone(&pipeline);
        let semaphore = Arc::clone(&semaphore);
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let result = pipeline.run(&request).await;
            (index, result)
        });
    }

    let mut results: Vec<Option<Result<IngestOutcome, PipelineError>>> =
        identifiers.iter().map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, result)) => results[index] = Some(result),
            Err(e) => error!(error = %e, "batch task failed"),
        }
    }

    identifiers
        .into_iter()
        .zip(results)
        .map(|(identifier, result)| {
            let result = result.unwrap_or_else(|| {
                Err(PipelineError {
                    stage: PipelineState::Idle,
                    error: IngestError::Unexpected("ingestion task aborted".to_string()),
                    transitions: vec![
                        PipelineState::Idle,
                        PipelineState::Failed(FailureCause::UnexpectedFailure),
                    ],
                })
            });
            BatchItem { identifier, result }
        })
        .collect()
}
