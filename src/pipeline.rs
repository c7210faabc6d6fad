//! Ingestion orchestrator.
//!
//! Sequences one run through
//! `Idle → Fetching → Extracting → Validating → Done`. Any stage failure ends
//! the run in `Failed(cause)`. The orchestrator does no network or parsing
//! work itself: it composes a [`DocumentFetcher`] and an
//! [`ExtractorProvider`], so both can be replaced with fakes.
//!
//! Retries happen inside the fetcher only; a failed stage is never re-run.

use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{FailureCause, IngestError};
use crate::factory::ExtractorProvider;
use crate::fetcher::{DocumentFetcher, FetchRequest};
use crate::models::{dataset_id_for, Dataset, IngestRecord, Metadata, ValidationWarning};
use crate::validation::{ValidationMode, Validator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Fetching,
    Extracting,
    Validating,
    Done,
    Failed(FailureCause),
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed(_))
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => f.write_str("idle"),
            PipelineState::Fetching => f.write_str("fetching"),
            PipelineState::Extracting => f.write_str("extracting"),
            PipelineState::Validating => f.write_str("validating"),
            PipelineState::Done => f.write_str("done"),
            PipelineState::Failed(cause) => write!(f, "failed({})", cause),
        }
    }
}

/// Successful run.
#[derive(Debug)]
pub struct IngestOutcome {
    pub record: IngestRecord,
    /// Every state entered, starting with `Idle` and ending with `Done`.
    pub transitions: Vec<PipelineState>,
}

impl IngestOutcome {
    pub fn warnings(&self) -> &[ValidationWarning] {
        &self.record.metadata.warnings
    }
}

/// Failed run: the error plus the stage it happened in.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct PipelineError {
    /// Stage that was active when the run failed.
    pub stage: PipelineState,
    #[source]
    pub error: IngestError,
    /// Every state entered, ending with `Failed(cause)`.
    pub transitions: Vec<PipelineState>,
}

impl PipelineError {
    pub fn cause(&self) -> FailureCause {
        self.error.cause()
    }

    pub fn exit_code(&self) -> u8 {
        self.cause().exit_code()
    }
}

/// State of one run. Created per call to [`Pipeline::run`].
struct RunState {
    state: PipelineState,
    transitions: Vec<PipelineState>,
}

impl RunState {
    fn new() -> Self {
        Self {
            state: PipelineState::Idle,
            transitions: vec![PipelineState::Idle],
        }
    }

    fn advance(&mut self, identifier: &str, next: PipelineState) {
        debug!(identifier, from = %self.state, to = %next, "pipeline transition");
        self.state = next;
        self.transitions.push(next);
    }

    fn fail(mut self, identifier: &str, error: IngestError) -> PipelineError {
        let stage = self.state;
        let cause = error.cause();
        warn!(identifier, %stage, %cause, error = %error, "ingestion failed");
        self.advance(identifier, PipelineState::Failed(cause));
        PipelineError {
            stage,
            error,
            transitions: self.transitions,
        }
    }
}

pub struct Pipeline<F, P> {
    fetcher: F,
    provider: P,
    validator: Validator,
}

impl<F, P> Pipeline<F, P>
where
    F: DocumentFetcher,
    P: ExtractorProvider,
{
    /// Validation mode follows the provider's.
    pub fn new(fetcher: F, provider: P) -> Self {
        let validator = Validator::new(provider.mode());
        Self {
            fetcher,
            provider,
            validator,
        }
    }

    pub fn mode(&self) -> ValidationMode {
        self.validator.mode()
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Ingest one identifier.
    pub async fn run(&self, request: &FetchRequest) -> Result<IngestOutcome, PipelineError> {
        let identifier = request.identifier.as_str();
        let mut run = RunState::new();

        run.advance(identifier, PipelineState::Fetching);
        let document = match self.fetcher.fetch(request).await {
            Ok(doc) => doc,
            Err(e) => return Err(run.fail(identifier, e.into())),
        };

        run.advance(identifier, PipelineState::Extracting);
        let extractor = match self.provider.for_format(document.format().token()) {
            Ok(extractor) => extractor,
            Err(e) => return Err(run.fail(identifier, e.into())),
        };
        debug!(identifier, extractor = extractor.describe(), path = %document.path().display(), "extracting");

        // The temp file moves into the blocking task and is deleted when the
        // task drops it.
        let source_url = document.url().to_string();
        let extracted = tokio::task::spawn_blocking(move || {
            let result = extractor.extract(document.path());
            drop(document);
            result
        })
        .await;
        let metadata = match extracted {
            Ok(Ok(metadata)) => metadata,
            Ok(Err(e)) => return Err(run.fail(identifier, e.into())),
            Err(join) => {
                return Err(run.fail(
                    identifier,
                    IngestError::Unexpected(format!("extraction task failed: {}", join)),
                ))
            }
        };

        run.advance(identifier, PipelineState::Validating);
        let id = dataset_id_for(&request.catalogue, identifier);
        let record = match assemble_record(&self.validator, metadata, id, source_url) {
            Ok(record) => record,
            Err(e) => return Err(run.fail(identifier, e)),
        };

        run.advance(identifier, PipelineState::Done);
        info!(
            identifier,
            dataset_id = %record.id(),
            format = %record.metadata.document_format,
            warnings = record.metadata.warnings.len(),
            "ingested"
        );
        Ok(IngestOutcome {
            record,
            transitions: run.transitions,
        })
    }
}

/// Re-run the validator on a finished record and pair it with its dataset.
///
/// Findings not already recorded by the extractor are appended to
/// `metadata.warnings`.
pub fn assemble_record(
    validator: &Validator,
    mut metadata: Metadata,
    id: Uuid,
    source_url: String,
) -> Result<IngestRecord, IngestError> {
    let findings = validator.check(&metadata)?;
    for finding in findings {
        if !metadata.warnings.contains(&finding) {
            metadata.warnings.push(finding);
        }
    }

    let dataset = Dataset::new(
        id,
        metadata.title.clone(),
        metadata.abstract_text.clone(),
        source_url,
    );
    if !dataset.is_complete() {
        return Err(IngestError::Unexpected(format!(
            "dataset {} is incomplete after validation",
            id
        )));
    }
    Ok(IngestRecord {
        dataset,
        metadata,
        data_files: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::factory::ExtractorFactory;
    use crate::fetcher::FetchedDocument;
    use crate::models::DocumentFormat;
    use async_trait::async_trait;

    struct StaticFetcher {
        format: DocumentFormat,
        body: &'static str,
    }

    #[async_trait]
    impl DocumentFetcher for StaticFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<FetchedDocument, FetchError> {
            FetchedDocument::from_bytes(
                &request.identifier,
                "http://fake/doc",
                self.format,
                self.body.as_bytes(),
                None,
            )
            .map_err(|source| FetchError::Storage {
                identifier: request.identifier.clone(),
                source,
            })
        }
    }

    struct DownFetcher;

    #[async_trait]
    impl DocumentFetcher for DownFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<FetchedDocument, FetchError> {
            Err(FetchError::Exhausted {
                identifier: request.identifier.clone(),
                reason: "connection refused".into(),
                attempts: 3,
            })
        }
    }

    const COMPLETE: &str = r#"{
        "title": "River flows",
        "abstract": "Daily flows.",
        "keywords": ["hydrology"],
        "contact": {"organization": "UKCEH"},
        "metadata_date": "2023-01-01",
        "language": "eng",
        "topic_category": "inlandWaters"
    }"#;

    #[tokio::test]
    async fn successful_run_walks_every_state() {
        let pipeline = Pipeline::new(
            StaticFetcher {
                format: DocumentFormat::Json,
                body: COMPLETE,
            },
            ExtractorFactory::new(ValidationMode::Strict),
        );
        let outcome = pipeline
            .run(&FetchRequest::new("abc123", "ceh"))
            .await
            .unwrap();

        assert_eq!(
            outcome.transitions,
            vec![
                PipelineState::Idle,
                PipelineState::Fetching,
                PipelineState::Extracting,
                PipelineState::Validating,
                PipelineState::Done,
            ]
        );
        assert_eq!(outcome.record.dataset.title, "River flows");
        assert_eq!(outcome.record.dataset.source_url, "http://fake/doc");
        assert_eq!(outcome.record.id(), dataset_id_for("ceh", "abc123"));
        assert!(outcome.warnings().is_empty());
    }

    #[tokio::test]
    async fn fetch_failure_maps_to_fetch_cause() {
        let pipeline = Pipeline::new(DownFetcher, ExtractorFactory::new(ValidationMode::Lenient));
        let err = pipeline
            .run(&FetchRequest::new("abc123", "ceh"))
            .await
            .unwrap_err();
        assert_eq!(err.stage, PipelineState::Fetching);
        assert_eq!(err.cause(), FailureCause::FetchFailure);
        assert_eq!(err.exit_code(), 1);
        assert_eq!(
            err.transitions.last(),
            Some(&PipelineState::Failed(FailureCause::FetchFailure))
        );
    }

    #[tokio::test]
    async fn malformed_document_is_an_extraction_failure() {
        let pipeline = Pipeline::new(
            StaticFetcher {
                format: DocumentFormat::Json,
                body: "[1, 2",
            },
            ExtractorFactory::new(ValidationMode::Lenient),
        );
        let err = pipeline.run(&FetchRequest::new("x", "ceh")).await.unwrap_err();
        assert_eq!(err.stage, PipelineState::Extracting);
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn unregistered_format_is_an_extraction_failure() {
        let pipeline = Pipeline::new(
            StaticFetcher {
                format: DocumentFormat::Rdf,
                body: "<a> <b> <c> .",
            },
            ExtractorFactory::empty(ValidationMode::Lenient),
        );
        let err = pipeline.run(&FetchRequest::new("x", "ceh")).await.unwrap_err();
        assert!(matches!(err.error, IngestError::UnsupportedFormat(_)));
        assert_eq!(err.cause(), FailureCause::ExtractionFailure);
    }

    #[tokio::test]
    async fn strict_missing_field_is_a_validation_failure() {
        let pipeline = Pipeline::new(
            StaticFetcher {
                format: DocumentFormat::Json,
                body: r#"{"title": "T", "abstract": "A"}"#,
            },
            ExtractorFactory::new(ValidationMode::Strict),
        );
        let err = pipeline.run(&FetchRequest::new("x", "ceh")).await.unwrap_err();
        assert_eq!(err.cause(), FailureCause::ValidationFailure);
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn lenient_run_keeps_warnings() {
        let pipeline = Pipeline::new(
            StaticFetcher {
                format: DocumentFormat::Json,
                body: r#"{"title": "T", "abstract": "A"}"#,
            },
            ExtractorFactory::new(ValidationMode::Lenient),
        );
        let outcome = pipeline.run(&FetchRequest::new("x", "ceh")).await.unwrap();
        let fields: Vec<&str> = outcome.warnings().iter().map(|w| w.field.as_str()).collect();
        assert!(fields.contains(&"topic_category"));
        assert!(fields.contains(&"dataset_language"));
        assert_eq!(outcome.record.metadata.dataset_language, "eng");
    }

    #[test]
    fn states_display() {
        assert_eq!(PipelineState::Validating.to_string(), "validating");
        assert_eq!(
            PipelineState::Failed(FailureCause::ValidationFailure).to_string(),
            "failed(validation)"
        );
        assert!(PipelineState::Done.is_terminal());
        assert!(!PipelineState::Fetching.is_terminal());
    }
}
