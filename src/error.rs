//! Error taxonomy for the ingestion pipeline.
//!
//! Every failure a run can hit is one of a handful of typed errors. The
//! orchestrator folds them into [`IngestError`] and classifies that into a
//! [`FailureCause`], which in turn decides the CLI exit code:
//!
//! | Cause | Errors | Exit code |
//! |-------|--------|-----------|
//! | `FetchFailure` | [`FetchError`] | 1 |
//! | `ExtractionFailure` | [`ParseError`], [`UnsupportedFormatError`] | 2 |
//! | `ValidationFailure` | [`ValidationError`] | 3 |
//! | `UnexpectedFailure` | anything else (temp storage, unreadable files, panicked parser task) | 4 |

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::models::DocumentFormat;

/// Exit code used when the user interrupts a run (Ctrl-C).
pub const EXIT_INTERRUPTED: u8 = 130;

// ═══════════════════════════════════════════════════════════════════════
// Stage errors
// ═══════════════════════════════════════════════════════════════════════

/// The fetcher could not produce a document for an identifier.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Every URL candidate was tried and none produced a valid document.
    #[error("failed to fetch metadata for {identifier}: {reason}")]
    Exhausted {
        identifier: String,
        /// Failure reason of the last candidate tried.
        reason: String,
        /// Total HTTP attempts made across all candidates.
        attempts: u32,
    },

    /// The requested catalogue has no profile.
    #[error("unknown catalogue '{name}' (known: {known})")]
    UnknownCatalogue { name: String, known: String },

    /// The profile yields no candidate for the requested format.
    #[error("catalogue '{catalogue}' has no endpoint serving {format}")]
    NoCandidates {
        catalogue: String,
        format: DocumentFormat,
    },

    /// The document was downloaded but could not be written to local storage.
    #[error("failed to store fetched document for {identifier}: {source}")]
    Storage {
        identifier: String,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Identifier the failure relates to, when there is one.
    pub fn identifier(&self) -> Option<&str> {
        match self {
            FetchError::Exhausted { identifier, .. } | FetchError::Storage { identifier, .. } => {
                Some(identifier)
            }
            _ => None,
        }
    }
}

/// No extractor is registered for a file extension or format token.
#[derive(Debug, Error)]
#[error("unsupported format for {subject}; supported: {}", supported.join(", "))]
pub struct UnsupportedFormatError {
    /// The file path or `format:<token>` that could not be matched.
    pub subject: String,
    pub supported: Vec<String>,
}

/// Position of a syntax error inside a document (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: u64,
    pub column: u64,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

impl SourceLocation {
    /// Convert a byte offset into a line/column position within `text`.
    pub fn from_offset(text: &str, offset: usize) -> Self {
        let offset = offset.min(text.len());
        let before = text.as_bytes().get(..offset).unwrap_or_default();
        let line = before.iter().filter(|b| **b == b'\n').count() as u64 + 1;
        let column = match before.iter().rposition(|b| *b == b'\n') {
            Some(nl) => (offset - nl) as u64,
            None => offset as u64 + 1,
        };
        Self { line, column }
    }
}

/// A document is not well-formed in its declared syntax.
#[derive(Debug, Error)]
pub struct ParseError {
    pub format: DocumentFormat,
    pub message: String,
    pub location: Option<SourceLocation>,
}

impl ParseError {
    pub fn new(format: DocumentFormat, message: impl Into<String>) -> Self {
        Self {
            format,
            message: message.into(),
            location: None,
        }
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "invalid {} at {}: {}", self.format, loc, self.message),
            None => write!(f, "invalid {}: {}", self.format, self.message),
        }
    }
}

/// A mandatory field is missing or an invariant does not hold.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("validation failed for '{field}': {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn missing(field: &str) -> Self {
        Self::new(field, "required field is missing or empty")
    }
}

/// Everything an extractor can fail with.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Unsupported(#[from] UnsupportedFormatError),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Data-file discovery failures. These never fail the metadata ingest that
/// triggered them.
#[derive(Debug, Error)]
pub enum DataFileError {
    #[error("invalid data file location '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("{url} exceeds the size limit: {size} bytes > {limit} bytes")]
    TooLarge { url: String, size: u64, limit: u64 },

    #[error("unreadable archive {url}: {message}")]
    Archive { url: String, message: String },

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ═══════════════════════════════════════════════════════════════════════
// Pipeline classification
// ═══════════════════════════════════════════════════════════════════════

/// Union of all stage errors, as seen by the orchestrator and its callers.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    UnsupportedFormat(#[from] UnsupportedFormatError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<ExtractError> for IngestError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Parse(e) => IngestError::Parse(e),
            ExtractError::Validation(e) => IngestError::Validation(e),
            ExtractError::Unsupported(e) => IngestError::UnsupportedFormat(e),
            ExtractError::Io { path, source } => IngestError::Io { path, source },
        }
    }
}

impl IngestError {
    /// Short, stable name of the error kind, printed by the CLI.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Fetch(_) => "FetchError",
            IngestError::UnsupportedFormat(_) => "UnsupportedFormatError",
            IngestError::Parse(_) => "ParseError",
            IngestError::Validation(_) => "ValidationError",
            IngestError::Io { .. } | IngestError::Unexpected(_) => "UnexpectedError",
        }
    }

    pub fn cause(&self) -> FailureCause {
        match self {
            IngestError::Fetch(FetchError::Storage { .. }) => FailureCause::UnexpectedFailure,
            IngestError::Fetch(_) => FailureCause::FetchFailure,
            IngestError::UnsupportedFormat(_) | IngestError::Parse(_) => {
                FailureCause::ExtractionFailure
            }
            IngestError::Validation(_) => FailureCause::ValidationFailure,
            IngestError::Io { .. } | IngestError::Unexpected(_) => FailureCause::UnexpectedFailure,
        }
    }
}

/// Why a pipeline run ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum FailureCause {
    FetchFailure,
    ExtractionFailure,
    ValidationFailure,
    UnexpectedFailure,
}

impl FailureCause {
    pub fn exit_code(self) -> u8 {
        match self {
            FailureCause::FetchFailure => 1,
            FailureCause::ExtractionFailure => 2,
            FailureCause::ValidationFailure => 3,
            FailureCause::UnexpectedFailure => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureCause::FetchFailure => "fetch",
            FailureCause::ExtractionFailure => "extraction",
            FailureCause::ValidationFailure => "validation",
            FailureCause::UnexpectedFailure => "unexpected",
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
