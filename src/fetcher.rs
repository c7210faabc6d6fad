//! Remote catalogue fetcher.
//!
//! Given an identifier and a catalogue profile, the fetcher builds an ordered
//! list of URL candidates and tries them one by one:
//!
//! 1. Endpoints serving the preferred format (when one is requested).
//! 2. `primary` endpoints in declared order, then `alternate` endpoints,
//!    then `negotiated` base URLs (sent with an `Accept` header).
//!
//! Each candidate gets up to `max_retries` attempts. Timeouts, connection
//! failures, HTTP 429 and 5xx are retried with exponential backoff (base delay
//! doubling per retry, capped). Any other HTTP error moves straight on to the
//! next candidate, as does a 200 response whose body is empty, larger than
//! `max_body_bytes`, or not well-formed for the candidate's format.
//!
//! The first valid body is written to a [`tempfile::NamedTempFile`] owned by
//! the returned [`FetchedDocument`]; dropping the document deletes the file.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::{CatalogueConfig, Config, EndpointConfig, EndpointKind, IDENTIFIER_PLACEHOLDER};
use crate::error::{FetchError, ParseError};
use crate::extract::{json, jsonld, rdf, xml};
use crate::models::{checksum, DocumentFormat};

/// One document request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub identifier: String,
    pub catalogue: String,
    pub preferred_format: Option<DocumentFormat>,
    /// Per-request timeout; the fetcher default when `None`.
    pub timeout: Option<Duration>,
    /// Attempts per candidate; the fetcher default when `None`.
    pub max_retries: Option<u32>,
}

impl FetchRequest {
    pub fn new(identifier: impl Into<String>, catalogue: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            catalogue: catalogue.into(),
            preferred_format: None,
            timeout: None,
            max_retries: None,
        }
    }

    pub fn with_format(mut self, format: Option<DocumentFormat>) -> Self {
        self.preferred_format = format;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// A downloaded, well-formed document stored in a temporary file.
#[derive(Debug)]
pub struct FetchedDocument {
    identifier: String,
    url: String,
    format: DocumentFormat,
    checksum: String,
    size: usize,
    file: NamedTempFile,
}

impl FetchedDocument {
    /// Store `bytes` in a new temporary file under `dir` (or the system
    /// temp dir). The file lives as long as the returned value.
    pub fn from_bytes(
        identifier: &str,
        url: &str,
        format: DocumentFormat,
        bytes: &[u8],
        dir: Option<&Path>,
    ) -> std::io::Result<Self> {
        let suffix = format!(".{}", format.extension());
        let mut builder = tempfile::Builder::new();
        builder.prefix("metadata_").suffix(&suffix);
        let mut file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(bytes)?;
        file.flush()?;

        Ok(Self {
            identifier: identifier.to_string(),
            url: url.to_string(),
            format,
            checksum: checksum(bytes),
            size: bytes.len(),
            file,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// URL the document was served from.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Detected encoding.
    pub fn format(&self) -> DocumentFormat {
        self.format
    }

    /// SHA-256 of the stored bytes.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Keep the file on disk at `dest` instead of deleting it on drop.
    pub fn persist(self, dest: &Path) -> std::io::Result<PathBuf> {
        self.file.persist(dest).map_err(|e| e.error)?;
        Ok(dest.to_path_buf())
    }
}

/// Anything that can turn a [`FetchRequest`] into a stored document.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedDocument, FetchError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Candidates
// ═══════════════════════════════════════════════════════════════════════

/// A concrete URL to try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub url: String,
    pub format: DocumentFormat,
    pub kind: EndpointKind,
    pub accept: Option<String>,
}

/// Profile endpoints in the order they are tried.
pub fn endpoint_order(
    profile: &CatalogueConfig,
    preferred: Option<DocumentFormat>,
) -> Vec<&EndpointConfig> {
    let mut endpoints: Vec<&EndpointConfig> = profile.endpoints.iter().collect();
    endpoints.sort_by_key(|e| e.kind);
    if let Some(preferred) = preferred {
        endpoints.sort_by_key(|e| e.format != preferred);
    }
    endpoints
}

/// Ordered, de-duplicated URL candidates for `identifier`.
pub fn candidate_order(
    profile: &CatalogueConfig,
    identifier: &str,
    preferred: Option<DocumentFormat>,
) -> Vec<Candidate> {
    let encoded = encode_identifier(identifier);
    let mut seen = HashSet::new();
    endpoint_order(profile, preferred)
        .into_iter()
        .map(|e| Candidate {
            url: e.url.replace(IDENTIFIER_PLACEHOLDER, &encoded),
            format: e.format,
            kind: e.kind,
            accept: e.accept.clone().or_else(|| {
                (e.kind == EndpointKind::Negotiated).then(|| e.format.mime_type().to_string())
            }),
        })
        .filter(|c| seen.insert((c.url.clone(), c.accept.clone())))
        .collect()
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn encode_identifier(identifier: &str) -> String {
    let mut out = String::with_capacity(identifier.len());
    for b in identifier.trim().bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// A JSON candidate that turns out to carry `@context` is JSON-LD.
fn refine_format(format: DocumentFormat, body: &[u8]) -> DocumentFormat {
    if format == DocumentFormat::Json {
        let is_linked = serde_json::from_slice::<Value>(body)
            .ok()
            .is_some_and(|v| v.get("@context").is_some());
        if is_linked {
            return DocumentFormat::JsonLd;
        }
    }
    format
}

/// Minimal validation of a response body.
pub fn check_well_formed(format: DocumentFormat, body: &[u8]) -> Result<(), ParseError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ParseError::new(format, "empty response body"));
    }
    match format {
        DocumentFormat::Xml => xml::check_syntax(body),
        DocumentFormat::Json => json::check_syntax(body),
        DocumentFormat::JsonLd => jsonld::check_syntax(body),
        DocumentFormat::Rdf => rdf::check_syntax(body),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// HTTP fetcher
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub(crate) enum BodyError {
    /// Declared or received size, in bytes.
    TooLarge(u64),
    Read(reqwest::Error),
}

/// Read a response body, giving up as soon as it is known to exceed `limit`.
pub(crate) async fn read_limited(
    mut response: reqwest::Response,
    limit: u64,
) -> Result<Vec<u8>, BodyError> {
    if let Some(declared) = response.content_length() {
        if declared > limit {
            return Err(BodyError::TooLarge(declared));
        }
    }
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(BodyError::Read)? {
        let size = (body.len() + chunk.len()) as u64;
        if size > limit {
            return Err(BodyError::TooLarge(size));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub temp_dir: Option<PathBuf>,
    pub user_agent: String,
    pub max_body_bytes: u64,
}

impl FetchSettings {
    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`, capped.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }
}

/// HTTP implementation of [`DocumentFetcher`]. One client is shared by all
/// requests; catalogue profiles are read-only.
#[derive(Debug, Clone)]
pub struct MetadataFetcher {
    client: reqwest::Client,
    catalogues: BTreeMap<String, CatalogueConfig>,
    settings: FetchSettings,
}

impl MetadataFetcher {
    pub fn new(
        catalogues: BTreeMap<String, CatalogueConfig>,
        settings: FetchSettings,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            catalogues,
            settings,
        })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let fetch = &config.fetch;
        Self::new(
            config.catalogues.clone(),
            FetchSettings {
                timeout: fetch.timeout(),
                max_retries: fetch.max_retries,
                backoff_base: fetch.backoff_base(),
                backoff_max: fetch.backoff_max(),
                temp_dir: fetch.temp_dir.clone(),
                user_agent: fetch.user_agent.clone(),
                max_body_bytes: fetch.max_body_bytes,
            },
        )
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Candidates that would be tried for `request`.
    pub fn candidates(&self, request: &FetchRequest) -> Result<Vec<Candidate>, FetchError> {
        let profile = self.catalogues.get(&request.catalogue).ok_or_else(|| {
            FetchError::UnknownCatalogue {
                name: request.catalogue.clone(),
                known: self
                    .catalogues
                    .keys()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", "),
            }
        })?;
        let candidates = candidate_order(profile, &request.identifier, request.preferred_format);
        if candidates.is_empty() {
            return Err(FetchError::NoCandidates {
                catalogue: request.catalogue.clone(),
                format: request.preferred_format.unwrap_or(DocumentFormat::Json),
            });
        }
        Ok(candidates)
    }

    /// Request one candidate with retry. Returns the body, or the reason the
    /// candidate was abandoned.
    async fn try_candidate(
        &self,
        candidate: &Candidate,
        timeout: Duration,
        attempts: u32,
        total_attempts: &mut u32,
    ) -> Result<Vec<u8>, String> {
        let mut last_reason = format!("{}: no attempt made", candidate.url);

        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.settings.backoff_delay(attempt - 1);
                debug!(url = %candidate.url, attempt, delay_ms = delay.as_millis() as u64, "backing off");
                tokio::time::sleep(delay).await;
            }
            *total_attempts += 1;

            let mut request = self.client.get(&candidate.url).timeout(timeout);
            if let Some(accept) = &candidate.accept {
                request = request.header(reqwest::header::ACCEPT, accept);
            }
            debug!(url = %candidate.url, format = %candidate.format, attempt, "requesting");

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        match read_limited(response, self.settings.max_body_bytes).await {
                            Ok(body) => return Ok(body),
                            Err(BodyError::TooLarge(size)) => {
                                warn!(url = %candidate.url, size, limit = self.settings.max_body_bytes, "response too large");
                                return Err(format!(
                                    "{}: body of {} bytes exceeds the {} byte limit",
                                    candidate.url, size, self.settings.max_body_bytes
                                ));
                            }
                            Err(BodyError::Read(e)) => {
                                last_reason = format!("{}: failed to read body: {}", candidate.url, e);
                                warn!(url = %candidate.url, attempt, error = %e, "body read failed");
                                continue;
                            }
                        }
                    }

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_reason = format!("{} returned HTTP {}", candidate.url, status);
                        warn!(url = %candidate.url, attempt, %status, "transient HTTP error");
                        continue;
                    }

                    // Any other client error: next candidate
                    debug!(url = %candidate.url, %status, "candidate rejected");
                    return Err(format!("{} returned HTTP {}", candidate.url, status));
                }
                Err(e) if e.is_builder() => {
                    return Err(format!("{}: invalid request: {}", candidate.url, e));
                }
                Err(e) => {
                    let kind = if e.is_timeout() {
                        "timed out"
                    } else if e.is_connect() {
                        "connection failed"
                    } else {
                        "request failed"
                    };
                    last_reason = format!("{}: {}: {}", candidate.url, kind, e);
                    warn!(url = %candidate.url, attempt, error = %e, "{}", kind);
                    continue;
                }
            }
        }

        Err(last_reason)
    }
}

#[async_trait]
impl DocumentFetcher for MetadataFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedDocument, FetchError> {
        let candidates = self.candidates(request)?;
        let timeout = request.timeout.unwrap_or(self.settings.timeout);
        let attempts = request
            .max_retries
            .unwrap_or(self.settings.max_retries)
            .max(1);

        info!(
            identifier = %request.identifier,
            catalogue = %request.catalogue,
            candidates = candidates.len(),
            "fetching metadata"
        );

        let mut total_attempts = 0u32;
        let mut last_reason = String::new();

        for candidate in &candidates {
            let body = match self
                .try_candidate(candidate, timeout, attempts, &mut total_attempts)
                .await
            {
                Ok(body) => body,
                Err(reason) => {
                    last_reason = reason;
                    continue;
                }
            };

            let format = refine_format(candidate.format, &body);
            if let Err(e) = check_well_formed(format, &body) {
                warn!(url = %candidate.url, %format, error = %e, "discarding malformed response");
                last_reason = format!("{} returned a malformed document: {}", candidate.url, e);
                continue;
            }

            let document = FetchedDocument::from_bytes(
                &request.identifier,
                &candidate.url,
                format,
                &body,
                self.settings.temp_dir.as_deref(),
            )
            .map_err(|source| FetchError::Storage {
                identifier: request.identifier.clone(),
                source,
            })?;

            info!(
                identifier = %request.identifier,
                url = %candidate.url,
                %format,
                bytes = document.size(),
                "fetched metadata document"
            );
            return Ok(document);
        }

        Err(FetchError::Exhausted {
            identifier: request.identifier.clone(),
            reason: last_reason,
            attempts: total_attempts,
        })
    }
}
