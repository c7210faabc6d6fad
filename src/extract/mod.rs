//! Metadata extractors: one per wire encoding.
//!
//! Every extractor implements [`MetadataExtractor`]. Format-specific code only
//! parses its syntax and fills a [`MetadataDraft`]; the draft then applies the
//! shared mandatory-field and invariant policy in [`MetadataDraft::finish`]
//! and attaches the provenance fields (raw text, format, checksum).
//!
//! | Module | Encoding | Lookup table |
//! |--------|----------|--------------|
//! | [`xml`] | ISO 19139 / 19115-3 XML | namespace-aware element paths |
//! | [`json`] | catalogue JSON | key paths |
//! | [`jsonld`] | schema.org / DCAT JSON-LD | `@context`-resolved key paths |
//! | [`rdf`] | RDF Turtle | predicate IRIs |

pub mod geometry;
pub mod json;
pub mod jsonld;
pub mod rdf;
pub mod xml;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::path::Path;

use crate::error::{ExtractError, ParseError, SourceLocation, ValidationError};
use crate::models::{
    checksum, AccessType, BoundingBox, DocumentFormat, Metadata, ValidationWarning,
    DEFAULT_LANGUAGE,
};
use crate::validation::ValidationMode;

pub use json::JsonExtractor;
pub use jsonld::JsonLdExtractor;
pub use rdf::RdfExtractor;
pub use xml::XmlExtractor;

/// Turns one locally stored document into a [`Metadata`] record.
///
/// Implementations only provide [`map_document`](MetadataExtractor::map_document);
/// reading the file and finishing the draft are shared.
pub trait MetadataExtractor: Send + Sync {
    /// Encoding this extractor understands.
    fn format(&self) -> DocumentFormat;

    /// Validation mode the extractor was created with.
    fn mode(&self) -> ValidationMode;

    /// Human-readable name (e.g. `"XML (ISO 19139)"`).
    fn describe(&self) -> &'static str;

    /// Parse `raw` and map its fields onto a draft.
    fn map_document(&self, raw: &str) -> Result<MetadataDraft, ExtractError>;

    /// Extract from a file on disk.
    fn extract(&self, path: &Path) -> Result<Metadata, ExtractError> {
        let raw = read_document(path, self.format())?;
        self.extract_str(raw)
    }

    /// Extract from an in-memory document.
    fn extract_str(&self, raw: String) -> Result<Metadata, ExtractError> {
        let draft = self.map_document(&raw)?;
        Ok(draft.finish(self.mode(), self.format(), raw)?)
    }
}

/// Read a document as UTF-8 text.
pub fn read_document(path: &Path, format: DocumentFormat) -> Result<String, ExtractError> {
    let bytes = std::fs::read(path).map_err(|source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    String::from_utf8(bytes).map_err(|err| {
        let valid = err.utf8_error().valid_up_to();
        let prefix = String::from_utf8_lossy(&err.as_bytes()[..valid]).into_owned();
        ExtractError::Parse(
            ParseError::new(format, "document is not valid UTF-8")
                .at(SourceLocation::from_offset(&prefix, valid)),
        )
    })
}

/// Text with a leading byte-order mark removed, for handing to parsers.
pub(crate) fn strip_bom(raw: &str) -> &str {
    raw.strip_prefix('\u{feff}').unwrap_or(raw)
}

// ═══════════════════════════════════════════════════════════════════════
// Draft
// ═══════════════════════════════════════════════════════════════════════

/// Four raw corner coordinates, not yet checked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corners {
    pub west: f64,
    pub east: f64,
    pub south: f64,
    pub north: f64,
}

impl Corners {
    pub fn point(longitude: f64, latitude: f64) -> Self {
        Self {
            west: longitude,
            east: longitude,
            south: latitude,
            north: latitude,
        }
    }
}

/// Mutable, partially-filled record an extractor writes into.
///
/// Single-valued setters keep the first non-empty value they are given, so
/// extractors can feed candidates in priority order.
#[derive(Debug, Clone, Default)]
pub struct MetadataDraft {
    pub title: Option<String>,
    pub abstract_text: Option<String>,
    pub keywords: Vec<String>,
    pub corners: Option<Corners>,
    pub temporal_start: Option<DateTime<Utc>>,
    pub temporal_end: Option<DateTime<Utc>>,
    pub contact_organization: Option<String>,
    pub contact_email: Option<String>,
    pub metadata_date: Option<DateTime<Utc>>,
    pub dataset_language: Option<String>,
    pub topic_category: Option<String>,
    pub download_url: Option<String>,
    pub landing_page_url: Option<String>,
    pub access_type: Option<AccessType>,
}

fn fill(slot: &mut Option<String>, value: Option<String>) {
    if slot.is_some() {
        return;
    }
    if let Some(v) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        *slot = Some(v);
    }
}

impl MetadataDraft {
    pub fn set_title(&mut self, value: Option<String>) {
        fill(&mut self.title, value);
    }

    pub fn set_abstract(&mut self, value: Option<String>) {
        fill(&mut self.abstract_text, value);
    }

    pub fn set_contact_organization(&mut self, value: Option<String>) {
        fill(&mut self.contact_organization, value);
    }

    pub fn set_contact_email(&mut self, value: Option<String>) {
        let cleaned = value.map(|v| {
            let v = v.trim();
            v.strip_prefix("mailto:").unwrap_or(v).to_string()
        });
        fill(&mut self.contact_email, cleaned);
    }

    pub fn set_language(&mut self, value: Option<String>) {
        fill(&mut self.dataset_language, value);
    }

    pub fn set_topic_category(&mut self, value: Option<String>) {
        fill(&mut self.topic_category, value);
    }

    pub fn set_download_url(&mut self, value: Option<String>) {
        fill(&mut self.download_url, value);
    }

    pub fn set_landing_page_url(&mut self, value: Option<String>) {
        fill(&mut self.landing_page_url, value);
    }

    pub fn set_metadata_date(&mut self, value: Option<&str>) {
        if self.metadata_date.is_none() {
            self.metadata_date = value.and_then(parse_datetime);
        }
    }

    pub fn set_temporal_start(&mut self, value: Option<&str>) {
        if self.temporal_start.is_none() {
            self.temporal_start = value.and_then(parse_datetime);
        }
    }

    pub fn set_temporal_end(&mut self, value: Option<&str>) {
        if self.temporal_end.is_none() {
            self.temporal_end = value.and_then(parse_datetime);
        }
    }

    /// Set both temporal bounds from an ISO 8601 interval or a single date.
    pub fn set_temporal_interval(&mut self, value: Option<&str>) {
        if let Some(v) = value {
            let (start, end) = parse_interval(v);
            if self.temporal_start.is_none() {
                self.temporal_start = start;
            }
            if self.temporal_end.is_none() {
                self.temporal_end = end;
            }
        }
    }

    pub fn set_corners(&mut self, corners: Option<Corners>) {
        if self.corners.is_none() {
            self.corners = corners;
        }
    }

    /// Append a keyword: trimmed, empty values skipped, duplicates ignored.
    pub fn add_keyword(&mut self, keyword: &str) {
        let keyword = keyword.trim();
        if !keyword.is_empty() && !self.keywords.iter().any(|k| k == keyword) {
            self.keywords.push(keyword.to_string());
        }
    }

    /// Apply the mandatory-field policy and build the final record.
    ///
    /// - `title` and `abstract` missing: always an error.
    /// - Temporal start after end: always an error.
    /// - Invalid bounding box: error in strict mode; dropped and flagged in
    ///   lenient mode.
    /// - Missing ISO core fields: error in strict mode; flagged in lenient
    ///   mode (`dataset_language` falls back to `"eng"`).
    pub fn finish(
        self,
        mode: ValidationMode,
        format: DocumentFormat,
        raw_document: String,
    ) -> Result<Metadata, ValidationError> {
        let title = self.title.ok_or_else(|| ValidationError::missing("title"))?;
        let abstract_text = self
            .abstract_text
            .ok_or_else(|| ValidationError::missing("abstract"))?;

        let mut warnings: Vec<ValidationWarning> = Vec::new();

        let bounding_box = match self.corners {
            Some(c) => match BoundingBox::new(c.west, c.east, c.south, c.north) {
                Ok(bbox) => Some(bbox),
                Err(err) => {
                    warnings.push(mode.escalate(err)?);
                    None
                }
            },
            None => None,
        };

        if let (Some(start), Some(end)) = (self.temporal_start, self.temporal_end) {
            if start > end {
                return Err(ValidationError::new(
                    "temporal_extent",
                    format!("start ({}) is after end ({})", start, end),
                ));
            }
        }

        if self.contact_organization.is_none() {
            warnings.push(mode.escalate(ValidationError::missing("contact_organization"))?);
        }
        if self.metadata_date.is_none() {
            warnings.push(mode.escalate(ValidationError::missing("metadata_date"))?);
        }
        if self.topic_category.is_none() {
            warnings.push(mode.escalate(ValidationError::missing("topic_category"))?);
        }
        let dataset_language = match self.dataset_language {
            Some(lang) => lang,
            None if mode.is_strict() => return Err(ValidationError::missing("dataset_language")),
            None => {
                warnings.push(ValidationWarning::new(
                    "dataset_language",
                    format!("missing, defaulted to '{}'", DEFAULT_LANGUAGE),
                ));
                DEFAULT_LANGUAGE.to_string()
            }
        };

        for warning in &warnings {
            tracing::warn!(field = %warning.field, format = %format, "{}", warning.message);
        }

        let document_checksum = checksum(raw_document.as_bytes());
        Ok(Metadata {
            title,
            abstract_text,
            keywords: self.keywords,
            bounding_box,
            temporal_extent_start: self.temporal_start,
            temporal_extent_end: self.temporal_end,
            contact_organization: self.contact_organization,
            contact_email: self.contact_email,
            metadata_date: self.metadata_date,
            dataset_language,
            topic_category: self.topic_category,
            download_url: self.download_url,
            landing_page_url: self.landing_page_url,
            access_type: self.access_type.unwrap_or_default(),
            raw_document,
            document_format: format,
            document_checksum,
            warnings,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Distribution links
// ═══════════════════════════════════════════════════════════════════════

/// One online resource link from a record's distribution section.
#[derive(Debug, Clone, Default)]
pub struct OnlineResource {
    pub url: String,
    /// ISO `CI_OnLineFunctionCode` (`download`, `fileAccess`, `information`, ...).
    pub function: Option<String>,
}

impl OnlineResource {
    fn has_function(&self, code: &str) -> bool {
        self.function
            .as_deref()
            .is_some_and(|f| f.trim().eq_ignore_ascii_case(code))
    }

    fn is_datastore(&self) -> bool {
        let url = self.url.to_ascii_lowercase();
        url.contains("/datastore/") || url.contains("eidchub") || url.contains("/download/")
    }

    fn rank(&self) -> u8 {
        let explicit = self.has_function("download") || self.has_function("fileAccess");
        match (explicit, self.is_datastore()) {
            (true, true) => 4,
            (false, true) => 3,
            (true, false) => 2,
            _ if self.url.to_ascii_lowercase().ends_with(".zip") => 1,
            _ => 0,
        }
    }

    fn is_landing_page(&self) -> bool {
        self.has_function("information") || self.url.contains("/documents/")
    }
}

/// Pick the download link, access type and landing page from a record's
/// online resources. Highest rank wins; ties go to the earlier link.
pub fn apply_online_resources(draft: &mut MetadataDraft, resources: &[OnlineResource]) {
    let mut best: Option<&OnlineResource> = None;
    for resource in resources.iter().filter(|r| !r.url.trim().is_empty()) {
        let rank = resource.rank();
        if rank > 0 && best.map_or(true, |b| rank > b.rank()) {
            best = Some(resource);
        }
    }
    if let Some(resource) = best {
        if draft.download_url.is_none() {
            draft.access_type = Some(if resource.has_function("fileAccess") {
                AccessType::FileAccess
            } else {
                AccessType::Download
            });
        }
        draft.set_download_url(Some(resource.url.clone()));
    }
    let landing = resources
        .iter()
        .find(|r| r.is_landing_page() && best.map_or(true, |b| b.url != r.url));
    draft.set_landing_page_url(landing.map(|r| r.url.clone()));
}

// ═══════════════════════════════════════════════════════════════════════
// Dates
// ═══════════════════════════════════════════════════════════════════════

const NAIVE_DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

/// Parse the ISO 8601 shapes seen in catalogue records into UTC.
///
/// Accepts full RFC 3339 timestamps, naive date-times (taken as UTC), dates,
/// `YYYY-MM` and bare years. Returns `None` for anything else.
pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim().trim_matches('"');
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    let naive = value.strip_suffix('Z').unwrap_or(value);
    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Some(dt.and_utc());
        }
    }

    // xsd:date may carry a zone suffix ("2020-01-01Z", "2020-01-01+01:00").
    let date_part = naive.get(..10).filter(|_| naive.len() >= 10).unwrap_or(naive);
    if let Ok(date) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }

    let mut parts = naive.splitn(2, '-');
    let year = parts.next()?.parse::<i32>().ok()?;
    if !(1..=9999).contains(&year) || naive.len() > 7 {
        return None;
    }
    let month = match parts.next() {
        Some(m) => m.parse::<u32>().ok()?,
        None => 1,
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Split `start/end` (or a single date, used for both bounds).
pub fn parse_interval(value: &str) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    match value.split_once('/') {
        Some((start, end)) => (parse_datetime(start), parse_datetime(end)),
        None => {
            let dt = parse_datetime(value);
            (dt, dt)
        }
    }
}
