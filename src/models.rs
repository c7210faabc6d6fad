//! Core data models used throughout the harness.
//!
//! [`Metadata`] is the normalized result of extracting one catalogue record;
//! [`Dataset`] is its identity + narrative twin. The orchestrator builds the
//! two together and hands them on as an [`IngestRecord`], optionally with the
//! [`DataFile`]s discovered for the dataset.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::error::ValidationError;

/// Default `dataset_language` (ISO 639-2) when a record does not state one.
pub const DEFAULT_LANGUAGE: &str = "eng";

// ═══════════════════════════════════════════════════════════════════════
// Encodings
// ═══════════════════════════════════════════════════════════════════════

/// The four wire syntaxes a catalogue record can arrive in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    /// ISO 19115 encoded as ISO 19139 XML.
    Xml,
    Json,
    #[serde(rename = "jsonld")]
    JsonLd,
    /// RDF in Turtle syntax.
    Rdf,
}

impl DocumentFormat {
    pub const ALL: [DocumentFormat; 4] = [
        DocumentFormat::Json,
        DocumentFormat::JsonLd,
        DocumentFormat::Xml,
        DocumentFormat::Rdf,
    ];

    /// Registry token (`"xml"`, `"json"`, `"jsonld"`, `"rdf"`).
    pub fn token(self) -> &'static str {
        match self {
            DocumentFormat::Xml => "xml",
            DocumentFormat::Json => "json",
            DocumentFormat::JsonLd => "jsonld",
            DocumentFormat::Rdf => "rdf",
        }
    }

    /// File extension used when storing a fetched document locally.
    pub fn extension(self) -> &'static str {
        match self {
            DocumentFormat::Xml => "xml",
            DocumentFormat::Json => "json",
            DocumentFormat::JsonLd => "jsonld",
            DocumentFormat::Rdf => "ttl",
        }
    }

    /// Default `Accept` header for content-negotiated endpoints.
    pub fn mime_type(self) -> &'static str {
        match self {
            DocumentFormat::Xml => "application/xml",
            DocumentFormat::Json => "application/json",
            DocumentFormat::JsonLd => "application/ld+json",
            DocumentFormat::Rdf => "text/turtle",
        }
    }

    /// Parse a user-facing token. Accepts a few common aliases.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "xml" | "iso19139" | "gemini" => Some(DocumentFormat::Xml),
            "json" => Some(DocumentFormat::Json),
            "jsonld" | "json-ld" => Some(DocumentFormat::JsonLd),
            "rdf" | "ttl" | "turtle" => Some(DocumentFormat::Rdf),
            _ => None,
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl std::str::FromStr for DocumentFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentFormat::from_token(s)
            .ok_or_else(|| format!("unknown format '{}' (expected xml, json, jsonld or rdf)", s))
    }
}

/// How the dataset's files are published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AccessType {
    /// A single archive to download.
    #[default]
    #[serde(rename = "download")]
    Download,
    /// A web-accessible folder of files.
    #[serde(rename = "fileAccess")]
    FileAccess,
}

// ═══════════════════════════════════════════════════════════════════════
// Bounding box
// ═══════════════════════════════════════════════════════════════════════

/// Geographic extent in decimal degrees.
///
/// Can only be constructed through [`BoundingBox::new`], so every value in
/// circulation satisfies the range and ordering invariants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BoundingBoxFields")]
pub struct BoundingBox {
    west_longitude: f64,
    east_longitude: f64,
    south_latitude: f64,
    north_latitude: f64,
}

#[derive(Deserialize)]
struct BoundingBoxFields {
    west_longitude: f64,
    east_longitude: f64,
    south_latitude: f64,
    north_latitude: f64,
}

impl TryFrom<BoundingBoxFields> for BoundingBox {
    type Error = ValidationError;

    fn try_from(f: BoundingBoxFields) -> Result<Self, Self::Error> {
        BoundingBox::new(
            f.west_longitude,
            f.east_longitude,
            f.south_latitude,
            f.north_latitude,
        )
    }
}

impl BoundingBox {
    pub fn new(west: f64, east: f64, south: f64, north: f64) -> Result<Self, ValidationError> {
        check_bounding_box(west, east, south, north)?;
        Ok(Self {
            west_longitude: west,
            east_longitude: east,
            south_latitude: south,
            north_latitude: north,
        })
    }

    /// A degenerate box around a single point.
    pub fn point(longitude: f64, latitude: f64) -> Result<Self, ValidationError> {
        Self::new(longitude, longitude, latitude, latitude)
    }

    pub fn west(&self) -> f64 {
        self.west_longitude
    }
    pub fn east(&self) -> f64 {
        self.east_longitude
    }
    pub fn south(&self) -> f64 {
        self.south_latitude
    }
    pub fn north(&self) -> f64 {
        self.north_latitude
    }

    /// Midpoint as `(longitude, latitude)`.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.west_longitude + self.east_longitude) / 2.0,
            (self.south_latitude + self.north_latitude) / 2.0,
        )
    }

    /// Planar area in square degrees (Δlon × Δlat, not geodesic).
    pub fn area(&self) -> f64 {
        (self.east_longitude - self.west_longitude) * (self.north_latitude - self.south_latitude)
    }
}

/// Range and ordering checks shared by the constructor and the validator.
pub fn check_bounding_box(
    west: f64,
    east: f64,
    south: f64,
    north: f64,
) -> Result<(), ValidationError> {
    let field = "bounding_box";
    for (name, value) in [("west", west), ("east", east)] {
        if !(-180.0..=180.0).contains(&value) {
            return Err(ValidationError::new(
                field,
                format!("{} longitude {} outside [-180, 180]", name, value),
            ));
        }
    }
    for (name, value) in [("south", south), ("north", north)] {
        if !(-90.0..=90.0).contains(&value) {
            return Err(ValidationError::new(
                field,
                format!("{} latitude {} outside [-90, 90]", name, value),
            ));
        }
    }
    if west > east {
        return Err(ValidationError::new(
            field,
            format!("west longitude ({}) is greater than east ({})", west, east),
        ));
    }
    if south > north {
        return Err(ValidationError::new(
            field,
            format!("south latitude ({}) is greater than north ({})", south, north),
        ));
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Metadata
// ═══════════════════════════════════════════════════════════════════════

/// A non-fatal finding recorded while building a record in lenient mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<ValidationError> for ValidationWarning {
    fn from(err: ValidationError) -> Self {
        Self {
            field: err.field,
            message: err.message,
        }
    }
}

/// Normalized ISO 19115 discovery metadata for one dataset.
///
/// Built field-by-field by exactly one extractor (see
/// [`MetadataDraft`](crate::extract::MetadataDraft)) and not modified after
/// validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    /// Ordered, de-duplicated.
    pub keywords: Vec<String>,
    pub bounding_box: Option<BoundingBox>,
    pub temporal_extent_start: Option<DateTime<Utc>>,
    pub temporal_extent_end: Option<DateTime<Utc>>,
    pub contact_organization: Option<String>,
    pub contact_email: Option<String>,
    pub metadata_date: Option<DateTime<Utc>>,
    pub dataset_language: String,
    pub topic_category: Option<String>,
    pub download_url: Option<String>,
    pub landing_page_url: Option<String>,
    pub access_type: AccessType,
    /// Full original document text.
    pub raw_document: String,
    pub document_format: DocumentFormat,
    /// Lowercase hex SHA-256 of `raw_document`.
    pub document_checksum: String,
    #[serde(default)]
    pub warnings: Vec<ValidationWarning>,
}

impl Metadata {
    pub fn is_geospatial(&self) -> bool {
        self.bounding_box.is_some()
    }

    pub fn has_temporal_extent(&self) -> bool {
        self.temporal_extent_start.is_some() && self.temporal_extent_end.is_some()
    }

    /// Merge keywords, trimming whitespace and skipping empty or repeated ones.
    pub fn add_keywords<I, S>(&mut self, keywords: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for keyword in keywords {
            let keyword = keyword.as_ref().trim();
            if !keyword.is_empty() && !self.keywords.iter().any(|k| k == keyword) {
                self.keywords.push(keyword.to_string());
            }
        }
    }

    /// Whether `document_checksum` still matches `raw_document`.
    pub fn verify_checksum(&self) -> bool {
        checksum(self.raw_document.as_bytes()) == self.document_checksum
    }

    /// Canonical text offered to the embedding collaborator.
    pub fn embedding_text(&self) -> String {
        format!("{} {}", self.title, self.abstract_text)
    }

    /// Multi-line human-readable summary.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!("Title: {}", self.title)];
        if self.abstract_text.chars().count() > 100 {
            let short: String = self.abstract_text.chars().take(100).collect();
            lines.push(format!("Abstract: {}...", short));
        } else {
            lines.push(format!("Abstract: {}", self.abstract_text));
        }
        if self.keywords.is_empty() {
            lines.push("Keywords: None".to_string());
        } else {
            lines.push(format!("Keywords: {}", self.keywords.join(", ")));
        }
        lines.push(format!(
            "Geospatial: {}",
            if self.is_geospatial() { "Yes" } else { "No" }
        ));
        if let Some(bbox) = &self.bounding_box {
            let (lon, lat) = bbox.center();
            lines.push(format!("Center: {:.2}°N, {:.2}°E", lat, lon));
        }
        if let (Some(start), Some(end)) = (self.temporal_extent_start, self.temporal_extent_end) {
            lines.push(format!("Temporal: {} - {}", start.year(), end.year()));
        }
        if let Some(org) = &self.contact_organization {
            lines.push(format!("Contact: {}", org));
        }
        lines.push(format!("Format: {}", self.document_format));
        lines.push(format!("Checksum: {}", self.document_checksum));
        lines.join("\n")
    }
}

/// Lowercase hex SHA-256 of a document's bytes.
pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// ═══════════════════════════════════════════════════════════════════════
// Dataset
// ═══════════════════════════════════════════════════════════════════════

/// Identity and narrative of an ingested dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: Uuid,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    /// URL the metadata document was fetched from (or a `file://` path).
    pub source_url: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Dataset {
    pub fn new(id: Uuid, title: String, abstract_text: String, source_url: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            title,
            abstract_text,
            source_url,
            created_at: now,
            last_updated: now,
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.title.trim().is_empty()
            && !self.abstract_text.trim().is_empty()
            && !self.source_url.trim().is_empty()
    }

    /// Replace any of the narrative fields and bump `last_updated`.
    pub fn update_metadata(
        &mut self,
        title: Option<String>,
        abstract_text: Option<String>,
        source_url: Option<String>,
    ) {
        if let Some(title) = title {
            self.title = title;
        }
        if let Some(abstract_text) = abstract_text {
            self.abstract_text = abstract_text;
        }
        if let Some(source_url) = source_url {
            self.source_url = source_url;
        }
        self.last_updated = Utc::now();
    }
}

/// Stable dataset id for a catalogue identifier.
///
/// UUID identifiers are used verbatim; anything else maps to a UUIDv5 of
/// `"{catalogue}:{identifier}"`.
pub fn dataset_id_for(catalogue: &str, identifier: &str) -> Uuid {
    match Uuid::parse_str(identifier.trim()) {
        Ok(id) => id,
        Err(_) => Uuid::new_v5(
            &Uuid::NAMESPACE_URL,
            format!("{}:{}", catalogue, identifier.trim()).as_bytes(),
        ),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Data files
// ═══════════════════════════════════════════════════════════════════════

/// One data file belonging to a dataset: an entry unpacked from its archive
/// or a file listed in its web folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFile {
    pub id: Uuid,
    pub dataset_id: Uuid,
    /// Path relative to the archive root or the listed folder.
    pub filename: String,
    /// Local path once downloaded, otherwise the remote URL.
    pub file_path: String,
    pub file_size: u64,
    /// Lowercase extension without the dot; empty when there is none.
    pub file_format: String,
    pub checksum: Option<String>,
    pub downloaded_at: Option<DateTime<Utc>>,
}

impl DataFile {
    /// A file known only by its URL. The id is stable per dataset and URL.
    pub fn remote(dataset_id: Uuid, filename: &str, url: &str) -> Self {
        Self {
            id: Uuid::new_v5(&dataset_id, url.as_bytes()),
            dataset_id,
            filename: filename.to_string(),
            file_path: url.to_string(),
            file_size: 0,
            file_format: file_format_of(filename),
            checksum: None,
            downloaded_at: None,
        }
    }

    /// A file stored locally at `path`, `bytes` long with SHA-256 `checksum`.
    pub fn stored(dataset_id: Uuid, filename: &str, path: &str, bytes: u64, checksum: String) -> Self {
        Self {
            id: Uuid::new_v5(&dataset_id, filename.as_bytes()),
            dataset_id,
            filename: filename.to_string(),
            file_path: path.to_string(),
            file_size: bytes,
            file_format: file_format_of(filename),
            checksum: Some(checksum),
            downloaded_at: Some(Utc::now()),
        }
    }

    pub fn is_downloaded(&self) -> bool {
        self.downloaded_at.is_some() && !self.file_path.is_empty()
    }
}

/// Lowercase extension of the last path segment of `name`.
pub fn file_format_of(name: &str) -> String {
    let base = name.rsplit('/').next().unwrap_or(name);
    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// A `(Dataset, Metadata)` pair as handed to persistence, plus any data
/// files discovered for the dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRecord {
    pub dataset: Dataset,
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_files: Vec<DataFile>,
}

impl IngestRecord {
    pub fn id(&self) -> Uuid {
        self.dataset.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_file_formats_and_ids() {
        assert_eq!(file_format_of("grid/LCM2021.TIF"), "tif");
        assert_eq!(file_format_of("README"), "");
        assert_eq!(file_format_of(".hidden"), "");
        assert_eq!(file_format_of("v1.2/notes"), "");

        let dataset = Uuid::new_v4();
        let a = DataFile::remote(dataset, "a.csv", "http://x/a.csv");
        let b = DataFile::remote(dataset, "a.csv", "http://x/a.csv");
        assert_eq!(a.id, b.id);
        assert_eq!(a.file_format, "csv");
        assert!(!a.is_downloaded());

        let stored = DataFile::stored(dataset, "a.csv", "/tmp/a.csv", 3, checksum(b"abc"));
        assert!(stored.is_downloaded());
        assert_eq!(stored.file_size, 3);
    }

    #[test]
    fn bounding_box_rejects_inverted_axes() {
        let err = BoundingBox::new(10.0, -10.0, 0.0, 1.0).unwrap_err();
        assert_eq!(err.field, "bounding_box");
        assert!(BoundingBox::new(0.0, 1.0, 5.0, -5.0).is_err());
        assert!(BoundingBox::new(-181.0, 1.0, 0.0, 1.0).is_err());
        assert!(BoundingBox::new(0.0, 1.0, 0.0, 90.5).is_err());
    }

    #[test]
    fn bounding_box_center_and_area() {
        let bbox = BoundingBox::new(-8.0, 2.0, 50.0, 60.0).unwrap();
        assert_eq!(bbox.center(), (-3.0, 55.0));
        assert_eq!(bbox.area(), 100.0);
        assert_eq!(BoundingBox::point(1.5, 2.5).unwrap().area(), 0.0);
    }

    #[test]
    fn bounding_box_deserialize_enforces_invariants() {
        let ok: BoundingBox = serde_json::from_str(
            r#"{"west_longitude":-1,"east_longitude":1,"south_latitude":-2,"north_latitude":2}"#,
        )
        .unwrap();
        assert_eq!(ok.north(), 2.0);
        let bad = serde_json::from_str::<BoundingBox>(
            r#"{"west_longitude":1,"east_longitude":-1,"south_latitude":-2,"north_latitude":2}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn format_tokens_and_aliases() {
        assert_eq!(DocumentFormat::from_token("TTL"), Some(DocumentFormat::Rdf));
        assert_eq!(DocumentFormat::from_token("json-ld"), Some(DocumentFormat::JsonLd));
        assert_eq!(DocumentFormat::from_token("csv"), None);
        assert_eq!(DocumentFormat::JsonLd.to_string(), "jsonld");
        assert_eq!(DocumentFormat::Rdf.extension(), "ttl");
    }

    #[test]
    fn dataset_ids_are_stable() {
        let uuid = "1d33a8a1-4c7e-4d6f-b8c1-c158c1f5a8e2";
        assert_eq!(dataset_id_for("ceh", uuid).to_string(), uuid);
        assert_eq!(dataset_id_for("ceh", "abc123"), dataset_id_for("ceh", "abc123"));
        assert_ne!(dataset_id_for("ceh", "abc123"), dataset_id_for("ceda", "abc123"));
    }

    #[test]
    fn dataset_update_refreshes_timestamp() {
        let mut ds = Dataset::new(
            Uuid::new_v4(),
            "T".into(),
            "A".into(),
            "https://example.org".into(),
        );
        assert!(ds.is_complete());
        let before = ds.last_updated;
        ds.update_metadata(Some("New".into()), None, Some(String::new()));
        assert_eq!(ds.title, "New");
        assert!(ds.last_updated >= before);
        assert!(!ds.is_complete());
    }

    #[test]
    fn checksum_is_sha256_hex() {
        assert_eq!(
            checksum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
