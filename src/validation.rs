//! Strict/lenient validation policy.
//!
//! Two kinds of checks live here:
//!
//! - **Mandatory fields.** `title` and `abstract` are always required. The
//!   remaining ISO 19115 core fields ([`STRICT_REQUIRED`]) are required in
//!   strict mode and only produce warnings in lenient mode.
//! - **Cross-field invariants.** Bounding-box ordering/range and temporal
//!   ordering. A bad temporal range is fatal in both modes; a bad bounding box
//!   is fatal in strict mode and flagged in lenient mode.
//!
//! Extractors apply the policy while building a record (see
//! [`MetadataDraft::finish`](crate::extract::MetadataDraft::finish)); the
//! orchestrator runs [`Validator::check`] again on the finished record so
//! records produced by third-party extractors get the same guarantees.

use serde::Serialize;

use crate::error::ValidationError;
use crate::models::{check_bounding_box, Metadata, ValidationWarning};

/// Fields whose absence is fatal regardless of mode.
pub const ALWAYS_REQUIRED: [&str; 2] = ["title", "abstract"];

/// ISO 19115 core fields required only in strict mode.
pub const STRICT_REQUIRED: [&str; 4] = [
    "contact_organization",
    "metadata_date",
    "dataset_language",
    "topic_category",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    Strict,
    #[default]
    Lenient,
}

impl ValidationMode {
    pub fn from_strict(strict: bool) -> Self {
        if strict {
            ValidationMode::Strict
        } else {
            ValidationMode::Lenient
        }
    }

    pub fn is_strict(self) -> bool {
        self == ValidationMode::Strict
    }

    /// Strict mode turns a finding into an error; lenient mode into a warning.
    pub fn escalate(self, err: ValidationError) -> Result<ValidationWarning, ValidationError> {
        match self {
            ValidationMode::Strict => Err(err),
            ValidationMode::Lenient => Ok(err.into()),
        }
    }
}

impl std::fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ValidationMode::Strict => "strict",
            ValidationMode::Lenient => "lenient",
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Validator {
    mode: ValidationMode,
}

impl Validator {
    pub fn new(mode: ValidationMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    /// Validate a finished record.
    ///
    /// Returns the lenient-mode findings, or the first fatal one.
    pub fn check(&self, metadata: &Metadata) -> Result<Vec<ValidationWarning>, ValidationError> {
        let mut warnings = Vec::new();

        if metadata.title.trim().is_empty() {
            return Err(ValidationError::missing("title"));
        }
        if metadata.abstract_text.trim().is_empty() {
            return Err(ValidationError::missing("abstract"));
        }

        if let Some(bbox) = &metadata.bounding_box {
            if let Err(err) = check_bounding_box(bbox.west(), bbox.east(), bbox.south(), bbox.north())
            {
                warnings.push(self.mode.escalate(err)?);
            }
        }

        check_temporal_order(metadata)?;

        for field in missing_strict_fields(metadata) {
            warnings.push(self.mode.escalate(ValidationError::missing(field))?);
        }

        if !metadata.verify_checksum() {
            return Err(ValidationError::new(
                "document_checksum",
                "checksum does not match raw_document",
            ));
        }

        Ok(warnings)
    }
}

/// `start <= end` whenever both bounds are present.
pub fn check_temporal_order(metadata: &Metadata) -> Result<(), ValidationError> {
    if let (Some(start), Some(end)) = (metadata.temporal_extent_start, metadata.temporal_extent_end)
    {
        if start > end {
            return Err(ValidationError::new(
                "temporal_extent",
                format!("start ({}) is after end ({})", start, end),
            ));
        }
    }
    Ok(())
}

fn missing_strict_fields(metadata: &Metadata) -> Vec<&'static str> {
    let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
    let mut missing = Vec::new();
    if blank(&metadata.contact_organization) {
        missing.push("contact_organization");
    }
    if metadata.metadata_date.is_none() {
        missing.push("metadata_date");
    }
    if metadata.dataset_language.trim().is_empty() {
        missing.push("dataset_language");
    }
    if blank(&metadata.topic_category) {
        missing.push("topic_category");
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{checksum, AccessType, DocumentFormat};
    use chrono::{TimeZone, Utc};

    fn record() -> Metadata {
        let raw = "{}".to_string();
        Metadata {
            title: "Title".into(),
            abstract_text: "Abstract".into(),
            keywords: vec![],
            bounding_box: None,
            temporal_extent_start: None,
            temporal_extent_end: None,
            contact_organization: Some("UKCEH".into()),
            contact_email: None,
            metadata_date: Some(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()),
            dataset_language: "eng".into(),
            topic_category: Some("environment".into()),
            download_url: None,
            landing_page_url: None,
            access_type: AccessType::Download,
            document_checksum: checksum(raw.as_bytes()),
            raw_document: raw,
            document_format: DocumentFormat::Json,
            warnings: vec![],
        }
    }

    #[test]
    fn complete_record_passes_strict() {
        let warnings = Validator::new(ValidationMode::Strict).check(&record()).unwrap();
        assert!(warnings.is_empty());
    }

    #[test]
    fn missing_topic_is_fatal_only_in_strict_mode() {
        let mut md = record();
        md.topic_category = None;

        let err = Validator::new(ValidationMode::Strict).check(&md).unwrap_err();
        assert_eq!(err.field, "topic_category");

        let warnings = Validator::new(ValidationMode::Lenient).check(&md).unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "topic_category");
    }

    #[test]
    fn empty_abstract_is_fatal_in_both_modes() {
        let mut md = record();
        md.abstract_text = "   ".into();
        for mode in [ValidationMode::Strict, ValidationMode::Lenient] {
            let err = Validator::new(mode).check(&md).unwrap_err();
            assert_eq!(err.field, "abstract");
        }
    }

    #[test]
    fn inverted_temporal_range_is_fatal_in_both_modes() {
        let mut md = record();
        md.temporal_extent_start = Some(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap());
        md.temporal_extent_end = Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        for mode in [ValidationMode::Strict, ValidationMode::Lenient] {
            let err = Validator::new(mode).check(&md).unwrap_err();
            assert_eq!(err.field, "temporal_extent");
        }
    }

    #[test]
    fn tampered_raw_document_fails_checksum() {
        let mut md = record();
        md.raw_document.push(' ');
        let err = Validator::new(ValidationMode::Lenient).check(&md).unwrap_err();
        assert_eq!(err.field, "document_checksum");
    }
}
