//! Extractor selection.
//!
//! [`ExtractorFactory`] maps a file extension or a format token to a
//! constructor for the matching [`MetadataExtractor`]. The four built-in
//! encodings are registered on construction; callers can add or override
//! entries with [`ExtractorFactory::register`] without touching extractor
//! code.
//!
//! | Token | Extensions | Extractor |
//! |-------|------------|-----------|
//! | `json` | `.json` | [`JsonExtractor`] |
//! | `xml` | `.xml` | [`XmlExtractor`] |
//! | `jsonld` | `.jsonld` | [`JsonLdExtractor`] |
//! | `rdf` | `.ttl`, `.turtle` | [`RdfExtractor`] |
//!
//! Every extractor a factory creates gets the factory's [`ValidationMode`].

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use crate::error::UnsupportedFormatError;
use crate::extract::{
    JsonExtractor, JsonLdExtractor, MetadataExtractor, RdfExtractor, XmlExtractor,
};
use crate::models::DocumentFormat;
use crate::validation::ValidationMode;

/// Builds an extractor for a validation mode.
pub type ExtractorConstructor =
    Arc<dyn Fn(ValidationMode) -> Box<dyn MetadataExtractor> + Send + Sync>;

/// Source of extractors for the orchestrator.
///
/// Implemented by [`ExtractorFactory`]; tests substitute fakes.
pub trait ExtractorProvider: Send + Sync {
    fn mode(&self) -> ValidationMode;

    fn for_format(&self, token: &str) -> Result<Box<dyn MetadataExtractor>, UnsupportedFormatError>;

    fn for_file(&self, path: &Path) -> Result<Box<dyn MetadataExtractor>, UnsupportedFormatError>;
}

#[derive(Clone)]
pub struct ExtractorFactory {
    mode: ValidationMode,
    constructors: BTreeMap<String, ExtractorConstructor>,
    /// Lowercase extension (no dot) → token.
    extensions: HashMap<String, String>,
}

impl std::fmt::Debug for ExtractorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorFactory")
            .field("mode", &self.mode)
            .field("formats", &self.supported_formats())
            .field("extensions", &self.supported_extensions())
            .finish()
    }
}

impl ExtractorFactory {
    /// Factory with the four built-in encodings.
    pub fn new(mode: ValidationMode) -> Self {
        let mut factory = Self::empty(mode);
        factory.register(
            DocumentFormat::Json.token(),
            |m| Box::new(JsonExtractor::new(m)),
            &["json"],
        );
        factory.register(
            DocumentFormat::Xml.token(),
            |m| Box::new(XmlExtractor::new(m)),
            &["xml"],
        );
        factory.register(
            DocumentFormat::JsonLd.token(),
            |m| Box::new(JsonLdExtractor::new(m)),
            &["jsonld"],
        );
        factory.register(
            DocumentFormat::Rdf.token(),
            |m| Box::new(RdfExtractor::new(m)),
            &["ttl", "turtle"],
        );
        factory
    }

    /// Factory with nothing registered.
    pub fn empty(mode: ValidationMode) -> Self {
        Self {
            mode,
            constructors: BTreeMap::new(),
            extensions: HashMap::new(),
        }
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    /// Add or replace the extractor for `token` and claim `extensions` for it.
    ///
    /// Extensions are matched case-insensitively, with or without a leading dot.
    pub fn register<F>(&mut self, token: &str, constructor: F, extensions: &[&str])
    where
        F: Fn(ValidationMode) -> Box<dyn MetadataExtractor> + Send + Sync + 'static,
    {
        let token = token.trim().to_ascii_lowercase();
        for ext in extensions {
            self.extensions.insert(normalize_extension(ext), token.clone());
        }
        self.constructors.insert(token, Arc::new(constructor));
    }

    /// Extractor for a file, chosen by its extension.
    pub fn create_for_file(
        &self,
        path: &Path,
    ) -> Result<Box<dyn MetadataExtractor>, UnsupportedFormatError> {
        let token = path
            .extension()
            .and_then(|e| e.to_str())
            .map(normalize_extension)
            .and_then(|ext| self.extensions.get(&ext));
        match token.and_then(|t| self.constructors.get(t)) {
            Some(ctor) => Ok(ctor(self.mode)),
            None => Err(UnsupportedFormatError {
                subject: path.display().to_string(),
                supported: self.supported_extensions(),
            }),
        }
    }

    /// Extractor for an explicit format token (`"xml"`, `"json-ld"`, `"ttl"` ...).
    pub fn create_for_format(
        &self,
        token: &str,
    ) -> Result<Box<dyn MetadataExtractor>, UnsupportedFormatError> {
        let normalized = token.trim().to_ascii_lowercase();
        let ctor = self.constructors.get(&normalized).or_else(|| {
            DocumentFormat::from_token(&normalized).and_then(|f| self.constructors.get(f.token()))
        });
        match ctor {
            Some(ctor) => Ok(ctor(self.mode)),
            None => Err(UnsupportedFormatError {
                subject: format!("format:{}", token),
                supported: self.supported_formats(),
            }),
        }
    }

    /// Registered tokens, sorted.
    pub fn supported_formats(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }

    /// Claimed extensions (with leading dot), sorted.
    pub fn supported_extensions(&self) -> Vec<String> {
        let mut exts: Vec<String> = self.extensions.keys().map(|e| format!(".{}", e)).collect();
        exts.sort();
        exts
    }

    /// Whether some registered extractor claims this file's extension.
    pub fn claims(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(normalize_extension)
            .and_then(|ext| self.extensions.get(&ext))
            .is_some_and(|token| self.constructors.contains_key(token))
    }
}

impl ExtractorProvider for ExtractorFactory {
    fn mode(&self) -> ValidationMode {
        self.mode
    }

    fn for_format(&self, token: &str) -> Result<Box<dyn MetadataExtractor>, UnsupportedFormatError> {
        self.create_for_format(token)
    }

    fn for_file(&self, path: &Path) -> Result<Box<dyn MetadataExtractor>, UnsupportedFormatError> {
        self.create_for_file(path)
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}
