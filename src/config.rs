use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::DocumentFormat;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/mdh.toml";

/// Placeholder every URL template must contain.
pub const IDENTIFIER_PLACEHOLDER: &str = "{identifier}";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub data_files: DataFilesConfig,
    #[serde(default)]
    pub catalogues: BTreeMap<String, CatalogueConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Attempts per URL candidate.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Directory for fetched documents; the system temp dir when unset.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Largest response body accepted from a catalogue.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            temp_dir: None,
            user_agent: default_user_agent(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_backoff_max_ms() -> u64 {
    30_000
}
fn default_user_agent() -> String {
    format!("metadata-harness/{}", env!("CARGO_PKG_VERSION"))
}
fn default_max_body_bytes() -> u64 {
    50 * 1024 * 1024
}

/// Limits for `mdh ingest --data-files`.
#[derive(Debug, Deserialize, Clone)]
pub struct DataFilesConfig {
    /// Most files listed from a folder or unpacked from an archive.
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    /// Subfolder levels followed below a fileAccess folder.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Largest archive (and total unpacked size) accepted.
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,
    /// Archives unpack to `<dir>/<dataset id>/`.
    #[serde(default = "default_data_dir")]
    pub dir: PathBuf,
}

impl Default for DataFilesConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            max_depth: default_max_depth(),
            max_size_mb: default_max_size_mb(),
            dir: default_data_dir(),
        }
    }
}

impl DataFilesConfig {
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(1024 * 1024)
    }
}

fn default_max_files() -> usize {
    200
}
fn default_max_depth() -> usize {
    1
}
fn default_max_size_mb() -> u64 {
    500
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data_files")
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ValidationConfig {
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CatalogueConfig {
    #[serde(default)]
    pub description: String,
    pub endpoints: Vec<EndpointConfig>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct EndpointConfig {
    /// URL template containing `{identifier}`.
    pub url: String,
    pub format: DocumentFormat,
    #[serde(default)]
    pub kind: EndpointKind,
    /// `Accept` header; negotiated endpoints default to the format's MIME type.
    #[serde(default)]
    pub accept: Option<String>,
}

/// Where an endpoint sits in the candidate order.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    /// Format-specific URL, tried in declared order.
    #[default]
    Primary,
    /// Catalogue-specific fallback URL.
    Alternate,
    /// Generic base URL relying on `Accept` content negotiation.
    Negotiated,
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            EndpointKind::Primary => "primary",
            EndpointKind::Alternate => "alternate",
            EndpointKind::Negotiated => "negotiated",
        })
    }
}

impl EndpointConfig {
    fn new(url: &str, format: DocumentFormat, kind: EndpointKind) -> Self {
        Self {
            url: url.to_string(),
            format,
            kind,
            accept: None,
        }
    }
}

/// Profiles shipped with the binary. A `[catalogues.<name>]` entry with the
/// same name replaces one of these.
pub fn builtin_catalogues() -> BTreeMap<String, CatalogueConfig> {
    use DocumentFormat::{Json, JsonLd, Rdf, Xml};
    use EndpointKind::{Alternate, Negotiated, Primary};

    let mut catalogues = BTreeMap::new();
    catalogues.insert(
        "ceh".to_string(),
        CatalogueConfig {
            description: "UKCEH Environmental Information Data Centre catalogue".to_string(),
            endpoints: vec![
                EndpointConfig::new(
                    "https://catalogue.ceh.ac.uk/documents/{identifier}?format=json",
                    Json,
                    Primary,
                ),
                EndpointConfig::new(
                    "https://catalogue.ceh.ac.uk/documents/{identifier}.xml?format=gemini",
                    Xml,
                    Primary,
                ),
                EndpointConfig::new(
                    "https://catalogue.ceh.ac.uk/documents/gemini/waf/{identifier}.xml",
                    Xml,
                    Alternate,
                ),
                EndpointConfig::new(
                    "https://catalogue.ceh.ac.uk/documents/{identifier}?format=schema.org",
                    JsonLd,
                    Alternate,
                ),
                EndpointConfig::new(
                    "https://catalogue.ceh.ac.uk/documents/{identifier}?format=ttl",
                    Rdf,
                    Alternate,
                ),
                EndpointConfig::new("https://catalogue.ceh.ac.uk/id/{identifier}", Json, Negotiated),
                EndpointConfig::new("https://catalogue.ceh.ac.uk/id/{identifier}", Xml, Negotiated),
            ],
        },
    );
    catalogues.insert(
        "ceda".to_string(),
        CatalogueConfig {
            description: "CEDA archive catalogue".to_string(),
            endpoints: vec![
                EndpointConfig::new(
                    "https://catalogue.ceda.ac.uk/uuid/{identifier}?format=json",
                    Json,
                    Primary,
                ),
                EndpointConfig::new(
                    "https://catalogue.ceda.ac.uk/uuid/{identifier}?format=xml",
                    Xml,
                    Primary,
                ),
                EndpointConfig::new(
                    "https://catalogue.ceda.ac.uk/uuid/{identifier}",
                    Json,
                    Negotiated,
                ),
                EndpointConfig::new(
                    "https://catalogue.ceda.ac.uk/uuid/{identifier}",
                    Xml,
                    Negotiated,
                ),
            ],
        },
    );
    catalogues
}

impl Config {
    /// Defaults plus the built-in catalogues; used when no file exists.
    pub fn minimal() -> Self {
        Self {
            fetch: FetchConfig::default(),
            validation: ValidationConfig::default(),
            data_files: DataFilesConfig::default(),
            catalogues: builtin_catalogues(),
        }
    }

    pub fn catalogue(&self, name: &str) -> Option<&CatalogueConfig> {
        self.catalogues.get(name)
    }

    pub fn catalogue_names(&self) -> Vec<String> {
        self.catalogues.keys().cloned().collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch.timeout_secs == 0 {
            anyhow::bail!("fetch.timeout_secs must be > 0");
        }
        if self.fetch.max_retries == 0 {
            anyhow::bail!("fetch.max_retries must be >= 1");
        }
        if self.fetch.backoff_max_ms < self.fetch.backoff_base_ms {
            anyhow::bail!("fetch.backoff_max_ms must be >= fetch.backoff_base_ms");
        }
        if self.fetch.max_body_bytes == 0 {
            anyhow::bail!("fetch.max_body_bytes must be > 0");
        }
        if self.data_files.max_files == 0 {
            anyhow::bail!("data_files.max_files must be >= 1");
        }
        if self.data_files.max_size_mb == 0 {
            anyhow::bail!("data_files.max_size_mb must be > 0");
        }

        for (name, catalogue) in &self.catalogues {
            if catalogue.endpoints.is_empty() {
                anyhow::bail!("catalogues.{} must declare at least one endpoint", name);
            }
            for endpoint in &catalogue.endpoints {
                if !endpoint.url.contains(IDENTIFIER_PLACEHOLDER) {
                    anyhow::bail!(
                        "catalogues.{}: endpoint '{}' does not contain {}",
                        name,
                        endpoint.url,
                        IDENTIFIER_PLACEHOLDER
                    );
                }
                if !(endpoint.url.starts_with("http://") || endpoint.url.starts_with("https://")) {
                    anyhow::bail!(
                        "catalogues.{}: endpoint '{}' must be an http(s) URL",
                        name,
                        endpoint.url
                    );
                }
            }
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    for (name, profile) in builtin_catalogues() {
        config.catalogues.entry(name).or_insert(profile);
    }

    config.validate()?;
    Ok(config)
}

/// Load `path` if given, else the default path if it exists, else
/// [`Config::minimal`]. An explicitly given path must exist.
pub fn resolve_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => load_config(p),
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if default.exists() {
                load_config(default)
            } else {
                Ok(Config::minimal())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn minimal_config_is_valid() {
        let config = Config::minimal();
        config.validate().unwrap();
        assert_eq!(config.fetch.max_retries, 3);
        assert_eq!(config.fetch.timeout(), Duration::from_secs(60));
        assert!(!config.validation.strict);
        assert_eq!(config.catalogue_names(), vec!["ceda", "ceh"]);
    }

    #[test]
    fn file_catalogues_merge_with_builtins() {
        let file = write_config(
            r#"
[fetch]
timeout_secs = 5
max_retries = 2

[validation]
strict = true

[catalogues.local]
description = "Test catalogue"
endpoints = [
  { url = "http://127.0.0.1:9000/{identifier}.json", format = "json" },
  { url = "http://127.0.0.1:9000/{identifier}", format = "xml", kind = "negotiated", accept = "application/vnd.iso.19139+xml" },
]
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.fetch.timeout_secs, 5);
        assert_eq!(config.fetch.backoff_base_ms, 1000);
        assert!(config.validation.strict);
        let local = config.catalogue("local").unwrap();
        assert_eq!(local.endpoints[0].kind, EndpointKind::Primary);
        assert_eq!(local.endpoints[1].kind, EndpointKind::Negotiated);
        assert!(config.catalogue("ceh").is_some());
    }

    #[test]
    fn file_entry_replaces_builtin() {
        let file = write_config(
            r#"
[catalogues.ceh]
endpoints = [{ url = "http://localhost/{identifier}", format = "xml" }]
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.catalogue("ceh").unwrap().endpoints.len(), 1);
    }

    #[test]
    fn template_without_placeholder_is_rejected() {
        let file = write_config(
            r#"
[catalogues.bad]
endpoints = [{ url = "http://localhost/fixed.json", format = "json" }]
"#,
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("{identifier}"));
    }

    #[test]
    fn data_file_and_body_limits() {
        let config = Config::minimal();
        assert_eq!(config.fetch.max_body_bytes, 50 * 1024 * 1024);
        assert_eq!(config.data_files.max_files, 200);
        assert_eq!(config.data_files.max_depth, 1);
        assert_eq!(config.data_files.max_size_bytes(), 500 * 1024 * 1024);

        let file = write_config("[data_files]\nmax_files = 10\nmax_size_mb = 2\n");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.data_files.max_files, 10);
        assert_eq!(config.data_files.max_size_bytes(), 2 * 1024 * 1024);

        let file = write_config("[fetch]\nmax_body_bytes = 0\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn zero_retries_is_rejected() {
        let file = write_config("[fetch]\nmax_retries = 0\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn unknown_format_is_a_parse_error() {
        let file = write_config(
            r#"
[catalogues.bad]
endpoints = [{ url = "http://localhost/{identifier}", format = "csv" }]
"#,
        );
        assert!(load_config(file.path()).is_err());
    }
}
