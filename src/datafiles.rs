//! Data-file discovery for an ingested dataset.
//!
//! Runs after metadata ingestion, never as part of it. The dataset's
//! [`AccessType`] picks the strategy:
//!
//! | Access type | Source URL | Result |
//! |-------------|------------|--------|
//! | `fileAccess` | download URL, else landing page | Files listed from the HTML folder index, not downloaded |
//! | `download` | landing page if it ends in `.zip`, else download URL | Archive entries unpacked to `<dir>/<dataset id>/` |
//!
//! Folder crawling stays on the root's host and below the root path,
//! follows subfolders up to `max_depth` levels, and stops at `max_files`.
//! Archives are rejected once the compressed or the unpacked size passes
//! `max_size_bytes`.

use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use scraper::{Html, Selector};
use std::collections::{HashSet, VecDeque};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Config, DataFilesConfig};
use crate::error::DataFileError;
use crate::fetcher::{read_limited, BodyError};
use crate::models::{checksum, file_format_of, AccessType, DataFile, Metadata};

/// Links with these extensions are pages, not data.
const PAGE_EXTENSIONS: &[&str] = &["html", "htm", "php", "asp", "aspx"];

/// Largest folder index page read.
const MAX_LISTING_BYTES: u64 = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFileLimits {
    pub max_files: usize,
    pub max_depth: usize,
    pub max_size_bytes: u64,
}

impl Default for DataFileLimits {
    fn default() -> Self {
        Self::from_config(&DataFilesConfig::default())
    }
}

impl DataFileLimits {
    pub fn from_config(cfg: &DataFilesConfig) -> Self {
        Self {
            max_files: cfg.max_files,
            max_depth: cfg.max_depth,
            max_size_bytes: cfg.max_size_bytes(),
        }
    }
}

/// Folder that lists a fileAccess dataset's files.
pub fn folder_url(metadata: &Metadata) -> Option<&str> {
    metadata
        .download_url
        .as_deref()
        .or(metadata.landing_page_url.as_deref())
        .filter(|u| !u.trim().is_empty())
}

/// Archive holding a download dataset's files.
pub fn archive_url(metadata: &Metadata) -> Option<&str> {
    let landing = metadata
        .landing_page_url
        .as_deref()
        .filter(|u| u.to_ascii_lowercase().ends_with(".zip"));
    landing
        .or(metadata.download_url.as_deref())
        .filter(|u| !u.trim().is_empty())
}

// ═══════════════════════════════════════════════════════════════════════
// Fetcher
// ═══════════════════════════════════════════════════════════════════════

pub struct DataFileFetcher {
    client: reqwest::Client,
    limits: DataFileLimits,
    download_dir: PathBuf,
}

enum Listing {
    Html(String),
    /// Not an index page; the size when the server declared one.
    File(Option<u64>),
}

enum Link {
    Folder(Url),
    File(Url),
}

impl DataFileFetcher {
    pub fn new(
        limits: DataFileLimits,
        download_dir: impl Into<PathBuf>,
        timeout: Duration,
        user_agent: &str,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            limits,
            download_dir: download_dir.into(),
        })
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        Self::new(
            DataFileLimits::from_config(&cfg.data_files),
            cfg.data_files.dir.clone(),
            cfg.fetch.timeout(),
            &cfg.fetch.user_agent,
        )
    }

    pub fn limits(&self) -> &DataFileLimits {
        &self.limits
    }

    /// Discover the dataset's files. A dataset with no usable URL has none.
    pub async fn discover(
        &self,
        dataset_id: Uuid,
        metadata: &Metadata,
    ) -> Result<Vec<DataFile>, DataFileError> {
        let files = match metadata.access_type {
            AccessType::FileAccess => match folder_url(metadata) {
                Some(url) => self.list_folder(dataset_id, url).await?,
                None => Vec::new(),
            },
            AccessType::Download => match archive_url(metadata) {
                Some(url) => self.unpack_archive(dataset_id, url).await?,
                None => Vec::new(),
            },
        };
        info!(dataset = %dataset_id, count = files.len(), "data files discovered");
        Ok(files)
    }

    /// Crawl an HTML folder index breadth-first. Only a failure on the root
    /// page is an error; failing subfolders are logged and skipped.
    pub async fn list_folder(
        &self,
        dataset_id: Uuid,
        folder: &str,
    ) -> Result<Vec<DataFile>, DataFileError> {
        let root = Url::parse(folder).map_err(|e| DataFileError::InvalidUrl {
            url: folder.to_string(),
            reason: e.to_string(),
        })?;
        let base = with_trailing_slash(&root);

        let mut files = Vec::new();
        let mut seen = HashSet::new();
        let mut visited = HashSet::from([base.to_string()]);
        let mut queue = VecDeque::from([(root, 0usize)]);

        while let Some((page, depth)) = queue.pop_front() {
            if files.len() >= self.limits.max_files {
                break;
            }
            let html = match self.fetch_listing(&page).await {
                Ok(Listing::Html(html)) => html,
                Ok(Listing::File(size)) => {
                    if seen.insert(page.to_string()) {
                        let mut file = DataFile::remote(dataset_id, &relative_name(&base, &page), page.as_str());
                        file.file_size = size.unwrap_or(0);
                        files.push(file);
                    }
                    continue;
                }
                Err(e) if depth == 0 => return Err(e),
                Err(e) => {
                    warn!(url = %page, error = %e, "skipping unreadable folder");
                    continue;
                }
            };

            let page_base = with_trailing_slash(&page);
            for (href, text) in listing_links(&html) {
                match classify_link(&base, &page_base, &href, &text) {
                    Some(Link::Folder(url)) => {
                        if depth < self.limits.max_depth && visited.insert(url.to_string()) {
                            queue.push_back((url, depth + 1));
                        }
                    }
                    Some(Link::File(url)) => {
                        if seen.insert(url.to_string()) {
                            files.push(DataFile::remote(dataset_id, &relative_name(&base, &url), url.as_str()));
                            if files.len() >= self.limits.max_files {
                                debug!(max = self.limits.max_files, "file limit reached");
                                break;
                            }
                        }
                    }
                    None => {}
                }
            }
        }
        Ok(files)
    }

    async fn fetch_listing(&self, url: &Url) -> Result<Listing, DataFileError> {
        let request_error = |e: reqwest::Error| DataFileError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        };
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(request_error)?;

        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.to_ascii_lowercase().starts_with("text/html"))
            .unwrap_or(false);
        if !is_html {
            return Ok(Listing::File(response.content_length()));
        }

        match read_limited(response, MAX_LISTING_BYTES).await {
            Ok(body) => Ok(Listing::Html(String::from_utf8_lossy(&body).into_owned())),
            Err(BodyError::TooLarge(size)) => Err(DataFileError::TooLarge {
                url: url.to_string(),
                size,
                limit: MAX_LISTING_BYTES,
            }),
            Err(BodyError::Read(e)) => Err(request_error(e)),
        }
    }

    /// Download a ZIP archive and unpack it under `<dir>/<dataset id>/`.
    pub async fn unpack_archive(
        &self,
        dataset_id: Uuid,
        url: &str,
    ) -> Result<Vec<DataFile>, DataFileError> {
        let parsed = Url::parse(url).map_err(|e| DataFileError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let request_error = |e: reqwest::Error| DataFileError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        };
        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(request_error)?;

        let limit = self.limits.max_size_bytes;
        let bytes = match read_limited(response, limit).await {
            Ok(bytes) => bytes,
            Err(BodyError::TooLarge(size)) => {
                return Err(DataFileError::TooLarge {
                    url: url.to_string(),
                    size,
                    limit,
                })
            }
            Err(BodyError::Read(e)) => return Err(request_error(e)),
        };
        debug!(url, bytes = bytes.len(), "archive downloaded");

        let dest = self.download_dir.join(dataset_id.to_string());
        let limits = self.limits.clone();
        let owned_url = url.to_string();
        tokio::task::spawn_blocking(move || unpack_zip(&bytes, &dest, dataset_id, &limits, &owned_url))
            .await
            .map_err(|e| DataFileError::Archive {
                url: url.to_string(),
                message: format!("unpack task failed: {}", e),
            })?
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Folder index parsing
// ═══════════════════════════════════════════════════════════════════════

/// `(href, link text)` for every anchor in an index page.
fn listing_links(html: &str) -> Vec<(String, String)> {
    let Ok(anchors) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    Html::parse_document(html)
        .select(&anchors)
        .filter_map(|a| {
            let href = a.value().attr("href")?.trim().to_string();
            let text = a.text().collect::<String>().trim().to_string();
            Some((href, text))
        })
        .collect()
}

fn classify_link(base: &Url, page_base: &Url, href: &str, text: &str) -> Option<Link> {
    if href.is_empty() || href.starts_with('#') || href.starts_with('?') {
        return None;
    }
    if matches!(href, "../" | "./" | "/") {
        return None;
    }
    let mut url = page_base.join(href).ok()?;
    url.set_fragment(None);
    if url.host_str() != base.host_str() || url.port_or_known_default() != base.port_or_known_default() {
        return None;
    }
    if !url.as_str().starts_with(base.as_str()) || url.as_str() == base.as_str() {
        return None;
    }

    if href.ends_with('/') || text.ends_with('/') {
        return Some(Link::Folder(with_trailing_slash(&url)));
    }
    let format = file_format_of(url.path());
    if PAGE_EXTENSIONS.contains(&format.as_str()) {
        return None;
    }
    Some(Link::File(url))
}

fn with_trailing_slash(url: &Url) -> Url {
    let mut url = url.clone();
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Path of `url` below `base`; the last path segment when `url` is the base.
fn relative_name(base: &Url, url: &Url) -> String {
    let relative = url
        .as_str()
        .strip_prefix(base.as_str())
        .map(|rest| rest.split(['?', '#']).next().unwrap_or(rest).trim_end_matches('/'))
        .unwrap_or("");
    if !relative.is_empty() {
        return relative.to_string();
    }
    url.path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(str::to_string)
        .unwrap_or_else(|| url.host_str().unwrap_or_default().to_string())
}

// ═══════════════════════════════════════════════════════════════════════
// Archive unpacking
// ═══════════════════════════════════════════════════════════════════════

/// Unpack a ZIP archive into `dest`, skipping directories and entries whose
/// names would escape it. The unpacked total may not exceed
/// `limits.max_size_bytes`.
pub fn unpack_zip(
    bytes: &[u8],
    dest: &Path,
    dataset_id: Uuid,
    limits: &DataFileLimits,
    url: &str,
) -> Result<Vec<DataFile>, DataFileError> {
    let archive_error = |e: &dyn std::fmt::Display| DataFileError::Archive {
        url: url.to_string(),
        message: e.to_string(),
    };
    let too_large = |size: u64| DataFileError::TooLarge {
        url: url.to_string(),
        size,
        limit: limits.max_size_bytes,
    };

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| archive_error(&e))?;
    std::fs::create_dir_all(dest).map_err(|source| DataFileError::Io {
        path: dest.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    let mut unpacked = 0u64;
    for i in 0..archive.len() {
        if files.len() >= limits.max_files {
            debug!(max = limits.max_files, "file limit reached");
            break;
        }
        let entry = archive.by_index(i).map_err(|e| archive_error(&e))?;
        if entry.is_dir() {
            continue;
        }
        let Some(relative) = entry.enclosed_name() else {
            warn!(entry = entry.name(), "skipping archive entry outside the target folder");
            continue;
        };
        let remaining = limits.max_size_bytes - unpacked;
        if entry.size() > remaining {
            return Err(too_large(unpacked + entry.size()));
        }

        let mut content = Vec::new();
        entry
            .take(remaining.saturating_add(1))
            .read_to_end(&mut content)
            .map_err(|e| archive_error(&e))?;
        let size = content.len() as u64;
        if size > remaining {
            return Err(too_large(unpacked + size));
        }
        unpacked += size;

        let path = dest.join(&relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| DataFileError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&path, &content).map_err(|source| DataFileError::Io {
            path: path.clone(),
            source,
        })?;

        let name = relative.to_string_lossy().replace('\\', "/");
        files.push(DataFile::stored(
            dataset_id,
            &name,
            &path.to_string_lossy(),
            size,
            checksum(&content),
        ));
    }
    info!(url, count = files.len(), bytes = unpacked, "archive unpacked");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(content).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    fn scratch_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mdh-datafiles-{}-{}", label, Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn metadata() -> Metadata {
        Metadata {
            title: "T".into(),
            abstract_text: "A".into(),
            keywords: vec![],
            bounding_box: None,
            temporal_extent_start: None,
            temporal_extent_end: None,
            contact_organization: None,
            contact_email: None,
            metadata_date: None,
            dataset_language: "eng".into(),
            topic_category: None,
            download_url: None,
            landing_page_url: None,
            access_type: AccessType::Download,
            raw_document: "{}".into(),
            document_format: crate::models::DocumentFormat::Json,
            document_checksum: checksum(b"{}"),
            warnings: vec![],
        }
    }

    #[test]
    fn source_urls_follow_access_type_rules() {
        let mut m = metadata();
        assert_eq!(folder_url(&m), None);
        assert_eq!(archive_url(&m), None);

        m.landing_page_url = Some("https://x.org/page".into());
        assert_eq!(folder_url(&m), Some("https://x.org/page"));
        assert_eq!(archive_url(&m), None);

        m.download_url = Some("https://x.org/data/".into());
        assert_eq!(folder_url(&m), Some("https://x.org/data/"));
        assert_eq!(archive_url(&m), Some("https://x.org/data/"));

        m.landing_page_url = Some("https://x.org/all.ZIP".into());
        assert_eq!(archive_url(&m), Some("https://x.org/all.ZIP"));
    }

    #[test]
    fn listing_links_reads_anchor_text() {
        let links = listing_links(r#"<html><body><a href="a.csv"> a.csv </a><a>none</a><a href="sub/">sub/</a></body></html>"#);
        assert_eq!(
            links,
            vec![
                ("a.csv".to_string(), "a.csv".to_string()),
                ("sub/".to_string(), "sub/".to_string()),
            ]
        );
    }

    #[test]
    fn link_rules() {
        let base = url("http://h/data/");
        let page = base.clone();
        let file = |href: &str, text: &str| match classify_link(&base, &page, href, text) {
            Some(Link::File(u)) => Some(format!("file {}", u)),
            Some(Link::Folder(u)) => Some(format!("dir {}", u)),
            None => None,
        };

        assert_eq!(file("a.csv", "a.csv").as_deref(), Some("file http://h/data/a.csv"));
        assert_eq!(file("sub/", "sub/").as_deref(), Some("dir http://h/data/sub/"));
        assert_eq!(file("sub", "sub/").as_deref(), Some("dir http://h/data/sub/"));
        assert_eq!(file("b.nc#part", "b").as_deref(), Some("file http://h/data/b.nc"));
        for skipped in ["", "#top", "?C=M;O=A", "../", "./", "/", "index.html", "x.php", "/other/a.csv", "http://elsewhere/data/a.csv"] {
            assert!(file(skipped, skipped).is_none(), "{skipped} should be skipped");
        }
    }

    #[test]
    fn relative_names() {
        let base = url("http://h/data/");
        assert_eq!(relative_name(&base, &url("http://h/data/sub/a.csv")), "sub/a.csv");
        assert_eq!(relative_name(&base, &url("http://h/data/")), "data");
        assert_eq!(relative_name(&base, &url("http://h/elsewhere/b.csv")), "b.csv");
    }

    #[test]
    fn unpack_writes_entries_with_checksums() {
        let dir = scratch_dir("unpack");
        let bytes = zip_of(&[("docs/", b""), ("docs/readme.txt", b"hello"), ("data.csv", b"a,b\n1,2\n")]);
        let dataset = Uuid::new_v4();

        let files = unpack_zip(&bytes, &dir, dataset, &DataFileLimits::default(), "http://h/a.zip").unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].filename, "docs/readme.txt");
        assert_eq!(files[0].file_size, 5);
        assert_eq!(files[0].checksum.as_deref(), Some(checksum(b"hello").as_str()));
        assert_eq!(files[1].file_format, "csv");
        assert!(files.iter().all(|f| f.is_downloaded() && f.dataset_id == dataset));
        assert_eq!(std::fs::read(dir.join("docs/readme.txt")).unwrap(), b"hello");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unpack_stops_at_file_limit_and_size_budget() {
        let dir = scratch_dir("limits");
        let bytes = zip_of(&[("a.txt", b"aaaa"), ("b.txt", b"bbbb"), ("c.txt", b"cccc")]);
        let limits = DataFileLimits {
            max_files: 2,
            ..DataFileLimits::default()
        };
        let files = unpack_zip(&bytes, &dir, Uuid::new_v4(), &limits, "u").unwrap();
        assert_eq!(files.len(), 2);

        let tight = DataFileLimits {
            max_size_bytes: 6,
            ..DataFileLimits::default()
        };
        let err = unpack_zip(&bytes, &dir, Uuid::new_v4(), &tight, "u").unwrap_err();
        assert!(matches!(err, DataFileError::TooLarge { limit: 6, .. }), "got {err}");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unpack_skips_entries_escaping_the_target() {
        let dir = scratch_dir("escape");
        let bytes = zip_of(&[("../evil.txt", b"x"), ("ok.txt", b"y")]);
        let files = unpack_zip(&bytes, &dir.join("ds"), Uuid::new_v4(), &DataFileLimits::default(), "u").unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "ok.txt");
        assert!(!dir.join("evil.txt").exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn garbage_is_an_archive_error() {
        let err = unpack_zip(b"not a zip", Path::new("unused"), Uuid::new_v4(), &DataFileLimits::default(), "u")
            .unwrap_err();
        assert!(matches!(err, DataFileError::Archive { .. }));
    }
}
