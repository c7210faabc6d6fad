//! Offline extraction of documents already on disk.
//!
//! A single file is extracted with the extractor its extension selects. A
//! directory is walked recursively and every file whose extension some
//! registered extractor claims is extracted; `.git/` and `target/` are
//! skipped. No network access happens here.

use anyhow::{bail, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::IngestError;
use crate::factory::ExtractorProvider;
use crate::models::IngestRecord;
use crate::pipeline::assemble_record;
use crate::validation::Validator;

/// Files under `root` matching any of `extensions` (`".xml"` or `"xml"`),
/// sorted by path. A file path is returned as-is.
pub fn discover_files(root: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        bail!("Path does not exist: {}", root.display());
    }
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }

    let patterns: Vec<String> = extensions
        .iter()
        .map(|ext| format!("**/*.{}", ext.trim_start_matches('.')))
        .collect();
    let include_set = build_globset(&patterns)?;
    let exclude_set = build_globset(&["**/.git/**".to_string(), "**/target/**".to_string()])?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        files.push(path.to_path_buf());
    }

    files.sort();
    debug!(root = %root.display(), files = files.len(), "discovered local documents");
    Ok(files)
}

/// Extract and validate one file.
///
/// The dataset id is a UUIDv5 of `"file:<absolute path>"` and the source URL
/// is a `file://` URL.
pub fn extract_file<P: ExtractorProvider + ?Sized>(
    provider: &P,
    path: &Path,
) -> Result<IngestRecord, IngestError> {
    let extractor = provider.for_file(path)?;
    debug!(path = %path.display(), extractor = extractor.describe(), "extracting local file");
    let metadata = extractor.extract(path)?;

    let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let id = Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        format!("file:{}", absolute.display()).as_bytes(),
    );
    let source_url = format!("file://{}", absolute.display());

    assemble_record(&Validator::new(provider.mode()), metadata, id, source_url)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(GlobBuilder::new(pattern).case_insensitive(true).build()?);
    }
    Ok(builder.build()?)
}
