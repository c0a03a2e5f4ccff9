//! Document ingestion: scan → extract → chunk.
//!
//! Walks the documents root with `walkdir`, filters paths with `globset`
//! include/exclude patterns, extracts text by extension and chunks it.
//! A file that cannot be read is reported as `DocumentUnreadable` and
//! skipped; the rest of the directory is still ingested.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use flipflops_core::chunk::{chunk_text, content_hash};
use flipflops_core::models::Document;
use flipflops_core::FlipflopsError;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::extract::{content_type_for, extract_text};

/// Result of one pass over the documents root.
#[derive(Debug, Default)]
pub struct IngestOutcome {
    /// Successfully extracted documents, sorted by source path.
    pub documents: Vec<Document>,
    /// One `DocumentUnreadable` per skipped file.
    pub failures: Vec<FlipflopsError>,
}

/// A file selected by the include/exclude globs.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    /// `/`-separated path relative to the root.
    pub relative: String,
}

/// Stable document id: first 16 hex chars of SHA-256 of the relative path.
pub fn document_id(relative_path: &str) -> String {
    content_hash(relative_path)[..16].to_string()
}

/// Topic label for a document: its first directory under the root, or
/// the file stem for top-level files.
pub fn topic_for(relative_path: &str) -> Option<String> {
    let mut parts = relative_path.split('/');
    let first = parts.next()?;
    if parts.next().is_some() {
        return Some(first.to_string());
    }
    Path::new(first)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
}

pub fn scan_documents(config: &Config) -> Result<Vec<SourceFile>> {
    let root = config.documents_root();
    if !root.exists() {
        bail!("Documents root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.documents.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.documents.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();

    let walker = WalkDir::new(&root).follow_links(config.documents.follow_symlinks);
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(&root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        files.push(SourceFile {
            path: path.to_path_buf(),
            relative: rel_str,
        });
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

/// Read, extract and chunk a single file.
pub fn load_document(file: &SourceFile, max_tokens: usize) -> Result<Document, FlipflopsError> {
    let unreadable = |reason: String| FlipflopsError::DocumentUnreadable {
        path: file.relative.clone(),
        reason,
    };

    let content_type = content_type_for(&file.path)
        .ok_or_else(|| unreadable("unsupported file type".to_string()))?;
    let bytes = std::fs::read(&file.path).map_err(|e| unreadable(e.to_string()))?;
    let text = extract_text(&bytes, content_type).map_err(|e| unreadable(e.to_string()))?;

    let id = document_id(&file.relative);
    let chunks = chunk_text(&id, &text, max_tokens);
    if chunks.is_empty() {
        return Err(unreadable("no extractable text".to_string()));
    }

    let title = file
        .path
        .file_stem()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file.relative.clone());

    Ok(Document {
        hash: content_hash(&text),
        id,
        source_path: file.relative.clone(),
        title,
        content_type: content_type.to_string(),
        topic: topic_for(&file.relative),
        text,
        chunks,
    })
}

/// Scan the documents root and load every matching file.
pub fn ingest_directory(config: &Config) -> Result<IngestOutcome> {
    let files = scan_documents(config)?;
    let mut outcome = IngestOutcome::default();
    for file in &files {
        match load_document(file, config.chunking.max_tokens) {
            Ok(doc) => {
                debug!(path = %doc.source_path, chunks = doc.chunks.len(), "document extracted");
                outcome.documents.push(doc);
            }
            Err(e) => {
                warn!(error = %e, "skipping document");
                outcome.failures.push(e);
            }
        }
    }
    Ok(outcome)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
