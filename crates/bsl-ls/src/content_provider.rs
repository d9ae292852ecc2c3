//
// content_provider.rs
//
// Access to the saved content of documents that are not open
//

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use url::Url;

/// Source of saved document text
///
/// The workspace reads closed documents through this trait: when a document
/// is closed, and when the client reports a changed or created file.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Saved text of `uri`
    ///
    /// # Returns
    /// `Ok(None)` when there is nothing to read (no such file, not a file
    /// URI, or larger than the configured limit)
    async fn read(&self, uri: &Url) -> Result<Option<String>>;
}

/// Read a source file, dropping a UTF-8 byte order mark
///
/// # Returns
/// `Ok(None)` for missing files and files larger than `max_size`
pub fn read_source_file(path: &Path, max_size: usize) -> Result<Option<String>> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("reading metadata of {}", path.display())),
    };
    if !metadata.is_file() {
        return Ok(None);
    }
    if metadata.len() > max_size as u64 {
        log::warn!(
            "Skipping {}: {} bytes exceeds the {} byte limit",
            path.display(),
            metadata.len(),
            max_size
        );
        return Ok(None);
    }

    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let text = String::from_utf8(bytes).with_context(|| format!("{} is not valid UTF-8", path.display()))?;
    Ok(Some(match text.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    }))
}

/// Reads saved files from disk on the blocking pool
#[derive(Debug, Clone)]
pub struct DiskContentSource {
    max_file_size_bytes: usize,
}

impl DiskContentSource {
    pub fn new(max_file_size_bytes: usize) -> Self {
        Self { max_file_size_bytes }
    }
}

#[async_trait]
impl ContentSource for DiskContentSource {
    async fn read(&self, uri: &Url) -> Result<Option<String>> {
        let Ok(path) = uri.to_file_path() else {
            return Ok(None);
        };
        let max_size = self.max_file_size_bytes;
        tokio::task::spawn_blocking(move || read_source_file(&path, max_size))
            .await
            .context("file read task failed")?
    }
}
