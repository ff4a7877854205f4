// Document ingestion: turns directories of text files into labeled records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Errors raised while reading a source directory
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Failed to list {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One text document, labeled with the directory it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Last path component of the source directory (e.g. `api.slack.com`)
    pub source_name: String,
    /// Grouping label for downstream indexing; same as `source_name`
    pub node_set_category: String,
    pub filename: String,
    pub content: String,
    /// SHA-256 of the content, hex encoded
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

/// Set of directories to read documents from
#[derive(Debug, Clone)]
pub struct DocumentSource {
    locations: Vec<PathBuf>,
    extension: String,
}

impl DocumentSource {
    pub fn new(locations: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            locations: locations.into_iter().map(Into::into).collect(),
            extension: "txt".to_string(),
        }
    }

    /// Only files with this extension are read (default `txt`)
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into().trim_start_matches('.').to_string();
        self
    }

    pub fn locations(&self) -> &[PathBuf] {
        &self.locations
    }

    /// Read every matching file of every location.
    ///
    /// Locations are visited in configuration order and files in filename
    /// order; subdirectories are not descended into.
    pub fn records(&self) -> impl Iterator<Item = Result<DocumentRecord, IngestError>> + '_ {
        self.locations
            .iter()
            .flat_map(move |location| self.location_records(location))
    }

    /// Collect all records, stopping at the first error
    pub fn collect(&self) -> Result<Vec<DocumentRecord>, IngestError> {
        self.records().collect()
    }

    fn location_records<'a>(
        &'a self,
        location: &'a Path,
    ) -> Box<dyn Iterator<Item = Result<DocumentRecord, IngestError>> + 'a> {
        tracing::info!(location = %location.display(), "Browsing source");

        let source_name = source_label(location);
        let walker = walkdir::WalkDir::new(location)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();

        Box::new(walker.into_iter().filter_map(move |entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    return Some(Err(IngestError::Walk {
                        path: location.to_path_buf(),
                        source: e,
                    }))
                }
            };

            if !entry.file_type().is_file() || !self.matches_extension(entry.path()) {
                return None;
            }

            Some(read_record(&source_name, entry.path()))
        }))
    }

    fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext == self.extension)
            .unwrap_or(false)
    }
}

fn read_record(source_name: &str, path: &Path) -> Result<DocumentRecord, IngestError> {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    tracing::debug!(filename = %filename, "Reading document");

    let content = std::fs::read_to_string(path).map_err(|e| IngestError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;

    let modified_at = std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .map(DateTime::<Utc>::from);

    Ok(DocumentRecord {
        source_name: source_name.to_string(),
        node_set_category: source_name.to_string(),
        filename,
        content_hash: hex::encode(Sha256::digest(content.as_bytes())),
        content,
        modified_at,
    })
}

fn source_label(location: &Path) -> String {
    location
        .components()
        .next_back()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .unwrap_or_else(|| location.display().to_string())
}
