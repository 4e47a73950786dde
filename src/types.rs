/*!
 * Core types and data structures for repoprompt
 *
 * Records are built bottom-up during the walk and never mutated after they have been
 * handed to a caller; every fix-up is a rewrite pass that produces new records.
 */

use std::path::PathBuf;

use strum::{AsRefStr, Display};

/// Why a file's full text was left out of the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum ElisionReason {
    /// Content embedding is switched off
    ContentDisabled,
    /// File is larger than `max_file_size`
    ExceedsMaxFileSize,
    /// File is larger than the hard safety ceiling and was never fully read
    ExceedsSafetyLimit,
    /// Embedding it would exceed `max_total_size`
    ExceedsTotalSize,
    /// File looks binary
    Binary,
}

/// Content of a file record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    /// Full text (possibly empty)
    Text(String),
    /// Metadata only
    Elided(ElisionReason),
}

/// A file in the processing result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Base file name
    pub name: String,
    /// Forward-slash path relative to the anchor, unique within one result
    pub path: String,
    /// Size in bytes at read time
    pub size: u64,
    /// Full text or the reason it was left out
    pub content: FileContent,
    /// First meaningful lines of the file
    pub summary: Option<String>,
    /// Late-stage exclusion marker
    pub ignored: bool,
}

impl FileRecord {
    /// Same record with its content replaced
    pub fn with_content(self, content: FileContent) -> Self {
        Self { content, ..self }
    }
}

/// A folder in the processing result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderRecord {
    /// Base directory name
    pub name: String,
    /// Forward-slash path relative to the anchor; `""` for the anchor itself
    pub path: String,
    /// Direct child files
    pub files: Vec<FileRecord>,
    /// Direct child folders
    pub folders: Vec<FolderRecord>,
    /// Children may be incomplete (symlink, depth cutoff, read error, repeated visit)
    pub truncated: bool,
}

impl FolderRecord {
    /// Empty folder record
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Empty folder record whose contents are known to be incomplete
    pub fn truncated(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            truncated: true,
            ..Self::new(name, path)
        }
    }

    /// Whether any file exists anywhere beneath this folder
    pub fn has_files(&self) -> bool {
        !self.files.is_empty() || self.folders.iter().any(FolderRecord::has_files)
    }

    /// Number of files anywhere beneath this folder
    pub fn file_count(&self) -> usize {
        self.files.len() + self.folders.iter().map(FolderRecord::file_count).sum::<usize>()
    }
}

/// A selected item that could not be processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedItem {
    /// Absolute path of the item
    pub path: PathBuf,
    /// Human-readable reason
    pub reason: String,
}

/// Outcome of processing one selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingResult {
    /// Top-level folders
    pub structure: Vec<FolderRecord>,
    /// Every file reachable from the forest plus root-level files, deduplicated by path
    pub files: Vec<FileRecord>,
    /// Directory every relative path starts from
    pub root_path: PathBuf,
    /// Free-text prompt to embed verbatim
    pub prompt: Option<String>,
    /// Items and files skipped along the way
    pub skipped: Vec<SkippedItem>,
}

/// One self-contained XML document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlChunk {
    /// Serialized document
    pub content: String,
    /// 1-based position
    pub chunk_number: usize,
    /// Number of chunks produced
    pub total_chunks: usize,
    /// Files serialized in this and every previous chunk
    pub files_processed: usize,
    /// Files in the whole result
    pub total_files: usize,
}
