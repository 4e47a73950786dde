/*!
 * Single-file reading
 *
 * Turns one file on disk into a [`FileRecord`]: stat, safety-ceiling check, binary sniffing,
 * lossy UTF-8 decoding, summary generation and content gating.
 */

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::{ProcessingOptions, SAFETY_LIMIT};
use crate::error::{RepoPromptError, Result};
use crate::paths;
use crate::types::{ElisionReason, FileContent, FileRecord};

/// Bytes inspected for binary detection and oversized-file summaries
pub const SNIFF_LEN: usize = 8192;

/// Lines kept in a summary
const SUMMARY_LINES: usize = 5;

/// Longest summary in characters, ellipsis included
const SUMMARY_MAX_CHARS: usize = 200;

static COMMENT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(//|#|/\*|\*)").expect("comment pattern is valid"));

/// Reads files relative to an anchor directory
#[derive(Debug, Clone)]
pub struct FileReader {
    options: Arc<ProcessingOptions>,
    anchor: PathBuf,
}

impl FileReader {
    /// Create a reader whose relative paths start at `anchor`
    pub fn new(options: Arc<ProcessingOptions>, anchor: impl Into<PathBuf>) -> Self {
        Self {
            options,
            anchor: anchor.into(),
        }
    }

    /// Read an explicitly selected file; ignore rules do not apply to it
    pub fn read_selected(&self, abs_path: &Path) -> Result<FileRecord> {
        let rel_path = paths::relative_path(&self.anchor, abs_path)?;
        self.read_at(abs_path, rel_path)
    }

    /// Read a file whose relative path is already known
    pub fn read_at(&self, abs_path: &Path, rel_path: String) -> Result<FileRecord> {
        let metadata = fs::metadata(abs_path).map_err(|e| RepoPromptError::from_io(e, abs_path))?;
        let size = metadata.len();

        if size > SAFETY_LIMIT {
            return Err(RepoPromptError::FileTooLarge {
                path: abs_path.to_path_buf(),
                size,
                limit: SAFETY_LIMIT,
            });
        }

        let bytes = fs::read(abs_path).map_err(|e| RepoPromptError::from_io(e, abs_path))?;
        let name = paths::file_name(&rel_path).to_string();

        if looks_binary(&bytes[..bytes.len().min(SNIFF_LEN)]) {
            debug!("{} looks binary", rel_path);
            return Ok(FileRecord {
                name,
                path: rel_path,
                size,
                content: FileContent::Elided(ElisionReason::Binary),
                summary: None,
                ignored: false,
            });
        }

        let text = String::from_utf8_lossy(&bytes).into_owned();
        let summary = generate_summary(&text);

        let content = if !self.options.include_content {
            FileContent::Elided(ElisionReason::ContentDisabled)
        } else if size > self.options.max_file_size {
            FileContent::Elided(ElisionReason::ExceedsMaxFileSize)
        } else {
            FileContent::Text(text)
        };

        Ok(FileRecord {
            name,
            path: rel_path,
            size,
            content,
            summary,
            ignored: false,
        })
    }

    /// Record for a file above the safety ceiling, summarized from its first bytes only
    pub fn oversized_record(&self, abs_path: &Path, rel_path: String, size: u64) -> Result<FileRecord> {
        let mut head = Vec::with_capacity(SNIFF_LEN);
        File::open(abs_path)
            .and_then(|file| file.take(SNIFF_LEN as u64).read_to_end(&mut head))
            .map_err(|e| RepoPromptError::from_io(e, abs_path))?;

        let summary = if looks_binary(&head) {
            None
        } else {
            generate_summary(&String::from_utf8_lossy(&head))
        };

        Ok(FileRecord {
            name: paths::file_name(&rel_path).to_string(),
            path: rel_path,
            size,
            content: FileContent::Elided(ElisionReason::ExceedsSafetyLimit),
            summary,
            ignored: false,
        })
    }
}

/// Whether a sample of bytes looks like binary data
pub fn looks_binary(sample: &[u8]) -> bool {
    if sample.is_empty() {
        return false;
    }

    if sample.contains(&0) {
        return true;
    }

    // Count control characters (0x00-0x08, 0x0E-0x1F)
    let control_count = sample
        .iter()
        .filter(|&&b| (b < 9) || (b > 13 && b < 32))
        .count();

    control_count as f32 / sample.len() as f32 >= 0.1
}

/// First few meaningful lines of a text, skipping blanks and comment-like lines
pub fn generate_summary(text: &str) -> Option<String> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty() && !COMMENT_LINE.is_match(line))
        .take(SUMMARY_LINES)
        .collect();

    if lines.is_empty() {
        return None;
    }

    let joined = lines.join("\n");
    if joined.chars().count() <= SUMMARY_MAX_CHARS {
        return Some(joined);
    }

    let mut truncated: String = joined.chars().take(SUMMARY_MAX_CHARS - 3).collect();
    truncated.push_str("...");
    Some(truncated)
}
