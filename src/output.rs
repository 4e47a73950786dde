/*!
 * Output sinks for serialized chunks
 */

use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use crate::clipboard;
use crate::error::{RepoPromptError, Result};
use crate::types::XmlChunk;

/// Destination for the serialized XML
pub trait OutputSink {
    /// Deliver every chunk, returning a description of each destination written
    fn write_chunks(&self, chunks: &[XmlChunk]) -> Result<Vec<String>>;
}

/// File name of chunk `chunk_number`: `base` itself for a single chunk, `stem_<n>.ext` otherwise
pub fn chunk_file_name(base: &Path, chunk_number: usize, total_chunks: usize) -> PathBuf {
    if total_chunks <= 1 {
        return base.to_path_buf();
    }

    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = match base.extension() {
        Some(ext) => format!("{}_{}.{}", stem, chunk_number, ext.to_string_lossy()),
        None => format!("{}_{}", stem, chunk_number),
    };

    base.with_file_name(name)
}

/// Whether `candidate` is `base` or one of its numbered chunk files
pub fn is_chunk_of(base: &Path, candidate: &Path) -> bool {
    if candidate == base {
        return true;
    }
    if candidate.parent() != base.parent() {
        return false;
    }

    let (Some(stem), Some(name)) = (base.file_stem(), candidate.file_name()) else {
        return false;
    };
    let stem = stem.to_string_lossy();
    let name = name.to_string_lossy();

    let rest = match name.strip_prefix(&*stem).and_then(|r| r.strip_prefix('_')) {
        Some(rest) => rest,
        None => return false,
    };
    let digits = match base.extension() {
        Some(ext) => match rest
            .strip_suffix(&*ext.to_string_lossy())
            .and_then(|r| r.strip_suffix('.'))
        {
            Some(digits) => digits,
            None => return false,
        },
        None => rest,
    };

    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Writes chunks to `name.xml` or `name_1.xml`, `name_2.xml`, ...
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    /// Sink writing next to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl OutputSink for FileSink {
    fn write_chunks(&self, chunks: &[XmlChunk]) -> Result<Vec<String>> {
        let mut written = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let path = chunk_file_name(&self.path, chunk.chunk_number, chunk.total_chunks);
            fs::write(&path, &chunk.content).map_err(|e| RepoPromptError::from_io(e, &path))?;
            info!("Wrote chunk {}/{} to {}", chunk.chunk_number, chunk.total_chunks, path.display());
            written.push(path.display().to_string());
        }

        Ok(written)
    }
}

/// Copies all chunks, concatenated, to the system clipboard
#[derive(Debug, Clone, Copy, Default)]
pub struct ClipboardSink;

impl OutputSink for ClipboardSink {
    fn write_chunks(&self, chunks: &[XmlChunk]) -> Result<Vec<String>> {
        let text: String = chunks.iter().map(|chunk| chunk.content.as_str()).collect();
        let provider = clipboard::copy_to_clipboard(&text)?;
        info!("Copied {} bytes to the clipboard via {}", text.len(), provider);

        Ok(vec![format!("clipboard ({})", provider)])
    }
}
