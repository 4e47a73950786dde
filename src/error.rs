//! Global error handling for repoprompt
//!
//! Per-item failures (`NotFound`, `PermissionDenied`, `FileTooLarge`) are caught at the
//! walk boundary and downgraded to warnings. Everything else aborts the invocation.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::clipboard::ClipboardError;

/// Global error type for repoprompt operations
#[derive(Error, Debug)]
pub enum RepoPromptError {
    /// The selection is empty or otherwise unusable
    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    /// Every selected path failed validation
    #[error("None of the selected paths could be used ({skipped} skipped)")]
    NoValidSelection { skipped: usize },

    /// Path does not exist
    #[error("Path not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Path exists but cannot be read
    #[error("Permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    /// File is above the hard safety ceiling
    #[error("File too large: {} ({size} bytes, limit {limit} bytes)", .path.display())]
    FileTooLarge { path: PathBuf, size: u64, limit: u64 },

    /// Everything was skipped or ignored
    #[error("No files were processed; check your ignore rules")]
    NoFilesProcessed,

    /// Internal invariant violation detected while generating XML
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Target path does not live under the resolved root
    #[error("Path {} is outside of root {}", .path.display(), .root.display())]
    OutsideRoot { root: PathBuf, path: PathBuf },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Settings file errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Clipboard sink errors
    #[error("Clipboard error: {0}")]
    Clipboard(#[from] ClipboardError),

    /// Unexpected error
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl RepoPromptError {
    /// Classify an I/O error raised while touching `path`
    pub fn from_io(err: io::Error, path: &Path) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io(err),
        }
    }

    /// Whether this error only concerns a single selected item or file
    pub fn is_per_item(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::PermissionDenied(_) | Self::FileTooLarge { .. } | Self::Io(_)
        )
    }
}

/// Specialized Result type for repoprompt operations
pub type Result<T> = std::result::Result<T, RepoPromptError>;

/// Creates a RepoPromptError with a formatted message
#[macro_export]
macro_rules! error {
    ($error_type:ident, $($arg:tt)*) => {
        $crate::error::RepoPromptError::$error_type(format!($($arg)*))
    };
}

/// Returns an error result with a formatted message
#[macro_export]
macro_rules! bail {
    ($error_type:ident, $($arg:tt)*) => {
        return Err($crate::error!($error_type, $($arg)*))
    };
}

/// Ensures a condition is true, otherwise returns an error
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $error_type:ident, $($arg:tt)*) => {
        if !($cond) {
            $crate::bail!($error_type, $($arg)*)
        }
    };
}

/// Extension trait for adding context to errors
pub trait ResultExt<T, E> {
    /// Add additional context to an error
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: std::fmt::Display;
}

impl<T, E: std::error::Error + 'static> ResultExt<T, E> for std::result::Result<T, E> {
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: std::fmt::Display,
    {
        self.map_err(|e| {
            let context = f();
            RepoPromptError::Unexpected(format!("{}: {}", context, e))
        })
    }
}
