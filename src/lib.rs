/*!
 * repoprompt - Serialize selected files and folders into chunked XML for LLM context
 *
 * A selection of files and folders is walked with ignore rules and size limits applied,
 * merged into one consistent folder forest, and serialized into self-contained XML
 * documents that each fit a byte budget.
 */

pub mod error;

pub mod aggregator;
pub mod clipboard;
pub mod config;
pub mod matcher;
pub mod output;
pub mod paths;
pub mod progress;
pub mod reader;
pub mod report;
pub mod scanner;
pub mod types;
pub mod utils;
pub mod writer;


// Re-export main components for easier access
pub use aggregator::SelectionAggregator;
pub use config::{Config, ProcessingOptions};
pub use error::{RepoPromptError, Result};
pub use matcher::{GitignoreCache, IgnoreMatcher};
pub use output::{ClipboardSink, FileSink, OutputSink};
pub use progress::{NoProgress, ProgressReporter};
pub use report::{Reporter, RunReport};
pub use types::{
    ElisionReason, FileContent, FileRecord, FolderRecord, ProcessingResult, SkippedItem, XmlChunk,
};
pub use utils::{estimate_tokens, format_file_size};
pub use writer::XmlSerializer;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
