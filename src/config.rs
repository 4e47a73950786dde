/*!
 * Configuration handling for repoprompt
 *
 * Options are layered: hard-coded defaults, then an editor-style JSON settings file, then
 * command-line flags.
 */

use std::fs;
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser};
use clap_complete::Shell;
use log::{debug, warn};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{RepoPromptError, Result};
use crate::paths;
use crate::utils;

/// Hard ceiling above which a file is never read in full
pub const SAFETY_LIMIT: u64 = 100 * 1024 * 1024;

/// Settings file looked up in the working directory when `--settings` is not given
pub const DEFAULT_SETTINGS_FILE: &str = ".vscode/settings.json";

/// Prefix of every settings key
const SETTINGS_PREFIX: &str = "repoprompt.";

/// Command-line arguments for repoprompt
#[derive(Parser, Debug, Clone)]
#[clap(
    name = "repoprompt",
    version = env!("CARGO_PKG_VERSION"),
    about = "Serialize selected files and folders into chunked XML for LLM context",
    long_about = "Walks the selected files and folders, honoring .gitignore, configured ignore patterns and size limits, and writes the result as one or more XML documents suitable as LLM prompt context."
)]
pub struct Args {
    /// Files and folders to include
    #[clap(value_name = "PATHS")]
    pub paths: Vec<PathBuf>,

    /// Output XML file (a bare file name is placed in the resolved root)
    #[clap(short, long, default_value = "project.xml")]
    pub output: PathBuf,

    /// Prompt text embedded at the top of the first chunk
    #[clap(short, long, conflicts_with = "prompt_file")]
    pub prompt: Option<String>,

    /// Read the prompt text from a file
    #[clap(long)]
    pub prompt_file: Option<PathBuf>,

    /// Comma-separated list of patterns to ignore (`!` re-includes)
    #[clap(long, value_delimiter = ',')]
    pub ignore_patterns: Vec<String>,

    /// Largest file whose content is embedded (bytes, or with a KB/MB/GB suffix)
    #[clap(long, value_parser = parse_byte_size)]
    pub max_file_size: Option<u64>,

    /// Budget for all embedded content (bytes, or with a KB/MB/GB suffix)
    #[clap(long, value_parser = parse_byte_size)]
    pub max_total_size: Option<u64>,

    /// Maximum directory depth below a selected folder
    #[clap(long)]
    pub max_depth: Option<usize>,

    /// Byte budget of a single output chunk (bytes, or with a KB/MB/GB suffix)
    #[clap(long, value_parser = parse_chunk_size)]
    pub chunk_size: Option<usize>,

    /// Keep folders that contain no files
    #[clap(long)]
    pub include_empty_folders: bool,

    /// List files without embedding their content
    #[clap(long)]
    pub no_content: bool,

    /// Name of the XML root element
    #[clap(long)]
    pub root_tag: Option<String>,

    /// JSON settings file with `repoprompt.*` keys
    #[clap(long)]
    pub settings: Option<PathBuf>,

    /// Number of top-level items processed concurrently
    #[clap(long, default_value = "5")]
    pub threads: usize,

    /// Copy output to clipboard
    #[clap(long, help = "Copy output to system clipboard")]
    pub clip: bool,

    /// Increase log verbosity (repeatable)
    #[clap(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Generate shell completions
    #[clap(long = "generate", value_enum)]
    pub generate: Option<Shell>,
}

fn parse_byte_size(value: &str) -> std::result::Result<u64, String> {
    utils::parse_size(value).ok_or_else(|| format!("invalid size: {}", value))
}

fn parse_chunk_size(value: &str) -> std::result::Result<usize, String> {
    let size = parse_byte_size(value)?;
    usize::try_from(size).map_err(|_| format!("chunk size too large: {}", value))
}

/// Options consumed by the processing pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingOptions {
    /// Largest file whose content is embedded
    pub max_file_size: u64,
    /// Budget for all embedded content
    pub max_total_size: u64,
    /// Maximum walk depth below a selected folder
    pub max_depth: usize,
    /// Ordered glob patterns, `!` marks a negation
    pub ignore_patterns: Vec<String>,
    /// Whether file content is embedded at all
    pub include_content: bool,
    /// Byte budget per output chunk
    pub chunk_size: usize,
    /// Whether folders without files are kept
    pub include_empty_folders: bool,
    /// Name of the XML root element
    pub root_tag: String,
    /// Absolute output paths that must never be read back
    pub excluded_outputs: Vec<PathBuf>,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            max_file_size: 1024 * 1024,
            max_total_size: 100 * 1024 * 1024,
            max_depth: 10,
            ignore_patterns: Vec::new(),
            include_content: true,
            chunk_size: 5 * 1024 * 1024,
            include_empty_folders: false,
            root_tag: "project".to_string(),
            excluded_outputs: Vec::new(),
        }
    }
}

/// Values read from a settings file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    /// Processing options with invalid keys already replaced by defaults
    pub options: ProcessingOptions,
    /// `repoprompt.outputPath`
    pub output_path: Option<PathBuf>,
    /// `repoprompt.copyToClipboard`
    pub copy_to_clipboard: bool,
}

impl Settings {
    /// Read settings from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            RepoPromptError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let value: Value = serde_json::from_str(&text)?;
        Ok(Self::from_value(&value))
    }

    /// Resolve settings: the explicit file must load, the implicit one is optional
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path).map_err(|e| match e {
                RepoPromptError::Json(e) => {
                    RepoPromptError::Config(format!("invalid JSON in {}: {}", path.display(), e))
                }
                other => other,
            });
        }

        let implicit = Path::new(DEFAULT_SETTINGS_FILE);
        if !implicit.is_file() {
            return Ok(Self::default());
        }

        match Self::load(implicit) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                warn!("Ignoring {}: {}", implicit.display(), e);
                Ok(Self::default())
            }
        }
    }

    /// Extract settings from a parsed JSON document, key by key
    pub fn from_value(value: &Value) -> Self {
        let empty = Map::new();
        let map = match value.as_object() {
            Some(map) => map,
            None => {
                warn!("Settings file is not a JSON object, using defaults");
                &empty
            }
        };

        let defaults = ProcessingOptions::default();
        let options = ProcessingOptions {
            max_file_size: read_key(map, "maxFileSize", defaults.max_file_size, Value::as_u64),
            max_total_size: read_key(map, "maxTotalSize", defaults.max_total_size, Value::as_u64),
            max_depth: read_key(map, "maxDepth", defaults.max_depth, |v| {
                v.as_u64().and_then(|n| usize::try_from(n).ok())
            }),
            ignore_patterns: read_key(map, "ignorePatterns", defaults.ignore_patterns, |v| {
                v.as_array()?
                    .iter()
                    .map(|item| item.as_str().map(str::to_string))
                    .collect()
            }),
            include_content: read_key(
                map,
                "includeComments",
                defaults.include_content,
                Value::as_bool,
            ),
            chunk_size: read_key(map, "chunkSize", defaults.chunk_size, |v| {
                v.as_u64()
                    .filter(|n| *n > 0)
                    .and_then(|n| usize::try_from(n).ok())
            }),
            include_empty_folders: read_key(
                map,
                "includeEmptyFolders",
                defaults.include_empty_folders,
                Value::as_bool,
            ),
            root_tag: read_key(map, "rootTag", defaults.root_tag, |v| {
                v.as_str()
                    .filter(|tag| is_valid_tag(tag))
                    .map(str::to_string)
            }),
            excluded_outputs: Vec::new(),
        };

        Self {
            options,
            output_path: read_key(map, "outputPath", None, |v| {
                v.as_str()
                    .filter(|s| !s.trim().is_empty())
                    .map(|s| Some(PathBuf::from(s)))
            }),
            copy_to_clipboard: read_key(map, "copyToClipboard", false, Value::as_bool),
        }
    }
}

/// Read one `repoprompt.<key>` value, falling back to `default` when absent or invalid
fn read_key<T, F>(map: &Map<String, Value>, key: &str, default: T, parse: F) -> T
where
    F: FnOnce(&Value) -> Option<T>,
{
    let full_key = format!("{}{}", SETTINGS_PREFIX, key);
    match map.get(&full_key) {
        None => default,
        Some(value) => parse(value).unwrap_or_else(|| {
            warn!("Invalid value for {}: {}, using default", full_key, value);
            default
        }),
    }
}

/// Whether `tag` can be used as an XML element name
pub fn is_valid_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {
            chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
        }
        _ => false,
    }
}

/// Application configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Selected files and folders, as given
    pub selection: Vec<PathBuf>,

    /// Output XML file path
    pub output_file: PathBuf,

    /// Prompt text, if any
    pub prompt: Option<String>,

    /// Pipeline options
    pub options: ProcessingOptions,

    /// Number of top-level items processed concurrently
    pub num_threads: usize,

    /// Copy output to clipboard
    pub clip: bool,
}

impl Config {
    /// Create configuration from command-line arguments layered over `settings`
    pub fn from_args(args: Args, settings: Settings) -> Result<Self> {
        let Settings {
            mut options,
            output_path,
            copy_to_clipboard,
        } = settings;

        if let Some(size) = args.max_file_size {
            options.max_file_size = size;
        }
        if let Some(size) = args.max_total_size {
            options.max_total_size = size;
        }
        if let Some(depth) = args.max_depth {
            options.max_depth = depth;
        }
        if let Some(size) = args.chunk_size {
            options.chunk_size = size;
        }
        if let Some(tag) = args.root_tag {
            options.root_tag = tag;
        }
        if !args.ignore_patterns.is_empty() {
            options.ignore_patterns.extend(args.ignore_patterns);
        }
        options.include_empty_folders |= args.include_empty_folders;
        if args.no_content {
            options.include_content = false;
        }

        let prompt = match (args.prompt, args.prompt_file) {
            (Some(prompt), _) => Some(prompt),
            (None, Some(path)) => Some(fs::read_to_string(&path).map_err(|e| {
                RepoPromptError::Config(format!("cannot read prompt file {}: {}", path.display(), e))
            })?),
            (None, None) => None,
        };

        let output_is_default = args.output == Path::new("project.xml");
        let output_file = match output_path {
            Some(path) if output_is_default => path,
            _ => args.output,
        };

        Ok(Self {
            selection: args.paths,
            output_file,
            prompt,
            options,
            num_threads: args.threads,
            clip: args.clip || copy_to_clipboard,
        })
    }

    /// Validate the configuration before touching the selection
    pub fn validate(&self) -> Result<()> {
        crate::ensure!(
            !self.selection.is_empty(),
            InvalidSelection,
            "no files or folders selected"
        );
        crate::ensure!(self.num_threads > 0, Config, "thread count must be at least 1");
        crate::ensure!(
            self.options.chunk_size > 0,
            Config,
            "chunk size must be greater than zero"
        );
        crate::ensure!(
            is_valid_tag(&self.options.root_tag),
            Config,
            "invalid root tag: {:?}",
            self.options.root_tag
        );

        // Check if output file directory exists
        if let Some(parent) = self.output_file.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                crate::bail!(
                    Config,
                    "Output directory not found: {}",
                    parent.display()
                );
            }
        }

        Ok(())
    }

    /// Absolute output path; a bare file name lands in the selection's common root
    pub fn resolve_output(&self) -> Result<PathBuf> {
        let is_bare = self
            .output_file
            .parent()
            .map_or(true, |parent| parent.as_os_str().is_empty());

        if !is_bare {
            return paths::absolutize(&self.output_file);
        }

        let selection = self
            .selection
            .iter()
            .map(|path| paths::absolutize(path))
            .collect::<Result<Vec<_>>>()?;
        let root = paths::common_root(&selection)?;
        debug!("Output {} placed in {}", self.output_file.display(), root.display());

        Ok(root.join(&self.output_file))
    }
}
