/*!
 * Directory walking
 *
 * Each walk builds its [`FolderRecord`] tree bottom-up: a recursive call returns a finished
 * record and the caller appends it to its own children. Files of one directory are read in
 * parallel, subdirectories are walked one after another in name order.
 */

use std::collections::HashSet;
use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::config::ProcessingOptions;
use crate::error::{RepoPromptError, Result};
use crate::matcher::IgnoreMatcher;
use crate::output::is_chunk_of;
use crate::paths;
use crate::progress::ProgressReporter;
use crate::reader::FileReader;
use crate::types::{FileRecord, FolderRecord, SkippedItem};

/// Cycle-prevention state owned by one top-level walk
#[derive(Debug, Default)]
pub struct WalkSession {
    in_progress: HashSet<PathBuf>,
    completed: HashSet<PathBuf>,
    skipped: Vec<SkippedItem>,
    exempt: usize,
}

impl WalkSession {
    /// Start an empty session
    pub fn new() -> Self {
        Self::default()
    }

    /// Session for a walk rooted at the explicitly selected directory `rel_path`
    ///
    /// Ignore rules matching only the selected directory itself do not apply beneath it.
    pub fn rooted_at(rel_path: &str) -> Self {
        Self {
            exempt: rel_path.split('/').filter(|s| !s.is_empty()).count(),
            ..Self::default()
        }
    }

    /// Leading path segments exempt from positive ignore patterns
    pub fn exempt_segments(&self) -> usize {
        self.exempt
    }

    /// Mark `dir` as entered; `None` when it is already being walked or was walked before
    ///
    /// The returned guard moves the directory to the completed set when dropped.
    pub fn try_enter(&mut self, dir: &Path) -> Option<EnteredDir<'_>> {
        let key = fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
        if self.in_progress.contains(&key) || self.completed.contains(&key) {
            return None;
        }

        self.in_progress.insert(key.clone());
        Some(EnteredDir { session: self, key })
    }

    /// Record a path that could not be processed
    pub fn skip(&mut self, path: &Path, reason: impl ToString) {
        self.skipped.push(SkippedItem {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        });
    }

    fn into_skipped(self) -> Vec<SkippedItem> {
        self.skipped
    }
}

/// Scoped membership of a directory in the in-progress set
#[derive(Debug)]
pub struct EnteredDir<'a> {
    session: &'a mut WalkSession,
    key: PathBuf,
}

impl Deref for EnteredDir<'_> {
    type Target = WalkSession;

    fn deref(&self) -> &WalkSession {
        self.session
    }
}

impl DerefMut for EnteredDir<'_> {
    fn deref_mut(&mut self) -> &mut WalkSession {
        self.session
    }
}

impl Drop for EnteredDir<'_> {
    fn drop(&mut self) {
        self.session.in_progress.remove(&self.key);
        self.session.completed.insert(std::mem::take(&mut self.key));
    }
}

/// Tree and skipped items produced by one top-level walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkOutcome {
    /// Root of the walked subtree
    pub folder: FolderRecord,
    /// Files and directories that could not be read
    pub skipped: Vec<SkippedItem>,
}

enum Pending {
    Dir { abs: PathBuf, rel: String },
    LinkedDir { name: String, rel: String },
}

/// Walks directories into [`FolderRecord`] trees
pub struct DirectoryWalker {
    options: Arc<ProcessingOptions>,
    matcher: Arc<IgnoreMatcher>,
    reader: FileReader,
    progress: Arc<dyn ProgressReporter>,
}

impl DirectoryWalker {
    /// Create a walker sharing the reader's anchor and matcher
    pub fn new(
        options: Arc<ProcessingOptions>,
        matcher: Arc<IgnoreMatcher>,
        reader: FileReader,
        progress: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            options,
            matcher,
            reader,
            progress,
        }
    }

    /// Walk the selected directory `abs_path` (anchor-relative `rel_path`) with a fresh session
    pub fn walk(&self, abs_path: &Path, rel_path: &str) -> WalkOutcome {
        let mut session = WalkSession::rooted_at(rel_path);
        let folder = self.walk_in(&mut session, abs_path, rel_path, 0);

        WalkOutcome {
            folder,
            skipped: session.into_skipped(),
        }
    }

    /// Walk one directory at `depth` inside an existing session
    pub fn walk_in(
        &self,
        session: &mut WalkSession,
        abs_path: &Path,
        rel_path: &str,
        depth: usize,
    ) -> FolderRecord {
        let name = paths::base_name(abs_path);

        match fs::symlink_metadata(abs_path) {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                warn!("Not following symlinked directory {}", abs_path.display());
                return FolderRecord::truncated(name, rel_path);
            }
            Ok(_) => {}
            Err(e) => {
                let err = RepoPromptError::from_io(e, abs_path);
                warn!("Skipping directory {}: {}", abs_path.display(), err);
                session.skip(abs_path, &err);
                return FolderRecord::truncated(name, rel_path);
            }
        }

        if depth >= self.options.max_depth {
            debug!("Depth limit reached at {}", abs_path.display());
            return FolderRecord::truncated(name, rel_path);
        }

        let matcher = self.matcher.scoped(session.exempt_segments());
        let mut entered = match session.try_enter(abs_path) {
            Some(entered) => entered,
            None => {
                warn!("Directory {} already visited", abs_path.display());
                return FolderRecord::truncated(name, rel_path);
            }
        };

        let mut truncated = false;
        let mut files: Vec<(PathBuf, String)> = Vec::new();
        let mut dirs: Vec<Pending> = Vec::new();

        let entries = WalkDir::new(abs_path)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name();

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Error reading directory {}: {}", abs_path.display(), e);
                    let path = e.path().unwrap_or(abs_path).to_path_buf();
                    entered.skip(&path, &e);
                    truncated = true;
                    continue;
                }
            };

            let entry_name = entry.file_name().to_string_lossy().to_string();
            let entry_rel = paths::join(rel_path, &entry_name);
            let entry_path = entry.path().to_path_buf();
            let file_type = entry.file_type();

            let is_dir = if file_type.is_symlink() {
                match fs::metadata(&entry_path) {
                    Ok(target) if target.is_dir() => true,
                    Ok(target) if target.is_file() => false,
                    _ => {
                        debug!("Skipping dangling symlink {}", entry_path.display());
                        continue;
                    }
                }
            } else if file_type.is_dir() {
                true
            } else if file_type.is_file() {
                false
            } else {
                debug!("Skipping special file {}", entry_path.display());
                continue;
            };

            if is_dir {
                if matcher.should_ignore_dir(&entry_rel) {
                    debug!("Ignoring directory {}", entry_rel);
                    continue;
                }
                dirs.push(if file_type.is_symlink() {
                    Pending::LinkedDir {
                        name: entry_name,
                        rel: entry_rel,
                    }
                } else {
                    Pending::Dir {
                        abs: entry_path,
                        rel: entry_rel,
                    }
                });
            } else if self.is_excluded_output(&entry_path) {
                debug!("Skipping output file {}", entry_rel);
            } else if matcher.should_ignore(&entry_rel) {
                debug!("Ignoring {}", entry_rel);
            } else {
                files.push((entry_path, entry_rel));
            }
        }

        let read: Vec<(PathBuf, Result<FileRecord>)> = files
            .into_par_iter()
            .map(|(abs, rel)| {
                self.progress.report(&rel, None);
                let record = self.read_file(&abs, rel);
                (abs, record)
            })
            .collect();

        let mut file_records = Vec::with_capacity(read.len());
        for (abs, record) in read {
            match record {
                Ok(record) => file_records.push(record),
                Err(e) if e.is_per_item() => {
                    warn!("Skipping {}: {}", abs.display(), e);
                    entered.skip(&abs, &e);
                }
                Err(e) => {
                    log::error!("Failed to read {}: {:?}", abs.display(), e);
                    entered.skip(&abs, &e);
                }
            }
        }

        let mut folder_records = Vec::with_capacity(dirs.len());
        for pending in dirs {
            match pending {
                Pending::LinkedDir { name, rel } => {
                    warn!("Not following symlinked directory {}", rel);
                    folder_records.push(FolderRecord::truncated(name, rel));
                }
                Pending::Dir { abs, rel } => {
                    let child = self.walk_in(&mut entered, &abs, &rel, depth + 1);
                    // Directories matched by an ignore rule survive only through re-included files
                    if matcher.matches_dir(&rel) && !child.has_files() {
                        debug!("Dropping ignored directory {}", rel);
                        continue;
                    }
                    folder_records.push(child);
                }
            }
        }

        FolderRecord {
            name,
            path: rel_path.to_string(),
            files: file_records,
            folders: folder_records,
            truncated,
        }
    }

    /// Read one file, downgrading the safety ceiling to an elided record
    fn read_file(&self, abs_path: &Path, rel_path: String) -> Result<FileRecord> {
        match self.reader.read_at(abs_path, rel_path.clone()) {
            Err(RepoPromptError::FileTooLarge { size, .. }) => {
                warn!("{} exceeds the safety limit, content elided", rel_path);
                self.reader.oversized_record(abs_path, rel_path, size)
            }
            other => other,
        }
    }

    fn is_excluded_output(&self, path: &Path) -> bool {
        self.options
            .excluded_outputs
            .iter()
            .any(|output| is_chunk_of(output, path))
    }
}
