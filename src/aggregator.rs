/*!
 * Selection aggregation
 *
 * Turns a raw selection of files and folders into one [`ProcessingResult`]: validation,
 * root resolution, per-item walks in bounded parallel batches, and a serial merge into a
 * single forest. Every fix-up after the merge (sorting, total-size budget, pruning) is a
 * rewrite pass that consumes a tree and returns a new one.
 */

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::config::ProcessingOptions;
use crate::error::{RepoPromptError, Result};
use crate::matcher::{rebase_pattern, GitignoreCache, IgnoreMatcher};
use crate::output::is_chunk_of;
use crate::paths;
use crate::progress::{self, NoProgress, ProgressReporter};
use crate::reader::FileReader;
use crate::scanner::DirectoryWalker;
use crate::types::{
    ElisionReason, FileContent, FileRecord, FolderRecord, ProcessingResult, SkippedItem,
};

/// Top-level items processed at the same time by default
pub const DEFAULT_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemKind {
    Dir,
    LinkedDir,
    File,
}

#[derive(Debug, Clone)]
struct SelectedItem {
    abs: PathBuf,
    rel: String,
    kind: ItemKind,
}

enum ItemOutcome {
    Folder(FolderRecord),
    File(FileRecord),
    Skipped,
}

struct ItemResult {
    outcome: ItemOutcome,
    skipped: Vec<SkippedItem>,
}

impl ItemResult {
    fn of(outcome: ItemOutcome) -> Self {
        Self {
            outcome,
            skipped: Vec::new(),
        }
    }

    fn skipped(path: &Path, reason: impl ToString) -> Self {
        Self {
            outcome: ItemOutcome::Skipped,
            skipped: vec![SkippedItem {
                path: path.to_path_buf(),
                reason: reason.to_string(),
            }],
        }
    }
}

/// Builds a [`ProcessingResult`] from a user selection
pub struct SelectionAggregator {
    options: Arc<ProcessingOptions>,
    progress: Arc<dyn ProgressReporter>,
    gitignore: Arc<GitignoreCache>,
    concurrency: usize,
}

impl SelectionAggregator {
    /// Aggregator with a fresh gitignore cache and no progress output
    pub fn new(options: ProcessingOptions) -> Self {
        Self {
            options: Arc::new(options),
            progress: Arc::new(NoProgress),
            gitignore: Arc::new(GitignoreCache::new()),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Report progress to `progress`
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Share a gitignore cache with other aggregators
    pub fn with_gitignore_cache(mut self, cache: Arc<GitignoreCache>) -> Self {
        self.gitignore = cache;
        self
    }

    /// Process at most `concurrency` top-level items at once
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Process a selection of absolute or working-directory-relative paths
    pub fn process(&self, selection: &[PathBuf], prompt: Option<String>) -> Result<ProcessingResult> {
        crate::ensure!(
            !selection.is_empty(),
            InvalidSelection,
            "no files or folders selected"
        );

        let (valid, mut skipped) = validate_selection(selection)?;
        if valid.is_empty() {
            log::error!("None of the {} selected paths could be used", selection.len());
            return Err(RepoPromptError::NoValidSelection {
                skipped: skipped.len(),
            });
        }

        let abs_paths: Vec<PathBuf> = valid.iter().map(|(abs, _)| abs.clone()).collect();
        let root = paths::common_root(&abs_paths)?;
        let anchor = match root.parent() {
            Some(parent)
                if valid
                    .iter()
                    .any(|(abs, kind)| *kind != ItemKind::File && *abs == root) =>
            {
                parent.to_path_buf()
            }
            _ => root.clone(),
        };
        info!(
            "Processing {} selected items under {} (paths relative to {})",
            valid.len(),
            root.display(),
            anchor.display()
        );

        let matcher = Arc::new(self.build_matcher(&root, &anchor)?);
        let reader = FileReader::new(Arc::clone(&self.options), &anchor);
        let walker = DirectoryWalker::new(
            Arc::clone(&self.options),
            Arc::clone(&matcher),
            reader.clone(),
            Arc::clone(&self.progress),
        );

        let items = valid
            .into_iter()
            .map(|(abs, kind)| {
                Ok(SelectedItem {
                    rel: paths::relative_path(&anchor, &abs)?,
                    abs,
                    kind,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let planned: Vec<&SelectedItem> = items
            .iter()
            .filter(|item| match items.iter().find(|dir| self.covers(dir, item, &matcher)) {
                Some(dir) => {
                    debug!("{} is covered by the walk of {}", item.rel, dir.rel);
                    false
                }
                None => true,
            })
            .collect();

        let total = planned.len();
        let mut forest = FolderRecord::new(paths::base_name(&anchor), "");
        let mut done = 0;

        for batch in planned.chunks(self.concurrency) {
            let results: Vec<ItemResult> = batch
                .par_iter()
                .map(|item| self.run_item(item, &walker, &reader))
                .collect();

            // Merge in selection order, whatever order the batch finished in
            for (item, result) in batch.iter().zip(results) {
                skipped.extend(result.skipped);
                forest = match result.outcome {
                    ItemOutcome::Folder(folder) if folder.path.is_empty() => {
                        merge_folders(forest, folder)
                    }
                    ItemOutcome::Folder(folder) => {
                        let path = folder.path.clone();
                        graft(forest, &parent_chain(&path), Graft::Folder(folder))
                    }
                    ItemOutcome::File(file) => {
                        let path = file.path.clone();
                        graft(forest, &parent_chain(&path), Graft::File(file))
                    }
                    ItemOutcome::Skipped => forest,
                };

                done += 1;
                let label = if item.rel.is_empty() {
                    item.abs.display().to_string()
                } else {
                    item.rel.clone()
                };
                self.progress.report(&label, Some(progress::percent(done, total)));
            }
        }

        let forest = sort_tree(forest);
        let forest = ContentBudget::new(self.options.max_total_size).apply(forest);
        let forest = prune(forest, self.options.include_empty_folders);

        let files = flatten(&forest);
        if files.is_empty() && (!self.options.include_empty_folders || forest.folders.is_empty()) {
            log::error!(
                "Selection produced no files ({} items skipped)",
                skipped.len()
            );
            return Err(RepoPromptError::NoFilesProcessed);
        }

        if !skipped.is_empty() {
            warn!("{} items skipped", skipped.len());
        }
        info!(
            "Collected {} files in {} top-level folders",
            files.len(),
            forest.folders.len()
        );

        Ok(ProcessingResult {
            structure: forest.folders,
            files,
            root_path: anchor,
            prompt,
            skipped,
        })
    }

    fn build_matcher(&self, root: &Path, anchor: &Path) -> Result<IgnoreMatcher> {
        let base_rel = paths::relative_path(anchor, root)?;
        let gitignore = match self.gitignore.load(root, &base_rel) {
            Ok(patterns) => patterns,
            Err(e) if e.is_per_item() => {
                warn!("Cannot read .gitignore in {}: {}", root.display(), e);
                Arc::new(Vec::new())
            }
            Err(e) => return Err(e),
        };

        let configured = self
            .options
            .ignore_patterns
            .iter()
            .map(|pattern| rebase_pattern(pattern, &base_rel));

        Ok(IgnoreMatcher::builder()
            .patterns(configured)
            .patterns(gitignore.iter())
            .build())
    }

    /// Whether walking `dir` already reaches `item` unchanged
    fn covers(&self, dir: &SelectedItem, item: &SelectedItem, matcher: &IgnoreMatcher) -> bool {
        if dir.kind != ItemKind::Dir || dir.abs == item.abs || !item.abs.starts_with(&dir.abs) {
            return false;
        }

        let base = segment_count(&dir.rel);
        let scope = matcher.scoped(base);
        let segments: Vec<&str> = item.rel.split('/').collect();
        let depth = segments.len().saturating_sub(base);

        // Directories in between must be walked normally
        let between_ignored = ((base + 1)..segments.len())
            .any(|end| scope.matches_dir(&segments[..end].join("/")));
        if between_ignored {
            return false;
        }

        // Symlinked directories in between are never entered by the walk
        let through_link = item
            .abs
            .ancestors()
            .skip(1)
            .take_while(|ancestor| *ancestor != dir.abs.as_path())
            .any(|ancestor| {
                fs::symlink_metadata(ancestor)
                    .map(|metadata| metadata.file_type().is_symlink())
                    .unwrap_or(false)
            });
        if through_link {
            return false;
        }

        match item.kind {
            ItemKind::File => {
                depth <= self.options.max_depth
                    && !scope.should_ignore(&item.rel)
                    && !self.is_excluded_output(&item.abs)
            }
            ItemKind::Dir | ItemKind::LinkedDir => {
                depth < self.options.max_depth && !scope.matches_dir(&item.rel)
            }
        }
    }

    fn run_item(
        &self,
        item: &SelectedItem,
        walker: &DirectoryWalker,
        reader: &FileReader,
    ) -> ItemResult {
        match item.kind {
            ItemKind::Dir => {
                let outcome = walker.walk(&item.abs, &item.rel);
                ItemResult {
                    outcome: ItemOutcome::Folder(outcome.folder),
                    skipped: outcome.skipped,
                }
            }
            ItemKind::LinkedDir => {
                warn!("Not following symlinked directory {}", item.abs.display());
                ItemResult::of(ItemOutcome::Folder(FolderRecord::truncated(
                    paths::base_name(&item.abs),
                    item.rel.clone(),
                )))
            }
            ItemKind::File => {
                if self.is_excluded_output(&item.abs) {
                    warn!("Skipping {}: it is the output file", item.abs.display());
                    return ItemResult::skipped(&item.abs, "output file");
                }

                self.progress.report(&item.rel, None);
                let record = match reader.read_selected(&item.abs) {
                    Err(RepoPromptError::FileTooLarge { size, .. }) => {
                        warn!("{} exceeds the safety limit, content elided", item.rel);
                        reader.oversized_record(&item.abs, item.rel.clone(), size)
                    }
                    other => other,
                };

                match record {
                    Ok(record) => ItemResult::of(ItemOutcome::File(record)),
                    Err(e) => {
                        warn!("Skipping {}: {}", item.abs.display(), e);
                        ItemResult::skipped(&item.abs, &e)
                    }
                }
            }
        }
    }

    fn is_excluded_output(&self, path: &Path) -> bool {
        self.options
            .excluded_outputs
            .iter()
            .any(|output| is_chunk_of(output, path))
    }
}

/// Absolutize, stat and deduplicate the selection
fn validate_selection(selection: &[PathBuf]) -> Result<(Vec<(PathBuf, ItemKind)>, Vec<SkippedItem>)> {
    let mut valid = Vec::with_capacity(selection.len());
    let mut skipped = Vec::new();
    let mut seen = HashSet::new();

    for path in selection {
        let abs = paths::absolutize(path)?;
        let mut skip = |reason: String| {
            warn!("Skipping {}: {}", abs.display(), reason);
            skipped.push(SkippedItem {
                path: abs.clone(),
                reason,
            });
        };

        let metadata = match fs::symlink_metadata(&abs) {
            Ok(metadata) => metadata,
            Err(e) => {
                skip(RepoPromptError::from_io(e, &abs).to_string());
                continue;
            }
        };

        let kind = if metadata.file_type().is_symlink() {
            match fs::metadata(&abs) {
                Ok(target) if target.is_dir() => ItemKind::LinkedDir,
                Ok(target) if target.is_file() => ItemKind::File,
                Ok(_) => {
                    skip("not a regular file or directory".to_string());
                    continue;
                }
                Err(e) => {
                    skip(RepoPromptError::from_io(e, &abs).to_string());
                    continue;
                }
            }
        } else if metadata.is_dir() {
            ItemKind::Dir
        } else if metadata.is_file() {
            ItemKind::File
        } else {
            skip("not a regular file or directory".to_string());
            continue;
        };

        let key = fs::canonicalize(&abs).unwrap_or_else(|_| abs.clone());
        if !seen.insert(key) {
            debug!("Ignoring duplicate selection {}", abs.display());
            continue;
        }

        valid.push((abs, kind));
    }

    Ok((valid, skipped))
}

fn segment_count(rel_path: &str) -> usize {
    rel_path.split('/').filter(|s| !s.is_empty()).count()
}

fn parent_chain(rel_path: &str) -> Vec<&str> {
    paths::parent_of(rel_path)
        .split('/')
        .filter(|s| !s.is_empty())
        .collect()
}

/// A record to attach somewhere in the forest
enum Graft {
    Folder(FolderRecord),
    File(FileRecord),
}

/// Attach `item` below `node` following `chain`, reusing existing folders by path and
/// synthesizing the missing ones
fn graft(node: FolderRecord, chain: &[&str], item: Graft) -> FolderRecord {
    let Some((head, rest)) = chain.split_first() else {
        return match item {
            Graft::File(file) => FolderRecord {
                files: upsert_file(node.files, file),
                ..node
            },
            Graft::Folder(folder) => FolderRecord {
                folders: upsert_folder(node.folders, folder),
                ..node
            },
        };
    };

    let child_path = paths::join(&node.path, head);
    let FolderRecord {
        name,
        path,
        files,
        mut folders,
        truncated,
    } = node;

    let child = match folders.iter().position(|f| f.path == child_path) {
        Some(index) => folders.remove(index),
        None => {
            debug!("Synthesizing folder {}", child_path);
            FolderRecord::new(*head, child_path)
        }
    };
    folders.push(graft(child, rest, item));

    FolderRecord {
        name,
        path,
        files,
        folders,
        truncated,
    }
}

/// Add or replace a file by path; the newer record wins
fn upsert_file(mut files: Vec<FileRecord>, file: FileRecord) -> Vec<FileRecord> {
    match files.iter().position(|f| f.path == file.path) {
        Some(index) => files[index] = file,
        None => files.push(file),
    }
    files
}

/// Add a folder, merging it into an existing sibling with the same path
fn upsert_folder(mut folders: Vec<FolderRecord>, folder: FolderRecord) -> Vec<FolderRecord> {
    match folders.iter().position(|f| f.path == folder.path) {
        Some(index) => {
            let existing = folders.remove(index);
            folders.insert(index, merge_folders(existing, folder));
        }
        None => folders.push(folder),
    }
    folders
}

/// Union of two records for the same folder path
fn merge_folders(base: FolderRecord, other: FolderRecord) -> FolderRecord {
    let files = other.files.into_iter().fold(base.files, upsert_file);
    let folders = other.folders.into_iter().fold(base.folders, upsert_folder);

    FolderRecord {
        name: base.name,
        path: base.path,
        files,
        folders,
        truncated: base.truncated || other.truncated,
    }
}

/// Order files and folders by name at every level
fn sort_tree(folder: FolderRecord) -> FolderRecord {
    let mut files = folder.files;
    files.sort_by(|a, b| a.name.cmp(&b.name));

    let mut folders: Vec<FolderRecord> = folder.folders.into_iter().map(sort_tree).collect();
    folders.sort_by(|a, b| a.name.cmp(&b.name));

    FolderRecord {
        files,
        folders,
        ..folder
    }
}

/// Drop ignored files and, unless `keep_empty`, folders without any file beneath them
fn prune(folder: FolderRecord, keep_empty: bool) -> FolderRecord {
    let files = folder.files.into_iter().filter(|f| !f.ignored).collect();
    let folders = folder
        .folders
        .into_iter()
        .map(|child| prune(child, keep_empty))
        .filter(|child| keep_empty || child.has_files())
        .collect();

    FolderRecord {
        files,
        folders,
        ..folder
    }
}

/// Every file reachable from `root`, root-level files first, deduplicated by path
fn flatten(root: &FolderRecord) -> Vec<FileRecord> {
    fn collect(folder: &FolderRecord, out: &mut Vec<FileRecord>, index: &mut HashMap<String, usize>) {
        for file in &folder.files {
            match index.get(&file.path) {
                Some(&position) => out[position] = file.clone(),
                None => {
                    index.insert(file.path.clone(), out.len());
                    out.push(file.clone());
                }
            }
        }
        for child in &folder.folders {
            collect(child, out, index);
        }
    }

    let mut out = Vec::new();
    collect(root, &mut out, &mut HashMap::new());
    out
}

/// Running total of embedded content against `max_total_size`
#[derive(Debug)]
struct ContentBudget {
    limit: u64,
    used: u64,
    exhausted: bool,
}

impl ContentBudget {
    fn new(limit: u64) -> Self {
        Self {
            limit,
            used: 0,
            exhausted: false,
        }
    }

    /// Elide content once the budget is spent; files first, then folders depth-first
    fn apply(&mut self, folder: FolderRecord) -> FolderRecord {
        let files = folder.files.into_iter().map(|f| self.admit(f)).collect();
        let folders = folder.folders.into_iter().map(|c| self.apply(c)).collect();

        FolderRecord {
            files,
            folders,
            ..folder
        }
    }

    fn admit(&mut self, file: FileRecord) -> FileRecord {
        let len = match &file.content {
            FileContent::Text(text) if !text.is_empty() => text.len() as u64,
            _ => return file,
        };

        if self.exhausted || self.used + len > self.limit {
            if !self.exhausted {
                info!("Total size budget reached at {}", file.path);
                self.exhausted = true;
            }
            return file.with_content(FileContent::Elided(ElisionReason::ExceedsTotalSize));
        }

        self.used += len;
        file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, text: &str) -> FileRecord {
        FileRecord {
            name: paths::file_name(path).to_string(),
            path: path.to_string(),
            size: text.len() as u64,
            content: FileContent::Text(text.to_string()),
            summary: None,
            ignored: false,
        }
    }

    fn paths_of(folder: &FolderRecord) -> Vec<String> {
        flatten(folder).into_iter().map(|f| f.path).collect()
    }

    #[test]
    fn test_graft_synthesizes_and_reuses_chain() {
        let root = FolderRecord::new("root", "");
        let root = graft(root, &["a", "b"], Graft::File(file("a/b/x.txt", "x")));
        let root = graft(root, &["a", "b"], Graft::File(file("a/b/y.txt", "y")));
        let root = graft(root, &["a"], Graft::File(file("a/z.txt", "z")));

        assert_eq!(root.folders.len(), 1);
        let a = &root.folders[0];
        assert_eq!(a.path, "a");
        assert_eq!(a.files.len(), 1);
        assert_eq!(a.folders.len(), 1);
        assert_eq!(a.folders[0].path, "a/b");
        assert_eq!(a.folders[0].files.len(), 2);
    }

    #[test]
    fn test_graft_merges_duplicate_folders() {
        let mut first = FolderRecord::new("src", "src");
        first.files.push(file("src/a.rs", "old"));
        let mut second = FolderRecord::truncated("src", "src");
        second.files.push(file("src/a.rs", "new"));
        second.files.push(file("src/b.rs", "b"));

        let root = FolderRecord::new("root", "");
        let root = graft(root, &[], Graft::Folder(first));
        let root = graft(root, &[], Graft::Folder(second));

        assert_eq!(root.folders.len(), 1);
        let src = &root.folders[0];
        assert!(src.truncated);
        assert_eq!(src.files.len(), 2);
        assert_eq!(src.files[0].content, FileContent::Text("new".to_string()));
    }

    #[test]
    fn test_root_files_are_not_wrapped() {
        let root = FolderRecord::new("root", "");
        let root = graft(root, &[], Graft::File(file("top.txt", "t")));

        assert!(root.folders.is_empty());
        assert_eq!(paths_of(&root), vec!["top.txt"]);
    }

    #[test]
    fn test_sort_and_flatten_order() {
        let mut root = FolderRecord::new("root", "");
        root.files.push(file("b.txt", "b"));
        root.files.push(file("a.txt", "a"));
        let mut z = FolderRecord::new("z", "z");
        z.files.push(file("z/1.txt", "1"));
        let mut m = FolderRecord::new("m", "m");
        m.files.push(file("m/2.txt", "2"));
        root.folders = vec![z, m];

        let sorted = sort_tree(root);
        assert_eq!(paths_of(&sorted), vec!["a.txt", "b.txt", "m/2.txt", "z/1.txt"]);
    }

    #[test]
    fn test_prune_empty_folders() {
        let mut root = FolderRecord::new("root", "");
        let mut empty = FolderRecord::new("empty", "empty");
        empty.folders.push(FolderRecord::new("inner", "empty/inner"));
        let mut full = FolderRecord::new("full", "full");
        full.files.push(file("full/a.txt", "a"));
        let mut hidden = file("full/hidden.txt", "h");
        hidden.ignored = true;
        full.files.push(hidden);
        root.folders = vec![empty, full];

        let kept = prune(root.clone(), true);
        assert_eq!(kept.folders.len(), 2);
        assert_eq!(kept.folders[1].files.len(), 1);

        let pruned = prune(root, false);
        assert_eq!(pruned.folders.len(), 1);
        assert_eq!(pruned.folders[0].path, "full");
    }

    #[test]
    fn test_content_budget_elides_in_order() {
        let mut root = FolderRecord::new("root", "");
        root.files.push(file("a.txt", "aaaa"));
        let mut dir = FolderRecord::new("d", "d");
        dir.files.push(file("d/b.txt", "bbbb"));
        dir.files.push(file("d/c.txt", "c"));
        root.folders.push(dir);

        let limited = ContentBudget::new(6).apply(root);
        let files = flatten(&limited);

        assert_eq!(files[0].content, FileContent::Text("aaaa".to_string()));
        assert_eq!(
            files[1].content,
            FileContent::Elided(ElisionReason::ExceedsTotalSize)
        );
        // Once the budget is spent later files are elided too
        assert_eq!(
            files[2].content,
            FileContent::Elided(ElisionReason::ExceedsTotalSize)
        );
    }

    #[test]
    fn test_parent_chain() {
        assert!(parent_chain("a.txt").is_empty());
        assert_eq!(parent_chain("a/b/c.txt"), vec!["a", "b"]);
        assert_eq!(segment_count(""), 0);
        assert_eq!(segment_count("a/b"), 2);
    }
}
