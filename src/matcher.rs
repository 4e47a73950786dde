/*!
 * Layered ignore-pattern matching
 *
 * Patterns come from three layers: built-in excludes, configured patterns and the root
 * `.gitignore`. A `!`-prefixed pattern re-includes a path and always beats every positive
 * match, whichever layer either came from.
 */

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use glob_match::glob_match;
use log::{debug, info};

use crate::error::{RepoPromptError, Result};

/// Excludes applied regardless of configuration; only a negation pattern re-includes them
pub const BUILTIN_EXCLUDES: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    "node_modules",
    "dist",
    "build",
    "out",
    "target",
];

const GLOB_META: &[char] = &['*', '?', '[', '{'];

#[derive(Debug, Clone)]
struct CompiledPattern {
    /// Pattern as written, without the `!`
    source: String,
    /// Globs tried against each candidate window
    globs: Vec<String>,
    /// Leading `/`: only windows starting at the anchor are tried
    anchored: bool,
    /// Trailing `/`: the final segment must be a directory
    dir_only: bool,
}

impl CompiledPattern {
    fn parse(raw: &str) -> Option<(bool, Self)> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return None;
        }

        let (negated, body) = match trimmed.strip_prefix('!') {
            Some(rest) => (true, rest.trim()),
            None => (false, trimmed),
        };

        let anchored = body.starts_with('/');
        let dir_only = body.ends_with('/');
        let core = body.trim_matches('/');
        if core.is_empty() {
            return None;
        }

        let mut globs = vec![core.to_string()];
        // `dir/**` also names the directory itself
        if let Some(dir) = core.strip_suffix("/**") {
            if !dir.is_empty() {
                globs.push(dir.to_string());
            }
        }

        Some((
            negated,
            Self {
                source: body.to_string(),
                globs,
                anchored,
                dir_only,
            },
        ))
    }

    /// Try every window of `segments` that ends after the first `exempt` segments
    fn matches(&self, segments: &[&str], is_dir: bool, exempt: usize) -> bool {
        let count = segments.len();

        for end in (exempt + 1)..=count {
            if self.dir_only && end == count && !is_dir {
                continue;
            }

            let last_start = if self.anchored { 0 } else { end - 1 };
            for start in 0..=last_start {
                let window = segments[start..end].join("/");
                if self.globs.iter().any(|glob| glob_match(glob, &window)) {
                    return true;
                }
            }
        }

        false
    }

    /// Whether some path strictly beneath `dir` could match this pattern
    fn may_match_beneath(&self, dir: &[&str]) -> bool {
        if !self.anchored {
            return true;
        }

        let literal: Vec<&str> = self.globs[0]
            .split('/')
            .take_while(|segment| !segment.contains(GLOB_META))
            .collect();

        literal
            .iter()
            .zip(dir.iter())
            .all(|(pattern_segment, dir_segment)| pattern_segment == dir_segment)
    }
}

/// Evaluates whether a relative path should be excluded
#[derive(Debug, Clone, Default)]
pub struct IgnoreMatcher {
    positives: Vec<CompiledPattern>,
    negations: Vec<CompiledPattern>,
}

impl IgnoreMatcher {
    /// Build a matcher from an ordered pattern list (`!` marks a negation)
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut matcher = Self::default();
        matcher.extend(patterns);
        matcher
    }

    /// Start a layered matcher
    pub fn builder() -> IgnoreMatcherBuilder {
        IgnoreMatcherBuilder::default()
    }

    fn extend<I, S>(&mut self, patterns: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for raw in patterns {
            match CompiledPattern::parse(raw.as_ref()) {
                Some((true, pattern)) => self.negations.push(pattern),
                Some((false, pattern)) => self.positives.push(pattern),
                None => {}
            }
        }
    }

    /// Number of active patterns
    pub fn len(&self) -> usize {
        self.positives.len() + self.negations.len()
    }

    /// Whether the matcher has no patterns at all
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// View of this matcher in which positive patterns cannot match within the first
    /// `exempt` path segments
    ///
    /// Used for walks rooted at an explicitly selected directory: rules that would only
    /// exclude the selected directory itself are lifted for everything beneath it.
    pub fn scoped(&self, exempt: usize) -> ScopedMatcher<'_> {
        ScopedMatcher {
            matcher: self,
            exempt,
        }
    }

    /// Whether a file at `rel_path` is excluded
    pub fn should_ignore(&self, rel_path: &str) -> bool {
        self.scoped(0).should_ignore(rel_path)
    }

    /// Whether a directory at `rel_path` is excluded as a whole, including everything beneath it
    pub fn should_ignore_dir(&self, rel_path: &str) -> bool {
        self.scoped(0).should_ignore_dir(rel_path)
    }

    /// Whether a directory matches a positive pattern of its own
    pub fn matches_dir(&self, rel_path: &str) -> bool {
        self.scoped(0).matches_dir(rel_path)
    }

    /// Whether some negation pattern could re-include a path beneath `rel_path`
    pub fn may_reinclude_beneath(&self, rel_path: &str) -> bool {
        let segments = split(rel_path);
        self.negations
            .iter()
            .any(|pattern| pattern.may_match_beneath(&segments))
    }
}

fn split(rel_path: &str) -> Vec<&str> {
    rel_path.split('/').filter(|s| !s.is_empty()).collect()
}

/// An [`IgnoreMatcher`] with a leading run of path segments exempt from positive patterns
#[derive(Debug, Clone, Copy)]
pub struct ScopedMatcher<'a> {
    matcher: &'a IgnoreMatcher,
    exempt: usize,
}

impl ScopedMatcher<'_> {
    fn is_ignored(&self, rel_path: &str, is_dir: bool) -> bool {
        let segments = split(rel_path);
        if segments.is_empty() {
            return false;
        }

        let negations = &self.matcher.negations;
        if let Some(pattern) = negations.iter().find(|p| p.matches(&segments, is_dir, 0)) {
            debug!("{} re-included by !{}", rel_path, pattern.source);
            return false;
        }

        let positives = &self.matcher.positives;
        match positives
            .iter()
            .find(|p| p.matches(&segments, is_dir, self.exempt))
        {
            Some(pattern) => {
                debug!("{} ignored by {}", rel_path, pattern.source);
                true
            }
            None => false,
        }
    }

    /// Whether a file at `rel_path` is excluded
    pub fn should_ignore(&self, rel_path: &str) -> bool {
        self.is_ignored(rel_path, false)
    }

    /// Whether a directory at `rel_path` is excluded as a whole, including everything beneath it
    pub fn should_ignore_dir(&self, rel_path: &str) -> bool {
        self.is_ignored(rel_path, true) && !self.matcher.may_reinclude_beneath(rel_path)
    }

    /// Whether a directory matches a positive pattern of its own
    pub fn matches_dir(&self, rel_path: &str) -> bool {
        self.is_ignored(rel_path, true)
    }
}

/// Layered construction of an [`IgnoreMatcher`]
#[derive(Debug, Default)]
pub struct IgnoreMatcherBuilder {
    patterns: Vec<String>,
    skip_builtin: bool,
}

impl IgnoreMatcherBuilder {
    /// Add configured patterns
    pub fn patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.patterns
            .extend(patterns.into_iter().map(|p| p.as_ref().to_string()));
        self
    }

    /// Leave out the built-in excludes (only used by tests of the other layers)
    pub fn without_builtin(mut self) -> Self {
        self.skip_builtin = true;
        self
    }

    /// Finish the matcher
    pub fn build(self) -> IgnoreMatcher {
        let mut matcher = IgnoreMatcher::default();
        if !self.skip_builtin {
            matcher.extend(BUILTIN_EXCLUDES.iter());
        }
        matcher.extend(self.patterns);
        matcher
    }
}

/// Re-anchor a `/`-rooted pattern, negated or not, below `base_rel`
///
/// Leading `/` means the resolved root, which sits at `base_rel` when paths are anchored
/// at the parent of a selected directory.
pub fn rebase_pattern(pattern: &str, base_rel: &str) -> String {
    let line = pattern.trim();
    let (bang, body) = match line.strip_prefix('!') {
        Some(rest) => ("!", rest.trim()),
        None => ("", line),
    };

    match body.strip_prefix('/') {
        Some(anchored) if !base_rel.is_empty() => format!("{}/{}/{}", bang, base_rel, anchored),
        _ => format!("{}{}", bang, body),
    }
}

/// Parse `.gitignore` text found at `base_rel` (anchor-relative directory of the file)
///
/// Lines are read here rather than through `ignore::gitignore`, whose last-match-wins
/// order would let a later rule undo a negation.
pub fn parse_gitignore(content: &str, base_rel: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| rebase_pattern(line, base_rel))
        .collect()
}

#[derive(Debug)]
struct CachedGitignore {
    modified: Option<SystemTime>,
    len: u64,
    base_rel: String,
    patterns: Arc<Vec<String>>,
}

/// Parsed `.gitignore` files keyed by directory
///
/// Each entry is rebuilt as a whole when the file's modification time or length changes.
#[derive(Debug, Default)]
pub struct GitignoreCache {
    entries: RwLock<HashMap<PathBuf, CachedGitignore>>,
}

impl GitignoreCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Patterns of `dir/.gitignore`, empty when there is no such file
    pub fn load(&self, dir: &Path, base_rel: &str) -> Result<Arc<Vec<String>>> {
        let path = dir.join(".gitignore");
        let metadata = match fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Ok(Arc::new(Vec::new())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.write_entries()?.remove(dir);
                return Ok(Arc::new(Vec::new()));
            }
            Err(e) => return Err(RepoPromptError::from_io(e, &path)),
        };
        let modified = metadata.modified().ok();

        if let Some(cached) = self.read_entries()?.get(dir) {
            if cached.modified == modified && cached.len == metadata.len() && cached.base_rel == base_rel
            {
                return Ok(Arc::clone(&cached.patterns));
            }
        }

        let content = fs::read_to_string(&path).map_err(|e| RepoPromptError::from_io(e, &path))?;
        let patterns = Arc::new(parse_gitignore(&content, base_rel));
        info!(
            "Loaded {} patterns from {}",
            patterns.len(),
            path.display()
        );

        self.write_entries()?.insert(
            dir.to_path_buf(),
            CachedGitignore {
                modified,
                len: metadata.len(),
                base_rel: base_rel.to_string(),
                patterns: Arc::clone(&patterns),
            },
        );

        Ok(patterns)
    }

    /// Drop every cached entry
    pub fn invalidate(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    fn read_entries(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<PathBuf, CachedGitignore>>> {
        self.entries
            .read()
            .map_err(|_| crate::error!(Unexpected, "gitignore cache lock poisoned"))
    }

    fn write_entries(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<PathBuf, CachedGitignore>>> {
        self.entries
            .write()
            .map_err(|_| crate::error!(Unexpected, "gitignore cache lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    use filetime::{set_file_mtime, FileTime};
    use tempfile::tempdir;

    #[test]
    fn test_negation_beats_positive_match() {
        let matcher = IgnoreMatcher::new(["**/dist/**", "!src/dist/index.js"]);

        assert!(!matcher.should_ignore("src/dist/index.js"));
        assert!(matcher.should_ignore("src/dist/other.js"));
        assert!(!matcher.should_ignore("src/main.js"));
    }

    #[test]
    fn test_patterns_match_at_any_depth() {
        let matcher = IgnoreMatcher::new(["*.pyc", "cache"]);

        assert!(matcher.should_ignore("a.pyc"));
        assert!(matcher.should_ignore("src/__pycache__/x.pyc"));
        assert!(matcher.should_ignore("deep/down/cache/file.txt"));
        assert!(matcher.should_ignore_dir("deep/down/cache"));
        assert!(!matcher.should_ignore("src/a.py"));
    }

    #[test]
    fn test_anchored_patterns_only_match_at_root() {
        let matcher = IgnoreMatcher::new(["/dist"]);

        assert!(matcher.should_ignore("dist/main.js"));
        assert!(matcher.should_ignore_dir("dist"));
        assert!(!matcher.should_ignore("src/dist/main.js"));
    }

    #[test]
    fn test_directory_patterns_cover_contents() {
        let matcher = IgnoreMatcher::new(["logs/", "tmp/**"]);

        assert!(matcher.should_ignore_dir("logs"));
        assert!(matcher.should_ignore("logs/today.txt"));
        assert!(matcher.should_ignore("app/logs/today.txt"));
        // A plain file named like the directory pattern is kept
        assert!(!matcher.should_ignore("logs"));

        assert!(matcher.should_ignore_dir("tmp"));
        assert!(matcher.should_ignore("tmp/a/b.txt"));
    }

    #[test]
    fn test_builtin_excludes_need_negation_to_override() {
        let matcher = IgnoreMatcher::builder().build();
        assert!(matcher.should_ignore_dir("node_modules"));
        assert!(matcher.should_ignore("pkg/node_modules/lib/index.js"));
        assert!(matcher.should_ignore_dir(".git"));

        let matcher = IgnoreMatcher::builder()
            .patterns(["!node_modules/keep.js"])
            .build();
        assert!(!matcher.should_ignore("node_modules/keep.js"));
        assert!(matcher.should_ignore("node_modules/other.js"));
        // The directory must still be walked to find the re-included file
        assert!(!matcher.should_ignore_dir("node_modules"));
        assert!(matcher.matches_dir("node_modules"));
    }

    #[test]
    fn test_anchored_negation_limits_reinclusion() {
        let matcher = IgnoreMatcher::new(["build", "!/build/keep/**"]);

        assert!(!matcher.should_ignore_dir("build"));
        assert!(matcher.may_reinclude_beneath("build/keep"));
        assert!(!matcher.may_reinclude_beneath("other"));
    }

    #[test]
    fn test_scoped_matcher_lifts_rules_on_selected_prefix() {
        let matcher = IgnoreMatcher::builder().patterns(["*.log"]).build();

        assert!(matcher.should_ignore("node_modules/pkg/index.js"));
        let scoped = matcher.scoped(1);
        assert!(!scoped.should_ignore("node_modules/pkg/index.js"));
        assert!(!scoped.should_ignore_dir("node_modules/pkg"));
        // Rules still apply beneath the exempt prefix
        assert!(scoped.should_ignore("node_modules/debug.log"));
        assert!(scoped.should_ignore_dir("node_modules/pkg/node_modules"));
    }

    #[test]
    fn test_comments_and_blanks_are_skipped() {
        let matcher = IgnoreMatcher::new(["", "   ", "# comment", "*.log"]);
        assert_eq!(matcher.len(), 1);
        assert!(IgnoreMatcher::new(Vec::<String>::new()).is_empty());
    }

    #[test]
    fn test_builder_layers() {
        let layered = IgnoreMatcher::builder().patterns(["*.log"]).build();
        assert_eq!(layered.len(), BUILTIN_EXCLUDES.len() + 1);
        assert!(layered.should_ignore_dir("target"));

        let bare = IgnoreMatcher::builder()
            .patterns(["*.log"])
            .without_builtin()
            .build();
        assert_eq!(bare.len(), 1);
        assert!(!bare.should_ignore_dir("target"));
        assert!(bare.should_ignore("target/run.log"));
    }

    #[test]
    fn test_gitignore_cache_invalidate() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join(".gitignore"), "*.log\n").unwrap();

        let cache = GitignoreCache::new();
        let first = cache.load(temp.path(), "").unwrap();
        cache.invalidate();
        let second = cache.load(temp.path(), "").unwrap();

        assert_eq!(first, second);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_parse_gitignore_rebases_anchored_patterns() {
        let content = "# build output\n/dist\n*.log\n\n!/dist/keep.txt\nnode_modules/\n";

        assert_eq!(
            parse_gitignore(content, ""),
            vec!["/dist", "*.log", "!/dist/keep.txt", "node_modules/"]
        );
        assert_eq!(
            parse_gitignore(content, "proj"),
            vec!["/proj/dist", "*.log", "!/proj/dist/keep.txt", "node_modules/"]
        );
    }

    #[test]
    fn test_rebase_pattern() {
        assert_eq!(rebase_pattern("/secret.txt", "src"), "/src/secret.txt");
        assert_eq!(rebase_pattern("!/keep.txt", "a/b"), "!/a/b/keep.txt");
        assert_eq!(rebase_pattern("*.log", "src"), "*.log");
        assert_eq!(rebase_pattern("/secret.txt", ""), "/secret.txt");
    }

    #[test]
    fn test_gitignore_cache_rebuilds_on_change() -> std::io::Result<()> {
        let temp = tempdir()?;
        let path = temp.path().join(".gitignore");
        fs::write(&path, "*.log\n")?;
        set_file_mtime(&path, FileTime::from_unix_time(1_000_000, 0))?;

        let cache = GitignoreCache::new();
        let first = cache.load(temp.path(), "").unwrap();
        assert_eq!(*first, vec!["*.log"]);

        let again = cache.load(temp.path(), "").unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let mut file = File::create(&path)?;
        writeln!(file, "*.tmp")?;
        writeln!(file, "!keep.tmp")?;
        drop(file);
        set_file_mtime(&path, FileTime::from_unix_time(2_000_000, 0))?;

        let rebuilt = cache.load(temp.path(), "").unwrap();
        assert_eq!(*rebuilt, vec!["*.tmp", "!keep.tmp"]);

        fs::remove_file(&path)?;
        assert!(cache.load(temp.path(), "").unwrap().is_empty());
        Ok(())
    }
}
