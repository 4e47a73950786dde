/*!
 * Path normalization and common-root resolution
 *
 * Relative paths are always forward-slash separated, never start with `./` or `/`, and the
 * anchor itself is the empty string.
 */

use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

use log::debug;

use crate::error::{RepoPromptError, Result};

/// Normalize a relative path string to the canonical representation
pub fn normalize(input: &str) -> String {
    let unified = input.replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();

    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    segments.join("/")
}

/// Join a relative directory path and an entry name
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Parent portion of a relative path (`""` for top-level entries)
pub fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(parent, _)| parent)
}

/// Last segment of a relative path
pub fn file_name(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

/// Base name of an absolute path as a string
pub fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// Root-relative path of `target`, or `""` when both are the same
pub fn relative_path(root: &Path, target: &Path) -> Result<String> {
    let stripped = target
        .strip_prefix(root)
        .map_err(|_| RepoPromptError::OutsideRoot {
            root: root.to_path_buf(),
            path: target.to_path_buf(),
        })?;

    let segments: Vec<String> = stripped
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();

    Ok(segments.join("/"))
}

/// Make a path absolute without touching the filesystem
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()?.join(path)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }

    Ok(out)
}

/// Directory a path stands for: itself when it is a directory, otherwise its parent
fn directory_of(path: &Path) -> PathBuf {
    let is_dir = match fs::metadata(path) {
        Ok(metadata) => metadata.is_dir(),
        // Gone from disk: anything with an extension is assumed to be a file
        Err(_) => path.extension().is_none(),
    };

    if is_dir {
        path.to_path_buf()
    } else {
        path.parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| path.to_path_buf())
    }
}

/// Deepest directory that is an ancestor of (or equal to) every selected path
pub fn common_root(paths: &[PathBuf]) -> Result<PathBuf> {
    let first = match paths {
        [] => crate::bail!(InvalidSelection, "no files or folders selected"),
        [only] => return Ok(directory_of(only)),
        [first, ..] => first,
    };

    let split: Vec<Vec<Component<'_>>> = paths.iter().map(|p| p.components().collect()).collect();
    let shortest = split.iter().map(Vec::len).min().unwrap_or(0);

    let mut shared = 0;
    while shared < shortest && split.iter().all(|segments| segments[shared] == split[0][shared]) {
        shared += 1;
    }

    if shared == 0 {
        debug!("Selection shares no path segments, falling back to the first entry");
        return Ok(directory_of(first));
    }

    let candidate: PathBuf = split[0][..shared].iter().collect();
    Ok(directory_of(&candidate))
}
