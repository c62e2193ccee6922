//! Path validation
//!
//! Confines every candidate path to the storage root. Checks run in a fixed
//! order: emptiness, host character rules, literal traversal markers,
//! normalization, then the root prefix test. A symlink as the final
//! component is rejected outright.

use path_absolutize::Absolutize;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::PathError;

/// Longest accepted path, in bytes of its host representation.
pub const MAX_PATH_LENGTH: usize = 4096;

const CASE_INSENSITIVE: bool = cfg!(any(windows, target_os = "macos"));

/// An absolute path that passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NormalizedPath(PathBuf);

impl NormalizedPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

impl AsRef<Path> for NormalizedPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl std::fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Validates candidate paths against a fixed, canonical root.
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    /// Canonicalizes `root`, which must already exist.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = strip_verbatim(root.as_ref().canonicalize()?);
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validates a path that is not scoped to any root. Relative input is
    /// resolved against the working directory.
    pub fn validate(candidate: &str) -> Result<NormalizedPath, PathError> {
        check_raw(candidate)?;
        let cwd = std::env::current_dir()
            .map_err(|e| PathError::malformed(candidate, e.to_string()))?;
        normalize(candidate, &cwd)
    }

    /// Validates `candidate` and requires the result to sit at or below `root`.
    pub fn validate_within_root(candidate: &str, root: &Path) -> Result<NormalizedPath, PathError> {
        check_raw(candidate)?;
        let root = canonicalize_existing_prefix(root)
            .map_err(|e| PathError::malformed(root.to_string_lossy(), e.to_string()))?;
        let normalized = normalize(candidate, &root)?;
        if !starts_with_root(normalized.as_path(), &root) {
            return Err(PathError::OutsideRoot(candidate.to_string()));
        }
        Ok(normalized)
    }

    /// Resolves a store path: either a root-relative virtual path (`/a.txt`,
    /// `docs/b.txt`) or a host path already under the root.
    pub fn resolve(&self, candidate: &str) -> Result<NormalizedPath, PathError> {
        check_raw(candidate)?;
        let as_path = Path::new(candidate);
        let has_prefix = matches!(as_path.components().next(), Some(Component::Prefix(_)));
        if has_prefix || starts_with_root(as_path, &self.root) {
            return Self::validate_within_root(candidate, &self.root);
        }
        let relative = candidate.trim_start_matches(['/', '\\']);
        if relative.is_empty() {
            return Ok(NormalizedPath(self.root.clone()));
        }
        Self::validate_within_root(relative, &self.root)
    }

    /// Re-roots a relative path found by walking another tree. Names are
    /// taken as they are on disk, so the raw-string rules do not apply;
    /// only plain name components are accepted and the result must still
    /// land under the root.
    pub fn rebase(&self, relative: &Path) -> Result<NormalizedPath, PathError> {
        let display = relative.to_string_lossy();
        let mut components = relative.components().peekable();
        if components.peek().is_none() {
            return Err(PathError::Empty);
        }
        if !components.all(|c| matches!(c, Component::Normal(_))) {
            return Err(PathError::malformed(display, "not a plain relative path"));
        }
        if relative.as_os_str().as_encoded_bytes().contains(&0) {
            return Err(PathError::malformed(display, "character '\\0' is not allowed"));
        }

        let joined = self.root.join(relative);
        if let Ok(meta) = std::fs::symlink_metadata(&joined) {
            if meta.file_type().is_symlink() {
                return Err(PathError::SymlinkNotSupported(display.into_owned()));
            }
        }
        let resolved = canonicalize_existing_prefix(&joined)
            .map_err(|e| PathError::malformed(display.as_ref(), e.to_string()))?;
        if !starts_with_root(&resolved, &self.root) {
            return Err(PathError::OutsideRoot(display.into_owned()));
        }
        Ok(NormalizedPath(resolved))
    }

    /// Rejects paths whose host form exceeds [`MAX_PATH_LENGTH`].
    pub fn check_length(path: &NormalizedPath) -> Result<(), PathError> {
        let len = path.as_path().as_os_str().len();
        if len > MAX_PATH_LENGTH {
            return Err(PathError::TooLong {
                path: path.to_string(),
                limit: MAX_PATH_LENGTH,
            });
        }
        Ok(())
    }

    /// Root-relative display form, always `/`-separated.
    pub fn virtual_path(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rest) => {
                let parts: Vec<String> = rest
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                format!("/{}", parts.join("/"))
            }
            Err(_) => path.display().to_string(),
        }
    }
}

/// Rules applied to the raw string before normalization.
fn check_raw(candidate: &str) -> Result<(), PathError> {
    if candidate.trim().is_empty() {
        return Err(PathError::Empty);
    }
    if let Some(bad) = candidate.chars().find(|c| is_disallowed_char(*c)) {
        return Err(PathError::malformed(
            candidate,
            format!("character {bad:?} is not allowed"),
        ));
    }
    if let Some(colon) = candidate.find(':') {
        if cfg!(windows) && colon != 1 {
            return Err(PathError::malformed(candidate, "unexpected ':'"));
        }
    }
    if candidate.contains('~') || candidate.contains("../") || candidate.contains("..\\") {
        return Err(PathError::malformed(candidate, "traversal marker"));
    }
    Ok(())
}

fn is_disallowed_char(c: char) -> bool {
    if c == '\0' {
        return true;
    }
    if cfg!(windows) {
        return c.is_control() || matches!(c, '<' | '>' | '"' | '|' | '?' | '*');
    }
    false
}

fn normalize(candidate: &str, base: &Path) -> Result<NormalizedPath, PathError> {
    let lexical = Path::new(candidate)
        .absolutize_from(base)
        .map_err(|e| PathError::malformed(candidate, e.to_string()))?
        .to_path_buf();

    if let Ok(meta) = std::fs::symlink_metadata(&lexical) {
        if meta.file_type().is_symlink() {
            return Err(PathError::SymlinkNotSupported(candidate.to_string()));
        }
    }

    let resolved = canonicalize_existing_prefix(&lexical)
        .map_err(|e| PathError::malformed(candidate, e.to_string()))?;

    // Traversal that only shows up after resolution.
    if resolved
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
    {
        return Err(PathError::malformed(candidate, "traversal after normalization"));
    }
    Ok(NormalizedPath(resolved))
}

/// Canonicalizes the deepest existing ancestor and re-appends the rest, so
/// links in parent directories are resolved even when the leaf is new.
fn canonicalize_existing_prefix(path: &Path) -> io::Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();
    loop {
        match existing.canonicalize() {
            Ok(canonical) => {
                let mut out = strip_verbatim(canonical);
                for part in tail.iter().rev() {
                    out.push(part);
                }
                return Ok(out);
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => {
                let Some(name) = existing.file_name().map(|n| n.to_os_string()) else {
                    return Ok(path.to_path_buf());
                };
                tail.push(name);
                if !existing.pop() {
                    return Ok(path.to_path_buf());
                }
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(windows)]
fn strip_verbatim(path: PathBuf) -> PathBuf {
    let stripped = path
        .to_str()
        .and_then(|s| s.strip_prefix(r"\\?\"))
        .filter(|rest| !rest.starts_with("UNC"))
        .map(PathBuf::from);
    stripped.unwrap_or(path)
}

#[cfg(not(windows))]
fn strip_verbatim(path: PathBuf) -> PathBuf {
    path
}

fn starts_with_root(path: &Path, root: &Path) -> bool {
    if CASE_INSENSITIVE {
        let path = path.to_string_lossy().to_lowercase();
        let root = root.to_string_lossy().to_lowercase();
        Path::new(&path).starts_with(Path::new(&root))
    } else {
        path.starts_with(root)
    }
}
