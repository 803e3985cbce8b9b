//! File sets and their canonical digest
//!
//! A file set is a collection of (relative path, content) entries. Its digest
//! is independent of the order entries are supplied in: entries are sorted by
//! their `/`-separated path and each contributes its path, a NUL separator,
//! a kind byte (regular, executable or symlink), the content length
//! (little-endian u64) and the content to a single SHA256. A symlink's
//! content is its target.

use crate::error::{ConvoyError, ConvoyResult};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Component as PathComponent, Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Kind byte for symlinks; regular files use their executable flag (0 or 1)
const KIND_SYMLINK: u8 = 2;

/// One file in a file set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the file-set root
    pub path: PathBuf,
    /// File contents
    pub contents: Vec<u8>,
    /// Whether the file should be executable when materialized
    pub executable: bool,
    /// Set for symlinks; `contents` is empty
    pub link_target: Option<PathBuf>,
}

impl FileEntry {
    pub fn new(path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
            executable: false,
            link_target: None,
        }
    }

    /// A symlink at `path` pointing to `target`, relative to the link's directory
    pub fn symlink(path: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            contents: Vec::new(),
            executable: false,
            link_target: Some(target.into()),
        }
    }

    pub fn executable(mut self) -> Self {
        self.executable = true;
        self
    }
}

/// A validated, sorted file set with its digest
#[derive(Debug)]
pub struct CanonicalFileSet {
    pub digest: String,
    pub total_size: u64,
    /// Entries keyed by normalized relative path, sorted
    pub entries: Vec<(String, FileEntry)>,
}

impl CanonicalFileSet {
    /// Validate and sort entries, then compute the digest
    pub fn new(files: impl IntoIterator<Item = FileEntry>) -> ConvoyResult<Self> {
        let mut entries = Vec::new();
        let mut seen = HashSet::new();

        for file in files {
            let key = normalize_relative(&file.path)?;
            if !seen.insert(key.clone()) {
                return Err(ConvoyError::InvalidPath {
                    path: file.path,
                    reason: "duplicate entry".to_string(),
                });
            }
            entries.push((key, file));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut hasher = Sha256::new();
        let mut total_size = 0u64;
        for (key, file) in &entries {
            hasher.update(key.as_bytes());
            match &file.link_target {
                Some(target) => {
                    let target = validate_link(key, target)?;
                    hasher.update([0u8, KIND_SYMLINK]);
                    hasher.update((target.len() as u64).to_le_bytes());
                    hasher.update(target.as_bytes());
                }
                None => {
                    hasher.update([0u8, u8::from(file.executable)]);
                    hasher.update((file.contents.len() as u64).to_le_bytes());
                    hasher.update(&file.contents);
                    total_size += file.contents.len() as u64;
                }
            }
        }

        Ok(Self {
            digest: hex::encode(hasher.finalize()),
            total_size,
            entries,
        })
    }

    pub fn file_count(&self) -> usize {
        self.entries.len()
    }
}

/// Normalize a relative path to `a/b/c` form, rejecting anything that could
/// escape the file-set root.
pub fn normalize_relative(path: &Path) -> ConvoyResult<String> {
    let invalid = |reason: &str| ConvoyError::InvalidPath {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            PathComponent::Normal(part) => {
                let part = part
                    .to_str()
                    .ok_or_else(|| invalid("path is not valid UTF-8"))?;
                parts.push(part);
            }
            PathComponent::CurDir => {}
            PathComponent::ParentDir => return Err(invalid("parent directory components are not allowed")),
            PathComponent::RootDir | PathComponent::Prefix(_) => {
                return Err(invalid("path must be relative"))
            }
        }
    }

    if parts.is_empty() {
        return Err(invalid("path is empty"));
    }
    Ok(parts.join("/"))
}

/// A symlink target must be relative and resolve inside the file-set root
fn validate_link(key: &str, target: &Path) -> ConvoyResult<String> {
    let invalid = |reason: &str| ConvoyError::InvalidPath {
        path: PathBuf::from(key),
        reason: reason.to_string(),
    };
    let text = target
        .to_str()
        .ok_or_else(|| invalid("symlink target is not valid UTF-8"))?;
    if text.is_empty() {
        return Err(invalid("symlink target is empty"));
    }

    // Directories between the root and the link itself
    let mut depth = key.split('/').count() - 1;
    for component in target.components() {
        match component {
            PathComponent::Normal(_) => depth += 1,
            PathComponent::CurDir => {}
            PathComponent::ParentDir => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| invalid("symlink target escapes the file set"))?;
            }
            PathComponent::RootDir | PathComponent::Prefix(_) => {
                return Err(invalid("symlink target must be relative"))
            }
        }
    }
    Ok(text.to_string())
}

/// Read a directory tree into a file set.
///
/// Symlinks are recorded as links, not followed, so a link cycle cannot
/// loop the walk and materialized workspaces see the same layout.
pub async fn read_tree(root: &Path) -> ConvoyResult<Vec<FileEntry>> {
    let mut files = Vec::new();
    let mut pending = vec![PathBuf::new()];

    while let Some(relative) = pending.pop() {
        let dir = root.join(&relative);
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| ConvoyError::io(format!("reading directory {}", dir.display()), e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ConvoyError::io(format!("reading entry in {}", dir.display()), e))?
        {
            let path = entry.path();
            let child = relative.join(entry.file_name());
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| ConvoyError::io(format!("inspecting {}", path.display()), e))?;

            if file_type.is_symlink() {
                let target = fs::read_link(&path)
                    .await
                    .map_err(|e| ConvoyError::io(format!("reading link {}", path.display()), e))?;
                files.push(FileEntry::symlink(child, target));
                continue;
            }
            if file_type.is_dir() {
                pending.push(child);
                continue;
            }

            let metadata = fs::metadata(&path)
                .await
                .map_err(|e| ConvoyError::io(format!("inspecting {}", path.display()), e))?;
            if !metadata.is_file() {
                debug!("Skipping non-file entry {}", path.display());
                continue;
            }

            let contents = fs::read(&path)
                .await
                .map_err(|e| ConvoyError::io(format!("reading {}", path.display()), e))?;
            files.push(FileEntry {
                path: child,
                contents,
                executable: is_executable(&metadata),
                link_target: None,
            });
        }
    }

    Ok(files)
}

#[cfg(unix)]
pub(crate) fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
pub(crate) fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    false
}
