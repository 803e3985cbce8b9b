//! Store index persistence
//!
//! The index maps digests to object metadata and source references to
//! digests. It is written as JSON with a SHA256 checksum over its body and
//! replaced atomically (write temp, fsync, rename) so an interrupted write
//! leaves the previous index intact. A file that fails the checksum is
//! reported as corrupt and never silently rebuilt.
//!
//! Writers in different processes are serialized by an advisory lock on
//! `index.lock`; each writer reloads the index after taking it.

use crate::error::{ConvoyError, ConvoyResult};
use crate::store::source::CachePolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Index file name inside the store root
pub const INDEX_FILE: &str = "index.json";

/// Advisory lock file guarding index writes across processes
pub const LOCK_FILE: &str = "index.lock";

/// Shortest digest prefix accepted when naming an object
const MIN_PREFIX: usize = 4;

/// Bumped whenever the on-disk layout changes incompatibly
pub const INDEX_VERSION: u32 = 1;

/// An immutable, content-addressed file set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheObject {
    /// SHA256 of the canonical file set
    pub digest: String,
    /// Total content bytes
    pub size_bytes: u64,
    /// Number of files
    pub file_count: usize,
    /// Source references that resolved to this digest
    pub references: Vec<String>,
    /// Workspace paths that materialized this object
    pub consumers: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl CacheObject {
    pub fn new(digest: String, size_bytes: u64, file_count: usize) -> Self {
        let now = Utc::now();
        Self {
            digest,
            size_bytes,
            file_count,
            references: Vec::new(),
            consumers: Vec::new(),
            created_at: now,
            last_accessed: now,
        }
    }
}

/// A source reference bound to a digest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefBinding {
    pub digest: String,
    pub policy: CachePolicy,
    pub bound_at: DateTime<Utc>,
}

/// In-memory object table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexBody {
    pub objects: BTreeMap<String, CacheObject>,
    pub refs: BTreeMap<String, RefBinding>,
}

#[derive(Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    checksum: String,
    index: IndexBody,
}

impl IndexBody {
    /// Record `reference -> digest`, appending the reference to the object.
    /// Rebinding to a different digest requires `replace`; with `replace`
    /// the binding time is refreshed even when the digest is unchanged, so
    /// a refetched branch starts a new TTL window.
    pub fn bind(
        &mut self,
        reference: &str,
        digest: &str,
        policy: CachePolicy,
        replace: bool,
    ) -> ConvoyResult<()> {
        if let Some(existing) = self.refs.get(reference) {
            if existing.digest != digest {
                if !replace {
                    return Err(ConvoyError::ReferenceConflict {
                        reference: reference.to_string(),
                        bound: existing.digest.clone(),
                        attempted: digest.to_string(),
                    });
                }
                let previous = existing.digest.clone();
                if let Some(old) = self.objects.get_mut(&previous) {
                    old.references.retain(|r| r != reference);
                }
            }
        }

        let object = self
            .objects
            .get_mut(digest)
            .ok_or_else(|| ConvoyError::ObjectNotFound(digest.to_string()))?;
        if !object.references.iter().any(|r| r == reference) {
            object.references.push(reference.to_string());
        }
        object.last_accessed = Utc::now();

        let rebinding = self
            .refs
            .get(reference)
            .map_or(true, |existing| existing.digest != digest);
        if rebinding || replace {
            self.refs.insert(
                reference.to_string(),
                RefBinding {
                    digest: digest.to_string(),
                    policy,
                    bound_at: Utc::now(),
                },
            );
        }
        Ok(())
    }

    /// Record a consuming workspace and bump last access
    pub fn add_consumer(&mut self, digest: &str, consumer: &str) -> ConvoyResult<()> {
        let object = self
            .objects
            .get_mut(digest)
            .ok_or_else(|| ConvoyError::ObjectNotFound(digest.to_string()))?;
        if !object.consumers.iter().any(|c| c == consumer) {
            object.consumers.push(consumer.to_string());
        }
        object.last_accessed = Utc::now();
        Ok(())
    }

    /// Drop consumers whose path starts with `prefix`; returns how many were dropped
    pub fn remove_consumers(&mut self, prefix: &str) -> usize {
        let mut removed = 0;
        for object in self.objects.values_mut() {
            let before = object.consumers.len();
            object
                .consumers
                .retain(|c| !Path::new(c).starts_with(prefix));
            removed += before - object.consumers.len();
        }
        removed
    }

    /// Remove an object and every reference bound to it
    pub fn remove_object(&mut self, digest: &str) -> Option<CacheObject> {
        let object = self.objects.remove(digest)?;
        self.refs.retain(|_, binding| binding.digest != digest);
        Some(object)
    }

    /// Digest named by `key`: a full digest, a bound source reference, or
    /// an unambiguous digest prefix
    pub fn resolve(&self, key: &str) -> ConvoyResult<String> {
        let key = key.trim();
        if self.objects.contains_key(key) {
            return Ok(key.to_string());
        }
        if let Some(binding) = self.refs.get(key) {
            return Ok(binding.digest.clone());
        }

        if key.len() >= MIN_PREFIX && key.chars().all(|c| c.is_ascii_hexdigit()) {
            let mut found = self.objects.keys().filter(|digest| digest.starts_with(key));
            match (found.next(), found.next()) {
                (Some(digest), None) => return Ok(digest.clone()),
                (Some(_), Some(_)) => {
                    return Err(ConvoyError::User(format!(
                        "Digest prefix '{}' matches more than one object",
                        key
                    )))
                }
                _ => {}
            }
        }
        Err(ConvoyError::ObjectNotFound(key.to_string()))
    }

    fn checksum(&self) -> ConvoyResult<String> {
        let bytes = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(bytes)))
    }
}

/// Load the index at `path`; a missing file is an empty index
pub async fn load(path: &Path) -> ConvoyResult<IndexBody> {
    let content = match fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(IndexBody::default()),
        Err(e) => {
            return Err(ConvoyError::io(
                format!("reading store index {}", path.display()),
                e,
            ))
        }
    };

    let corrupt = |reason: String| ConvoyError::StoreCorrupt {
        path: path.to_path_buf(),
        reason,
    };

    let file: IndexFile =
        serde_json::from_slice(&content).map_err(|e| corrupt(format!("unreadable: {}", e)))?;
    if file.version != INDEX_VERSION {
        return Err(corrupt(format!(
            "unsupported index version {} (expected {})",
            file.version, INDEX_VERSION
        )));
    }
    let actual = file.index.checksum()?;
    if actual != file.checksum {
        return Err(corrupt(format!(
            "checksum mismatch (recorded {}, computed {})",
            file.checksum, actual
        )));
    }

    Ok(file.index)
}

/// Persist the index atomically
pub async fn persist(path: &Path, body: &IndexBody) -> ConvoyResult<()> {
    let file = IndexFile {
        version: INDEX_VERSION,
        checksum: body.checksum()?,
        index: body.clone(),
    };
    let bytes = serde_json::to_vec_pretty(&file)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(INDEX_FILE);
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    let write = async {
        let mut handle = fs::File::create(&tmp).await?;
        handle.write_all(&bytes).await?;
        handle.sync_all().await?;
        drop(handle);
        fs::rename(&tmp, path).await
    };

    if let Err(e) = write.await {
        let _ = fs::remove_file(&tmp).await;
        return Err(ConvoyError::write(
            format!("writing store index {}", path.display()),
            e,
        ));
    }

    sync_parent(path).await;
    Ok(())
}

/// Exclusive advisory lock on the index, released when dropped
#[derive(Debug)]
pub struct IndexLock {
    _file: std::fs::File,
}

impl IndexLock {
    /// Block (off the async runtime) until the lock at `path` is ours
    pub async fn acquire(path: &Path) -> ConvoyResult<Self> {
        let context = format!("locking store index {}", path.display());
        let path = path.to_path_buf();
        let locked = tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            lock_exclusive(&file)?;
            Ok::<_, std::io::Error>(file)
        })
        .await
        .map_err(|e| ConvoyError::io(context.clone(), std::io::Error::other(e)))?;

        match locked {
            Ok(file) => Ok(Self { _file: file }),
            Err(e) => Err(ConvoyError::io(context, e)),
        }
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &std::fs::File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;
    // SAFETY: the descriptor belongs to `file`, which outlives the call
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &std::fs::File) -> std::io::Result<()> {
    Ok(())
}

/// Best-effort fsync of the directory holding `path` so the rename is durable
async fn sync_parent(path: &Path) {
    #[cfg(unix)]
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent).await {
            let _ = dir.sync_all().await;
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}
