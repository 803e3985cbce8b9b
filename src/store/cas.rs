//! Content-addressable store for component file sets
//!
//! Objects live at `objects/<first two hex>/<digest>/` under the store root.
//! New content is staged under `tmp/` without holding any lock and moved
//! into place while holding the index write lock, so the index is the single
//! serialization point. Writers also hold the `index.lock` advisory lock and
//! reload the index from disk first, so a maintenance command in another
//! process cannot have its changes overwritten. Lookups share a read lock;
//! hard-link and copy work on disjoint workspace paths and needs no lock at
//! all.

use crate::error::{ConvoyError, ConvoyResult};
use crate::store::fileset::{normalize_relative, read_tree, CanonicalFileSet, FileEntry};
use crate::store::index::{self, CacheObject, IndexBody, IndexLock, INDEX_FILE, LOCK_FILE};
use crate::store::materialize::{
    create_symlink, materialize_tree, LinkOrCopy, MaterializeReport,
};
use crate::store::source::{CachePolicy, SourceDescriptor};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

const OBJECTS_DIR: &str = "objects";
const TMP_DIR: &str = "tmp";

/// Staging dirs younger than this may belong to an in-flight put
const STAGING_GRACE: Duration = Duration::from_secs(60 * 60);

/// Totals reported by [`Store::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_size: u64,
    pub object_count: usize,
    pub reference_count: usize,
}

/// An object selected by garbage collection
#[derive(Debug, Clone, Serialize)]
pub struct GcCandidate {
    pub digest: String,
    pub size_bytes: u64,
    pub last_accessed: DateTime<Utc>,
    pub references: Vec<String>,
}

/// Result of [`Store::gc`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct GcReport {
    pub dry_run: bool,
    pub candidates: Vec<GcCandidate>,
    pub reclaimed_bytes: u64,
    /// Object directories on disk that the index did not know about
    pub orphans_removed: usize,
}

/// Deduplicated, content-addressed storage of immutable file sets
#[derive(Debug)]
pub struct Store {
    root: PathBuf,
    index: RwLock<IndexBody>,
    mutable_ttl: Duration,
}

impl Store {
    /// Open (or initialize) a store rooted at `root`.
    ///
    /// Fails with `StoreCorrupt` if an existing index does not pass its
    /// integrity check.
    pub async fn open(root: impl Into<PathBuf>) -> ConvoyResult<Self> {
        let root = root.into();
        for dir in [root.join(OBJECTS_DIR), root.join(TMP_DIR)] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| ConvoyError::write(format!("creating {}", dir.display()), e))?;
        }

        let body = index::load(&root.join(INDEX_FILE)).await?;
        debug!(
            objects = body.objects.len(),
            refs = body.refs.len(),
            "Opened store at {}",
            root.display()
        );

        Ok(Self {
            root,
            index: RwLock::new(body),
            mutable_ttl: Duration::from_secs(60 * 60),
        })
    }

    /// How long a mutable (branch-like) binding is trusted by [`Store::lookup`]
    pub fn with_mutable_ttl(mut self, ttl: Duration) -> Self {
        self.mutable_ttl = ttl;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fresh path under the store's staging area for a provider to fill.
    /// Abandoned staging dirs are swept by [`Store::gc`].
    pub fn staging_dir(&self) -> PathBuf {
        self.root
            .join(TMP_DIR)
            .join(Uuid::new_v4().simple().to_string())
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    fn object_path(&self, digest: &str) -> PathBuf {
        let shard = digest.get(..2).unwrap_or(digest);
        self.root.join(OBJECTS_DIR).join(shard).join(digest)
    }

    /// Store a file set for `source`, returning its digest.
    ///
    /// Identical content is written once no matter how many sources point at
    /// it. A source already bound to different content is rejected; use
    /// [`Store::update`] to rebind deliberately.
    pub async fn put(
        &self,
        source: &SourceDescriptor,
        files: impl IntoIterator<Item = FileEntry>,
    ) -> ConvoyResult<String> {
        self.insert(source, canonical_set(source, files)?, false).await
    }

    /// Store a file set and rebind `source` to it even if it pointed elsewhere
    pub async fn update(
        &self,
        source: &SourceDescriptor,
        files: impl IntoIterator<Item = FileEntry>,
    ) -> ConvoyResult<String> {
        self.insert(source, canonical_set(source, files)?, true).await
    }

    /// [`Store::put`] for a directory tree on disk
    pub async fn put_dir(&self, source: &SourceDescriptor, dir: &Path) -> ConvoyResult<String> {
        self.put(source, read_tree(dir).await?).await
    }

    /// [`Store::update`] for a directory tree on disk
    pub async fn update_dir(&self, source: &SourceDescriptor, dir: &Path) -> ConvoyResult<String> {
        self.update(source, read_tree(dir).await?).await
    }

    async fn insert(
        &self,
        source: &SourceDescriptor,
        set: CanonicalFileSet,
        replace: bool,
    ) -> ConvoyResult<String> {
        let reference = source.reference();
        let digest = set.digest.clone();
        let object_path = self.object_path(&digest);

        let known = self.index.read().await.objects.contains_key(&digest);
        let mut staged = if known && object_path.is_dir() {
            None
        } else {
            Some(self.stage(&set).await?)
        };

        let (mut guard, _lock) = match self.writer().await {
            Ok(writer) => writer,
            Err(e) => {
                if let Some(dir) = staged {
                    remove_quietly(&dir).await;
                }
                return Err(e);
            }
        };

        if !replace {
            if let Some(binding) = guard.refs.get(&reference) {
                if binding.digest != digest {
                    if let Some(dir) = staged {
                        remove_quietly(&dir).await;
                    }
                    return Err(ConvoyError::ReferenceConflict {
                        reference,
                        bound: binding.digest.clone(),
                        attempted: digest,
                    });
                }
            }
        }

        let mut next = guard.clone();
        let present = next.objects.contains_key(&digest) && object_path.is_dir();
        if present {
            if let Some(dir) = staged.take() {
                remove_quietly(&dir).await;
            }
        } else {
            // The object may have been collected since the unlocked check
            let dir = match staged.take() {
                Some(dir) => dir,
                None => self.stage(&set).await?,
            };
            self.promote(&dir, &object_path).await?;
            if next.objects.contains_key(&digest) {
                // Indexed but its directory was lost; keep references and consumers
                warn!(digest = %digest, "Restored missing content for {}", reference);
            } else {
                next.objects.insert(
                    digest.clone(),
                    CacheObject::new(digest.clone(), set.total_size, set.file_count()),
                );
                info!(
                    digest = %digest,
                    files = set.file_count(),
                    bytes = set.total_size,
                    "Stored new object for {}",
                    reference
                );
            }
        }

        next.bind(&reference, &digest, source.policy(), replace)?;
        self.commit(&mut guard, next).await?;
        debug!(digest = %digest, "Bound {}", reference);
        Ok(digest)
    }

    /// Write a file set into a fresh staging directory
    async fn stage(&self, set: &CanonicalFileSet) -> ConvoyResult<PathBuf> {
        let dir = self.staging_dir();
        if let Err(e) = write_files(&dir, set).await {
            remove_quietly(&dir).await;
            return Err(e);
        }
        Ok(dir)
    }

    /// Move a staged directory to its final object path
    async fn promote(&self, staged: &Path, object_path: &Path) -> ConvoyResult<()> {
        if let Some(parent) = object_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ConvoyError::write(format!("creating {}", parent.display()), e))?;
        }
        if object_path.exists() {
            // Left over from an interrupted put that never reached the index
            warn!("Replacing unindexed object directory {}", object_path.display());
            fs::remove_dir_all(object_path).await.map_err(|e| {
                ConvoyError::io(format!("removing {}", object_path.display()), e)
            })?;
        }
        fs::rename(staged, object_path)
            .await
            .map_err(|e| ConvoyError::write(format!("promoting {}", object_path.display()), e))
    }

    /// Take the index for writing: the in-process write lock, then the
    /// cross-process lock file, then a fresh copy of the index from disk.
    async fn writer(&self) -> ConvoyResult<(RwLockWriteGuard<'_, IndexBody>, IndexLock)> {
        let mut guard = self.index.write().await;
        let lock = IndexLock::acquire(&self.root.join(LOCK_FILE)).await?;
        *guard = index::load(&self.index_path()).await?;
        Ok((guard, lock))
    }

    /// Persist `next` and make it the live index
    async fn commit(
        &self,
        guard: &mut RwLockWriteGuard<'_, IndexBody>,
        next: IndexBody,
    ) -> ConvoyResult<()> {
        index::persist(&self.index_path(), &next).await?;
        **guard = next;
        Ok(())
    }

    /// Digest currently bound to `source`.
    ///
    /// Returns `None` when the source was never stored, when a mutable
    /// binding is older than the configured TTL, and when the object's
    /// directory has gone missing. In every case the caller refetches and
    /// stores again, which also restores lost content.
    pub async fn lookup(&self, source: &SourceDescriptor) -> Option<String> {
        let reference = source.reference();
        let digest = {
            let index = self.index.read().await;
            let binding = index.refs.get(&reference)?;

            if binding.policy == CachePolicy::Mutable {
                let age = (Utc::now() - binding.bound_at).to_std().unwrap_or_default();
                if age > self.mutable_ttl {
                    debug!("Binding for {} is stale ({}s old)", reference, age.as_secs());
                    return None;
                }
            }

            index
                .objects
                .contains_key(&binding.digest)
                .then(|| binding.digest.clone())?
        };

        if !self.object_path(&digest).is_dir() {
            warn!(digest = %digest, "Content for {} is missing from the store", reference);
            return None;
        }
        Some(digest)
    }

    /// Whether `source` has any binding, fresh or stale
    pub async fn is_bound(&self, source: &SourceDescriptor) -> bool {
        self.index.read().await.refs.contains_key(&source.reference())
    }

    /// On-disk location of an object
    pub async fn get(&self, digest: &str) -> ConvoyResult<PathBuf> {
        if !self.index.read().await.objects.contains_key(digest) {
            return Err(ConvoyError::ObjectNotFound(digest.to_string()));
        }
        let path = self.object_path(digest);
        if !path.is_dir() {
            return Err(ConvoyError::ObjectNotFound(format!(
                "{} (indexed but missing from {})",
                digest,
                path.display()
            )));
        }
        Ok(path)
    }

    /// Place an object's files under `dest`, hard-linking where possible
    pub async fn materialize(&self, digest: &str, dest: &Path) -> ConvoyResult<MaterializeReport> {
        let path = self.get(digest).await?;
        let report = materialize_tree(&path, dest, &mut LinkOrCopy::default()).await?;
        debug!(
            digest = %digest,
            linked = report.linked,
            copied = report.copied,
            "Materialized into {}",
            dest.display()
        );
        Ok(report)
    }

    /// Record `workspace` as a consumer of the object, then materialize into it.
    ///
    /// Registering first keeps a concurrent GC from collecting the object
    /// while its files are being linked.
    pub async fn checkout(&self, digest: &str, workspace: &Path) -> ConvoyResult<MaterializeReport> {
        let consumer = workspace.to_string_lossy().into_owned();
        {
            let (mut guard, _lock) = self.writer().await?;
            let mut next = guard.clone();
            next.add_consumer(digest, &consumer)?;
            self.commit(&mut guard, next).await?;
        }
        self.materialize(digest, workspace).await
    }

    /// Forget consumers located under `prefix` (a cleaned-up run root)
    pub async fn release(&self, prefix: &Path) -> ConvoyResult<usize> {
        let prefix = prefix.to_string_lossy().into_owned();
        let (mut guard, _lock) = self.writer().await?;
        let mut next = guard.clone();
        let removed = next.remove_consumers(&prefix);
        if removed > 0 {
            self.commit(&mut guard, next).await?;
            debug!("Released {} consumer(s) under {}", removed, prefix);
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> StoreStats {
        stats_of(&*self.index.read().await)
    }

    /// Snapshot of all objects, most recently used first
    pub async fn objects(&self) -> Vec<CacheObject> {
        let mut objects: Vec<_> = self.index.read().await.objects.values().cloned().collect();
        objects.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        objects
    }

    /// Remove objects with no live consumer that were last used before
    /// `older_than` ago. A consumer is live while its workspace exists.
    pub async fn gc(&self, older_than: Duration, dry_run: bool) -> ConvoyResult<GcReport> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());

        // Held for the whole sweep so no put can resurrect a digest mid-removal
        let (mut guard, _lock) = self.writer().await?;

        let candidates: Vec<GcCandidate> = guard
            .objects
            .values()
            .filter(|o| o.last_accessed < cutoff)
            .filter(|o| !o.consumers.iter().any(|c| Path::new(c).exists()))
            .map(|o| GcCandidate {
                digest: o.digest.clone(),
                size_bytes: o.size_bytes,
                last_accessed: o.last_accessed,
                references: o.references.clone(),
            })
            .collect();

        let mut report = GcReport {
            dry_run,
            reclaimed_bytes: candidates.iter().map(|c| c.size_bytes).sum(),
            candidates,
            orphans_removed: 0,
        };

        if dry_run {
            return Ok(report);
        }

        let mut next = guard.clone();
        for candidate in &report.candidates {
            next.remove_object(&candidate.digest);
        }
        for object in next.objects.values_mut() {
            object.consumers.retain(|c| Path::new(c).exists());
        }
        self.commit(&mut guard, next).await?;

        for candidate in &report.candidates {
            let path = self.object_path(&candidate.digest);
            if let Err(e) = fs::remove_dir_all(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(error = %e, "Failed to remove object {}", path.display());
                }
            }
        }

        report.orphans_removed = self.sweep_orphans(&guard).await;
        self.sweep_staging().await;

        info!(
            removed = report.candidates.len(),
            bytes = report.reclaimed_bytes,
            orphans = report.orphans_removed,
            "Store garbage collection complete"
        );
        Ok(report)
    }

    /// Remove one object, named by digest, digest prefix or source reference,
    /// together with every reference bound to it.
    ///
    /// Workspaces that already materialized it keep their files.
    pub async fn remove(&self, key: &str) -> ConvoyResult<CacheObject> {
        let (mut guard, _lock) = self.writer().await?;
        let digest = guard.resolve(key)?;

        let mut next = guard.clone();
        let object = next
            .remove_object(&digest)
            .ok_or_else(|| ConvoyError::ObjectNotFound(key.to_string()))?;
        self.commit(&mut guard, next).await?;

        let path = self.object_path(&digest);
        if let Err(e) = fs::remove_dir_all(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "Failed to remove object {}", path.display());
            }
        }
        info!(digest = %digest, bytes = object.size_bytes, "Removed object");
        Ok(object)
    }

    /// Drop every object and binding and delete all stored content,
    /// including staging directories. Returns what was removed.
    pub async fn clear(&self) -> ConvoyResult<StoreStats> {
        let (mut guard, _lock) = self.writer().await?;
        let removed = stats_of(&guard);
        self.commit(&mut guard, IndexBody::default()).await?;

        for dir in [self.root.join(OBJECTS_DIR), self.root.join(TMP_DIR)] {
            match fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(ConvoyError::io(format!("removing {}", dir.display()), e))
                }
            }
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| ConvoyError::write(format!("creating {}", dir.display()), e))?;
        }

        info!(
            objects = removed.object_count,
            bytes = removed.total_size,
            "Cleared store"
        );
        Ok(removed)
    }

    /// Remove object directories the index does not reference
    async fn sweep_orphans(&self, index: &IndexBody) -> usize {
        let mut removed = 0;
        let Ok(mut shards) = fs::read_dir(self.root.join(OBJECTS_DIR)).await else {
            return 0;
        };

        while let Ok(Some(shard)) = shards.next_entry().await {
            let Ok(mut entries) = fs::read_dir(shard.path()).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let digest = entry.file_name().to_string_lossy().into_owned();
                if index.objects.contains_key(&digest) {
                    continue;
                }
                match fs::remove_dir_all(entry.path()).await {
                    Ok(()) => {
                        debug!("Removed orphaned object {}", digest);
                        removed += 1;
                    }
                    Err(e) => warn!(error = %e, "Failed to remove orphan {}", digest),
                }
            }
        }
        removed
    }

    /// Remove staging directories abandoned by interrupted puts
    async fn sweep_staging(&self) {
        let Ok(mut entries) = fs::read_dir(self.root.join(TMP_DIR)).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let stale = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| SystemTime::now().duration_since(modified).ok())
                .is_some_and(|age| age > STAGING_GRACE);
            if stale {
                remove_quietly(&entry.path()).await;
            }
        }
    }
}

fn stats_of(index: &IndexBody) -> StoreStats {
    StoreStats {
        total_size: index.objects.values().map(|o| o.size_bytes).sum(),
        object_count: index.objects.len(),
        reference_count: index.refs.len(),
    }
}

/// Apply the source's include/exclude patterns, then canonicalize
fn canonical_set(
    source: &SourceDescriptor,
    files: impl IntoIterator<Item = FileEntry>,
) -> ConvoyResult<CanonicalFileSet> {
    let filter = source.filter()?;
    if filter.is_empty() {
        return CanonicalFileSet::new(files);
    }
    // Paths that fail to normalize are kept so the set rejects them
    CanonicalFileSet::new(files.into_iter().filter(|file| {
        normalize_relative(&file.path).map_or(true, |path| filter.matches(&path))
    }))
}

async fn write_files(dir: &Path, set: &CanonicalFileSet) -> ConvoyResult<()> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| ConvoyError::write(format!("creating {}", dir.display()), e))?;

    for (relative, file) in &set.entries {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ConvoyError::write(format!("creating {}", parent.display()), e))?;
        }
        if let Some(target) = &file.link_target {
            create_symlink(target, &path)
                .await
                .map_err(|e| ConvoyError::write(format!("linking {}", path.display()), e))?;
            continue;
        }
        fs::write(&path, &file.contents)
            .await
            .map_err(|e| ConvoyError::write(format!("writing {}", path.display()), e))?;

        #[cfg(unix)]
        if file.executable {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(|e| ConvoyError::io(format!("chmod {}", path.display()), e))?;
        }
    }
    Ok(())
}

async fn remove_quietly(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir).await {
        debug!(error = %e, "Could not remove {}", dir.display());
    }
}
