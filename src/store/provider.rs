//! Source providers populate the store on a cache miss
//!
//! Fetching remote sources (git, HTTP, registries) is the caller's concern;
//! the engine only needs something that can fill a directory for a given
//! source. The crate ships a provider for sources that live on the local
//! filesystem.

use crate::error::{ConvoyError, ConvoyResult};
use crate::store::materialize::{materialize_tree, LinkOrCopy};
use crate::store::source::{normalize_origin, SourceDescriptor};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Fills `dest` with the files behind `source`
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Fetch the source into an empty staging directory
    async fn fetch(&self, source: &SourceDescriptor, dest: &Path) -> ConvoyResult<()>;
}

/// Copies sources from directories on the local filesystem.
///
/// Origins may be absolute paths, paths relative to `base_dir`, or
/// `file://` URIs. The version is recorded in the reference but does not
/// select anything on disk.
#[derive(Debug, Clone)]
pub struct LocalSourceProvider {
    base_dir: PathBuf,
}

impl LocalSourceProvider {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn resolve(&self, source: &SourceDescriptor) -> ConvoyResult<PathBuf> {
        let origin = normalize_origin(&source.origin);
        let path = match origin.strip_prefix("file://") {
            Some(rest) => PathBuf::from(rest),
            None if origin.contains("://") || origin.contains("::") => {
                return Err(ConvoyError::UnsupportedSource(source.reference()))
            }
            None => PathBuf::from(origin),
        };

        Ok(if path.is_absolute() {
            path
        } else {
            self.base_dir.join(path)
        })
    }
}

#[async_trait]
impl SourceProvider for LocalSourceProvider {
    async fn fetch(&self, source: &SourceDescriptor, dest: &Path) -> ConvoyResult<()> {
        let path = self.resolve(source)?;
        if !path.is_dir() {
            return Err(ConvoyError::ReferenceNotFound(format!(
                "{} ({} is not a directory)",
                source.reference(),
                path.display()
            )));
        }

        debug!("Copying local source {} into {}", path.display(), dest.display());
        materialize_tree(&path, dest, &mut LinkOrCopy::copy_only()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn fetches_relative_origin() {
        let temp = TempDir::new().unwrap();
        let module = temp.path().join("modules").join("vpc");
        std::fs::create_dir_all(&module).unwrap();
        std::fs::write(module.join("main.tf"), "vpc").unwrap();

        let provider = LocalSourceProvider::new(temp.path());
        let dest = temp.path().join("staging");
        provider
            .fetch(&SourceDescriptor::new("modules/vpc", Some("1.0.0")), &dest)
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(dest.join("main.tf")).unwrap(), "vpc");
    }

    #[tokio::test]
    async fn fetches_file_uri() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("chart.yaml"), "name: app").unwrap();

        let provider = LocalSourceProvider::new("/nonexistent-base");
        let origin = format!("FILE://{}", temp.path().display());
        let out = TempDir::new().unwrap();
        let dest = out.path().join("staging");
        provider
            .fetch(&SourceDescriptor::new(origin, None), &dest)
            .await
            .unwrap();

        assert!(dest.join("chart.yaml").exists());
    }

    #[tokio::test]
    async fn rejects_remote_origins() {
        let temp = TempDir::new().unwrap();
        let provider = LocalSourceProvider::new(temp.path());
        let err = provider
            .fetch(
                &SourceDescriptor::new("git::https://github.com/org/repo", Some("v1.0.0")),
                &temp.path().join("out"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConvoyError::UnsupportedSource(_)));
    }

    #[tokio::test]
    async fn missing_directory_is_reference_not_found() {
        let temp = TempDir::new().unwrap();
        let provider = LocalSourceProvider::new(temp.path());
        let err = provider
            .fetch(&SourceDescriptor::new("missing", None), &temp.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConvoyError::ReferenceNotFound(_)));
    }
}
