//! Placing cached objects into workspaces
//!
//! Every file is hard-linked when the filesystem allows it and byte-copied
//! otherwise. The fallback is decided by trying the link, not by inspecting
//! the platform: network and cross-device mounts refuse links even where the
//! OS supports them. Once a link fails, the rest of that tree is copied.
//! Symlinks are recreated with the same target rather than followed.

use crate::error::{ConvoyError, ConvoyResult};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Outcome of materializing one object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    /// Regular files placed (`linked + copied`)
    pub files: usize,
    pub linked: usize,
    pub copied: usize,
    pub symlinks: usize,
}

/// How a single file was placed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Linked,
    Copied,
}

/// Hard-link with copy fallback, remembering when links stop working
#[derive(Debug)]
pub struct LinkOrCopy {
    try_link: bool,
}

impl Default for LinkOrCopy {
    fn default() -> Self {
        Self { try_link: true }
    }
}

impl LinkOrCopy {
    /// Strategy that never attempts links
    pub fn copy_only() -> Self {
        Self { try_link: false }
    }

    /// Place `src` at `dest`, replacing anything already there
    pub async fn place(&mut self, src: &Path, dest: &Path) -> io::Result<Placement> {
        match fs::remove_file(dest).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        if self.try_link {
            match fs::hard_link(src, dest).await {
                Ok(()) => return Ok(Placement::Linked),
                Err(e) => {
                    debug!(
                        error = %e,
                        "Hard link {} -> {} failed, copying instead",
                        src.display(),
                        dest.display()
                    );
                    self.try_link = false;
                }
            }
        }

        fs::copy(src, dest).await?;
        Ok(Placement::Copied)
    }
}

/// Place every file under `source_root` at the same relative path under `dest_root`
pub async fn materialize_tree(
    source_root: &Path,
    dest_root: &Path,
    strategy: &mut LinkOrCopy,
) -> ConvoyResult<MaterializeReport> {
    let mut report = MaterializeReport::default();
    let mut pending = vec![PathBuf::new()];

    fs::create_dir_all(dest_root)
        .await
        .map_err(|e| ConvoyError::write(format!("creating {}", dest_root.display()), e))?;

    while let Some(relative) = pending.pop() {
        let dir = source_root.join(&relative);
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| ConvoyError::io(format!("reading object dir {}", dir.display()), e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ConvoyError::io(format!("reading entry in {}", dir.display()), e))?
        {
            let child = relative.join(entry.file_name());
            let target = dest_root.join(&child);
            let file_type = entry.file_type().await.map_err(|e| {
                ConvoyError::io(format!("inspecting {}", entry.path().display()), e)
            })?;

            if file_type.is_symlink() {
                recreate_symlink(&entry.path(), &target).await?;
                report.symlinks += 1;
                continue;
            }
            if file_type.is_dir() {
                fs::create_dir_all(&target).await.map_err(|e| {
                    ConvoyError::write(format!("creating {}", target.display()), e)
                })?;
                pending.push(child);
                continue;
            }

            let placement = strategy
                .place(&entry.path(), &target)
                .await
                .map_err(|e| ConvoyError::write(format!("placing {}", target.display()), e))?;
            report.files += 1;
            match placement {
                Placement::Linked => report.linked += 1,
                Placement::Copied => report.copied += 1,
            }
        }
    }

    Ok(report)
}

async fn recreate_symlink(src: &Path, dest: &Path) -> ConvoyResult<()> {
    let link = fs::read_link(src)
        .await
        .map_err(|e| ConvoyError::io(format!("reading link {}", src.display()), e))?;
    match fs::remove_file(dest).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(ConvoyError::io(format!("replacing {}", dest.display()), e)),
    }
    create_symlink(&link, dest)
        .await
        .map_err(|e| ConvoyError::write(format!("linking {}", dest.display()), e))
}

/// Create `link` pointing at `target`
#[cfg(unix)]
pub(crate) async fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    fs::symlink(target, link).await
}

#[cfg(not(unix))]
pub(crate) async fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!(
            "cannot create symlink {} -> {} on this platform",
            link.display(),
            target.display()
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seed(dir: &Path) {
        std::fs::create_dir_all(dir.join("nested/deep")).unwrap();
        std::fs::write(dir.join("main.tf"), "root").unwrap();
        std::fs::write(dir.join("nested/deep/leaf.txt"), "leaf").unwrap();
    }

    #[tokio::test]
    async fn materializes_nested_tree() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dest = temp.path().join("dest");
        seed(&src);

        let report = materialize_tree(&src, &dest, &mut LinkOrCopy::default())
            .await
            .unwrap();

        assert_eq!(report.files, 2);
        assert_eq!(report.linked + report.copied, 2);
        assert_eq!(std::fs::read_to_string(dest.join("main.tf")).unwrap(), "root");
        assert_eq!(
            std::fs::read_to_string(dest.join("nested/deep/leaf.txt")).unwrap(),
            "leaf"
        );
    }

    #[tokio::test]
    async fn copy_only_never_links() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dest = temp.path().join("dest");
        seed(&src);

        let report = materialize_tree(&src, &dest, &mut LinkOrCopy::copy_only())
            .await
            .unwrap();

        assert_eq!(report.copied, 2);
        assert_eq!(report.linked, 0);
    }

    #[tokio::test]
    async fn link_failure_falls_back_to_copy() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src.txt");
        std::fs::write(&src, "data").unwrap();
        let dest = temp.path().join("dest.txt");

        // A directory as link source makes hard_link fail on every platform
        let dir_src = temp.path().join("a-dir");
        std::fs::create_dir(&dir_src).unwrap();
        let mut strategy = LinkOrCopy::default();
        assert!(strategy.place(&dir_src, &dest).await.is_err());
        assert!(!strategy.try_link);

        // Subsequent placements copy without error
        let placement = strategy.place(&src, &dest).await.unwrap();
        assert_eq!(placement, Placement::Copied);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "data");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinks_are_recreated_not_followed() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dest = temp.path().join("dest");
        seed(&src);
        std::os::unix::fs::symlink("main.tf", src.join("link.tf")).unwrap();

        let report = materialize_tree(&src, &dest, &mut LinkOrCopy::default())
            .await
            .unwrap();
        assert_eq!(report.files, 2);
        assert_eq!(report.symlinks, 1);
        assert_eq!(
            std::fs::read_link(dest.join("link.tf")).unwrap(),
            PathBuf::from("main.tf")
        );

        // Materializing again replaces the existing link
        let again = materialize_tree(&src, &dest, &mut LinkOrCopy::copy_only())
            .await
            .unwrap();
        assert_eq!(again.symlinks, 1);
        assert_eq!(std::fs::read_to_string(dest.join("link.tf")).unwrap(), "root");
    }

    #[tokio::test]
    async fn replaces_existing_files() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dest = temp.path().join("dest");
        seed(&src);
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("main.tf"), "stale").unwrap();

        materialize_tree(&src, &dest, &mut LinkOrCopy::default())
            .await
            .unwrap();
        materialize_tree(&src, &dest, &mut LinkOrCopy::default())
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(dest.join("main.tf")).unwrap(), "root");
    }
}
