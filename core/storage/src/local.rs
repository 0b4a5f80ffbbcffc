//! Plain local filesystem folder addressed by drive paths.
//!
//! Used as the on-disk mirror target for drive subtrees and as the file
//! layer of the disk drive backend.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::drive::DriveEntry;
use pearl_common::{DrivePath, Error, Result};

/// Local directory whose files are addressed with [`DrivePath`]s.
#[derive(Debug, Clone)]
pub struct LocalFolder {
    root: PathBuf,
}

impl LocalFolder {
    /// Wrap `root`. The directory is created lazily on first write.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Convert a drive path to a filesystem path under the root.
    pub fn to_fs_path(&self, path: &DrivePath) -> PathBuf {
        let mut fs_path = self.root.clone();
        for component in path.components() {
            fs_path.push(component);
        }
        fs_path
    }

    fn entry_from_meta(path: DrivePath, meta: &std::fs::Metadata) -> DriveEntry {
        let modified: DateTime<Utc> = meta
            .modified()
            .map(|t| t.into())
            .unwrap_or_else(|_| Utc::now());
        DriveEntry {
            path,
            size: meta.len(),
            modified,
        }
    }

    /// Write a file, creating parent directories as needed.
    pub async fn write(&self, path: &DrivePath, data: &[u8]) -> Result<()> {
        if path.is_root() {
            return Err(Error::Validation("Cannot write to the folder root".to_string()));
        }
        let fs_path = self.to_fs_path(path);
        if let Some(parent) = fs_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&fs_path, data).await?;
        Ok(())
    }

    /// Read a file; `Ok(None)` if absent.
    pub async fn read(&self, path: &DrivePath) -> Result<Option<Vec<u8>>> {
        let fs_path = self.to_fs_path(path);
        match fs::read(&fs_path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) if fs_path.is_dir() => Err(Error::Validation(format!(
                "Cannot read directory {}: {}",
                path, e
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Metadata for a file; `Ok(None)` if absent or a directory.
    pub async fn entry(&self, path: &DrivePath) -> Result<Option<DriveEntry>> {
        match fs::metadata(self.to_fs_path(path)).await {
            Ok(meta) if meta.is_file() => Ok(Some(Self::entry_from_meta(path.clone(), &meta))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a file.
    ///
    /// # Errors
    /// - `Error::NotFound` if absent
    pub async fn remove(&self, path: &DrivePath) -> Result<()> {
        match fs::remove_file(self.to_fs_path(path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("File not found: {}", path)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Files under `dir`, direct children only unless `recursive`.
    /// A missing directory lists as empty.
    pub async fn list(&self, dir: &DrivePath, recursive: bool) -> Result<Vec<DriveEntry>> {
        let mut results = Vec::new();
        let mut pending = vec![dir.clone()];

        while let Some(current) = pending.pop() {
            let mut reader = match fs::read_dir(self.to_fs_path(&current)).await {
                Ok(reader) => reader,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(item) = reader.next_entry().await? {
                let Ok(name) = item.file_name().into_string() else {
                    continue;
                };
                let Ok(child) = current.join(&name) else {
                    continue;
                };
                let meta = item.metadata().await?;
                if meta.is_dir() {
                    if recursive {
                        pending.push(child);
                    }
                } else if meta.is_file() {
                    results.push(Self::entry_from_meta(child, &meta));
                }
            }
        }

        results.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(results)
    }

    /// Remove empty directories beneath `dir` (not `dir` itself).
    pub async fn prune_empty_dirs(&self, dir: &DrivePath) -> Result<()> {
        let mut dirs = Vec::new();
        let mut pending = vec![dir.clone()];
        while let Some(current) = pending.pop() {
            let mut reader = match fs::read_dir(self.to_fs_path(&current)).await {
                Ok(reader) => reader,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(item) = reader.next_entry().await? {
                if item.metadata().await?.is_dir() {
                    if let Some(child) = item
                        .file_name()
                        .to_str()
                        .and_then(|name| current.join(name).ok())
                    {
                        dirs.push(child.clone());
                        pending.push(child);
                    }
                }
            }
        }

        // Deepest first so parents empty out before they are checked.
        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().len()));
        for child in dirs {
            // Non-empty directories fail to remove; that is the check.
            let _ = fs::remove_dir(self.to_fs_path(&child)).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn path(p: &str) -> DrivePath {
        DrivePath::parse(p).unwrap()
    }

    #[tokio::test]
    async fn test_write_creates_parents() {
        let temp = TempDir::new().unwrap();
        let folder = LocalFolder::new(temp.path().join("export"));

        folder.write(&path("/notes/a.md"), b"hello").await.unwrap();

        let on_disk = std::fs::read(temp.path().join("export/notes/a.md")).unwrap();
        assert_eq!(on_disk, b"hello");
        assert_eq!(folder.read(&path("/notes/a.md")).await.unwrap().unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let temp = TempDir::new().unwrap();
        let folder = LocalFolder::new(temp.path());
        assert!(folder.read(&path("/nope.md")).await.unwrap().is_none());
        assert!(folder.entry(&path("/nope.md")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let folder = LocalFolder::new(temp.path());
        let err = folder.remove(&path("/gone.md")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_direct_and_recursive() {
        let temp = TempDir::new().unwrap();
        let folder = LocalFolder::new(temp.path());
        folder.write(&path("/notes/a.md"), b"a").await.unwrap();
        folder.write(&path("/notes/sub/b.md"), b"b").await.unwrap();

        let direct = folder.list(&path("/notes"), false).await.unwrap();
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].path, path("/notes/a.md"));

        let all = folder.list(&path("/notes"), true).await.unwrap();
        assert_eq!(all.len(), 2);

        assert!(folder.list(&path("/missing"), true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prune_empty_dirs() {
        let temp = TempDir::new().unwrap();
        let folder = LocalFolder::new(temp.path());
        folder.write(&path("/notes/deep/er/a.md"), b"a").await.unwrap();
        folder.write(&path("/notes/keep/b.md"), b"b").await.unwrap();
        folder.remove(&path("/notes/deep/er/a.md")).await.unwrap();

        folder.prune_empty_dirs(&path("/notes")).await.unwrap();

        assert!(!temp.path().join("notes/deep").exists());
        assert!(temp.path().join("notes/keep/b.md").exists());
        assert!(temp.path().join("notes").exists());
    }
}
