//! Backend walking a hierarchical filesystem, one directory entry at a time.

use std::io;
use std::path::PathBuf;

use async_stream::try_stream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::config::FilesystemConfig;
use futures::stream::{Stream, StreamExt};
use tokio::fs::{self, ReadDir};
use url::Url;

use super::{BackendKind, FileBackend, FileReferenceStream};
use crate::delete::DeleteResult;
use crate::error::{Result, StorageError};
use crate::file_reference::FileReference;

/// Lists by depth-first directory walk and deletes file by file.
///
/// There is no bulk primitive, so `delete_multiple` is the trait's per-item fold.
pub struct TreeWalkBackend {
    config: FilesystemConfig,
}

impl TreeWalkBackend {
    pub fn new(config: FilesystemConfig) -> Self {
        Self { config }
    }

    /// Map a location onto the filesystem serving its scheme.
    fn resolve_path(location: &Url) -> Result<PathBuf> {
        match location.scheme() {
            "file" => location
                .to_file_path()
                .map_err(|()| StorageError::invalid_location(location, "not a local file path")),
            other => Err(StorageError::UnsupportedScheme(other.to_string())),
        }
    }

    async fn try_delete(&self, location: &Url) -> Result<()> {
        let path = Self::resolve_path(location)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| StorageError::io(&path, e))
    }
}

#[async_trait]
impl FileBackend for TreeWalkBackend {
    fn name(&self) -> &'static str {
        BackendKind::TreeWalk.name()
    }

    async fn list_recursively(&self, base_path: &Url) -> Result<FileReferenceStream> {
        let root = Self::resolve_path(base_path)?;
        let listing = walk_files(root, base_path.clone(), self.config.follow_symlinks);
        Ok(listing.boxed())
    }

    async fn delete(&self, location: &Url) -> DeleteResult {
        match self.try_delete(location).await {
            Ok(()) => DeleteResult::Success,
            Err(e) => {
                tracing::debug!(location = %location, error = %e, "Failed to delete file");
                DeleteResult::Failure
            }
        }
    }

    async fn close(&self) -> Result<()> {
        tracing::debug!("Closed filesystem backend");
        Ok(())
    }
}

/// Depth-first walk below `root` yielding regular files only.
///
/// Nothing is read until the stream is polled. A missing root is an empty tree.
/// Failing to open or read a directory ends the stream with an error; an entry
/// whose metadata cannot be read (e.g. deleted concurrently) is skipped.
fn walk_files(
    root: PathBuf,
    base_path: Url,
    follow_symlinks: bool,
) -> impl Stream<Item = Result<FileReference>> + Send + 'static {
    try_stream! {
        let mut pending: Vec<(PathBuf, ReadDir)> = Vec::new();
        match fs::read_dir(&root).await {
            Ok(read_dir) => pending.push((root.clone(), read_dir)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %root.display(), "Base location does not exist");
            }
            Err(e) => Err(StorageError::io(&root, e))?,
        }

        while let Some((dir, read_dir)) = pending.last_mut() {
            let next = read_dir
                .next_entry()
                .await
                .map_err(|e| StorageError::io(dir.clone(), e))?;
            let Some(entry) = next else {
                pending.pop();
                continue;
            };

            let path = entry.path();
            let file_type = match entry.file_type().await {
                Ok(file_type) => file_type,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Skipping entry");
                    continue;
                }
            };

            if file_type.is_dir() {
                match fs::read_dir(&path).await {
                    Ok(read_dir) => pending.push((path, read_dir)),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        tracing::debug!(path = %path.display(), "Directory vanished during walk");
                    }
                    Err(e) => Err(StorageError::io(&path, e))?,
                }
                continue;
            }

            let metadata = if file_type.is_file() {
                entry.metadata().await
            } else if file_type.is_symlink() && follow_symlinks {
                fs::metadata(&path).await
            } else {
                continue;
            };
            let metadata = match metadata {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "No metadata");
                    continue;
                }
            };

            let last_modified = metadata
                .modified()
                .map(|modified| DateTime::<Utc>::from(modified).timestamp_millis())
                .unwrap_or(0);
            let location = Url::from_file_path(&path).map_err(|()| {
                StorageError::invalid_location(path.display(), "not an absolute path")
            })?;

            yield FileReference::relativize(&base_path, &location, last_modified)?;
        }
    }
}
