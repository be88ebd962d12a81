//! Storage backends able to list and delete files below a base location.

pub mod object_store;
pub mod tree_walk;

use std::fmt;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use url::Url;

use crate::delete::{DeleteResult, DeleteSummary};
use crate::error::Result;
use crate::file_reference::FileReference;

pub use self::object_store::{ObjectStoreBackend, StoreProvider, store_provider};
pub use self::tree_walk::TreeWalkBackend;

/// Lazy, single-pass listing.
///
/// Each poll performs only the I/O needed for the next reference. A traversal
/// failure is yielded as an `Err` item and ends the stream. Dropping the stream
/// releases whatever the backend holds open for it.
pub type FileReferenceStream = BoxStream<'static, Result<FileReference>>;

/// Operations every storage backend provides.
#[async_trait]
pub trait FileBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// List every regular file below `base_path`, which ends with `/`.
    ///
    /// Returns an error only if the listing cannot start at all.
    async fn list_recursively(&self, base_path: &Url) -> Result<FileReferenceStream>;

    /// Delete one object. Failures are logged and reported as
    /// [`DeleteResult::Failure`], never returned as errors.
    async fn delete(&self, location: &Url) -> DeleteResult;

    /// Delete many objects, best effort.
    ///
    /// Without a bulk primitive this is the fold of [`FileBackend::delete`] over
    /// all locations.
    async fn delete_multiple(&self, locations: BoxStream<'_, Url>) -> DeleteSummary {
        delete_each(self, locations).await
    }

    /// Release clients and handles. Called at most once.
    async fn close(&self) -> Result<()>;
}

/// Delete `locations` one by one and fold the outcomes into one summary.
pub async fn delete_each<B>(backend: &B, locations: BoxStream<'_, Url>) -> DeleteSummary
where
    B: FileBackend + ?Sized,
{
    locations
        .fold(DeleteSummary::EMPTY, |summary, location| async move {
            summary + backend.delete(&location).await
        })
        .await
}

/// Which backend serves a location, decided by its scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// `s3` and `s3a` locations, served with native bulk deletes.
    ObjectStore,
    /// Everything else, served by walking a directory tree.
    TreeWalk,
}

impl BackendKind {
    pub fn for_location(location: &Url) -> Self {
        match location.scheme() {
            "s3" | "s3a" => BackendKind::ObjectStore,
            _ => BackendKind::TreeWalk,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BackendKind::ObjectStore => "object-store",
            BackendKind::TreeWalk => "tree-walk",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
