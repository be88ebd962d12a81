//! Single entry point routing listings and deletes to the backend serving a
//! location's scheme.
//!
//! Each backend sits in its own slot that moves through
//! `Uninitialized -> Initialized -> Closed`. A backend is built by the first call
//! routed to it and never before, so a router that only ever sees `file://`
//! locations never creates an S3 client. Closing the router closes exactly the
//! backends that were built.
//!
//! ```no_run
//! use futures::TryStreamExt;
//! use gc_files::FilesRouter;
//! use url::Url;
//!
//! # async fn run() -> gc_files::Result<()> {
//! let router = FilesRouter::builder()
//!     .put_property("s3.endpoint", "http://localhost:9000")
//!     .build();
//!
//! let base = Url::parse("s3://bucket/warehouse/").unwrap();
//! let files: Vec<_> = router.list_recursively(&base).await?.try_collect().await?;
//! let summary = router
//!     .delete_multiple(&base, futures::stream::iter(files))
//!     .await?;
//! println!("{summary}");
//!
//! router.close().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use common::Configuration;
use common::config::FilesystemConfig;
use futures::stream::{Stream, StreamExt};
use tokio::sync::Mutex;
use url::Url;

use crate::backend::{
    BackendKind, FileBackend, FileReferenceStream, ObjectStoreBackend, StoreProvider,
    TreeWalkBackend,
};
use crate::delete::{DeleteResult, DeleteSummary};
use crate::error::{Result, StorageError};
use crate::file_reference::{FileReference, ensure_trailing_slash};

/// Creates a backend the first time it is needed.
pub type BackendFactory = Box<dyn Fn() -> anyhow::Result<Arc<dyn FileBackend>> + Send + Sync>;

/// Lifecycle of one backend slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Uninitialized,
    Initialized,
    Closed,
}

enum SlotState {
    Uninitialized,
    Initialized(Arc<dyn FileBackend>),
    Closed,
}

struct BackendSlot {
    kind: BackendKind,
    factory: BackendFactory,
    state: Mutex<SlotState>,
}

impl BackendSlot {
    fn new(kind: BackendKind, factory: BackendFactory) -> Self {
        Self {
            kind,
            factory,
            state: Mutex::new(SlotState::Uninitialized),
        }
    }

    /// The backend, built now if this is the first use. A failed build leaves the
    /// slot uninitialized.
    async fn get(&self) -> Result<Arc<dyn FileBackend>> {
        let mut state = self.state.lock().await;
        match &*state {
            SlotState::Initialized(backend) => Ok(Arc::clone(backend)),
            SlotState::Closed => Err(StorageError::Closed),
            SlotState::Uninitialized => {
                let backend = (self.factory)().map_err(|source| StorageError::Setup {
                    backend: self.kind.name(),
                    source,
                })?;
                tracing::debug!(backend = %self.kind, "Instantiated storage backend");
                *state = SlotState::Initialized(Arc::clone(&backend));
                Ok(backend)
            }
        }
    }

    async fn state(&self) -> BackendState {
        match &*self.state.lock().await {
            SlotState::Uninitialized => BackendState::Uninitialized,
            SlotState::Initialized(_) => BackendState::Initialized,
            SlotState::Closed => BackendState::Closed,
        }
    }

    /// Move to `Closed`, releasing the backend if one was built.
    async fn close(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.state.lock().await, SlotState::Closed);
        match previous {
            SlotState::Initialized(backend) => {
                tracing::debug!(backend = %self.kind, "Closing storage backend");
                backend.close().await
            }
            SlotState::Uninitialized | SlotState::Closed => Ok(()),
        }
    }
}

/// Lists and deletes files under any supported location.
///
/// `s3` and `s3a` locations go to the object-store backend, everything else to
/// the tree-walk backend.
pub struct FilesRouter {
    object_store: BackendSlot,
    tree_walk: BackendSlot,
}

impl FilesRouter {
    pub fn builder() -> FilesRouterBuilder {
        FilesRouterBuilder::default()
    }

    pub fn from_config(config: &Configuration) -> Self {
        Self::builder()
            .properties(config.storage.properties.clone())
            .filesystem(config.filesystem.clone())
            .build()
    }

    fn slot(&self, kind: BackendKind) -> &BackendSlot {
        match kind {
            BackendKind::ObjectStore => &self.object_store,
            BackendKind::TreeWalk => &self.tree_walk,
        }
    }

    pub async fn backend_state(&self, kind: BackendKind) -> BackendState {
        self.slot(kind).state().await
    }

    /// List every file below `location`.
    ///
    /// `location` is treated as a directory: it gets a trailing `/` before any
    /// relative path is computed. The returned stream is lazy; drop it to release
    /// the underlying listing.
    pub async fn list_recursively(&self, location: &Url) -> Result<FileReferenceStream> {
        let base_path = ensure_trailing_slash(location.clone());
        let kind = BackendKind::for_location(&base_path);
        let backend = self.slot(kind).get().await?;

        tracing::debug!(location = %base_path, backend = %kind, "Listing files");
        backend.list_recursively(&base_path).await
    }

    /// Delete one file. Every failure, including an unusable backend, is reported
    /// as [`DeleteResult::Failure`].
    pub async fn delete(&self, file: &FileReference) -> DeleteResult {
        let location = file.absolute_path();
        match self.slot(BackendKind::for_location(location)).get().await {
            Ok(backend) => backend.delete(location).await,
            Err(e) => {
                tracing::debug!(location = %location, error = %e, "Failed to delete file");
                DeleteResult::Failure
            }
        }
    }

    /// Delete `files`, all located under `base_location`.
    ///
    /// Object-store locations use bulk deletes; other locations delete file by
    /// file. Item failures are counted in the summary. An error means the backend
    /// for `base_location` could not be used at all.
    pub async fn delete_multiple<'a, S>(
        &self,
        base_location: &Url,
        files: S,
    ) -> Result<DeleteSummary>
    where
        S: Stream<Item = FileReference> + Send + 'a,
    {
        let kind = BackendKind::for_location(base_location);
        let backend = self.slot(kind).get().await?;

        let locations = files.map(FileReference::into_absolute_path).boxed();
        let summary = backend.delete_multiple(locations).await;

        tracing::debug!(
            location = %base_location,
            backend = %kind,
            deleted = summary.deleted_count(),
            failed = summary.failed_count(),
            "Deleted files"
        );
        Ok(summary)
    }

    /// Close every backend that was built.
    ///
    /// Both backends are always attempted. If both fail the first error is
    /// returned. Closing again is a no-op.
    pub async fn close(&self) -> Result<()> {
        let object_store = self.object_store.close().await;
        let tree_walk = self.tree_walk.close().await;

        match (object_store, tree_walk) {
            (Err(first), Err(second)) => {
                tracing::warn!(error = %second, "Suppressed error while closing tree-walk backend");
                Err(first)
            }
            (first, second) => first.and(second),
        }
    }
}

impl fmt::Debug for FilesRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilesRouter").finish_non_exhaustive()
    }
}

/// Configures a [`FilesRouter`]. Settings are fixed once the router is built.
#[derive(Default)]
pub struct FilesRouterBuilder {
    properties: HashMap<String, String>,
    filesystem: FilesystemConfig,
    object_store_provider: Option<StoreProvider>,
    object_store_factory: Option<BackendFactory>,
    tree_walk_factory: Option<BackendFactory>,
}

impl FilesRouterBuilder {
    /// Replace all object-store client properties.
    pub fn properties(mut self, properties: HashMap<String, String>) -> Self {
        self.properties = properties;
        self
    }

    pub fn put_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn put_all_properties<I, K, V>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.properties
            .extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn filesystem(mut self, filesystem: FilesystemConfig) -> Self {
        self.filesystem = filesystem;
        self
    }

    /// Build object-store clients with `provider` instead of the S3 client.
    pub fn object_store_provider(mut self, provider: StoreProvider) -> Self {
        self.object_store_provider = Some(provider);
        self
    }

    /// Replace how the object-store backend is created.
    pub fn object_store_backend<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<Arc<dyn FileBackend>> + Send + Sync + 'static,
    {
        self.object_store_factory = Some(Box::new(factory));
        self
    }

    /// Replace how the tree-walk backend is created.
    pub fn tree_walk_backend<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<Arc<dyn FileBackend>> + Send + Sync + 'static,
    {
        self.tree_walk_factory = Some(Box::new(factory));
        self
    }

    pub fn build(self) -> FilesRouter {
        let object_store_factory = match self.object_store_factory {
            Some(factory) => factory,
            None => object_store_factory(self.properties, self.object_store_provider),
        };
        let tree_walk_factory = match self.tree_walk_factory {
            Some(factory) => factory,
            None => tree_walk_factory(self.filesystem),
        };

        FilesRouter {
            object_store: BackendSlot::new(BackendKind::ObjectStore, object_store_factory),
            tree_walk: BackendSlot::new(BackendKind::TreeWalk, tree_walk_factory),
        }
    }
}

fn object_store_factory(
    properties: HashMap<String, String>,
    provider: Option<StoreProvider>,
) -> BackendFactory {
    Box::new(move || -> anyhow::Result<Arc<dyn FileBackend>> {
        let backend = match &provider {
            Some(provider) => ObjectStoreBackend::with_provider(
                Arc::clone(provider),
                common::storage::delete_batch_size(&properties)?,
            ),
            None => ObjectStoreBackend::new(properties.clone())?,
        };
        Ok(Arc::new(backend))
    })
}

fn tree_walk_factory(filesystem: FilesystemConfig) -> BackendFactory {
    Box::new(move || -> anyhow::Result<Arc<dyn FileBackend>> {
        Ok(Arc::new(TreeWalkBackend::new(filesystem.clone())))
    })
}
