//! File listing and deletion for table garbage collection.
//!
//! [`FilesRouter`] is the single entry point. It lists every file below a
//! location and deletes files one at a time or in bulk, picking the backend from
//! the location's scheme: `s3`/`s3a` locations use the object-store backend with
//! batched deletes, everything else walks a directory tree.

pub mod backend;
pub mod delete;
pub mod error;
pub mod file_reference;
pub mod router;

pub use backend::{
    BackendKind, FileBackend, FileReferenceStream, ObjectStoreBackend, StoreProvider,
    TreeWalkBackend, store_provider,
};
pub use delete::{DeleteResult, DeleteSummary};
pub use error::{Result, StorageError};
pub use file_reference::{FileReference, ensure_trailing_slash};
pub use router::{BackendFactory, BackendState, FilesRouter, FilesRouterBuilder};
