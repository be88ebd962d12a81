use std::path::PathBuf;

/// Failure that keeps a listing or delete operation from running at all.
///
/// Item-level failures never surface here: deletes report them as
/// [`DeleteResult::Failure`](crate::DeleteResult) or in
/// [`DeleteSummary::failed_count`](crate::DeleteSummary::failed_count).
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid location '{location}': {reason}")]
    InvalidLocation { location: String, reason: String },

    #[error("No filesystem available for scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("Failed to initialize {backend} backend")]
    Setup {
        backend: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot express '{location}' relative to '{base}'")]
    Relativize { location: String, base: String },

    #[error("Files router is closed")]
    Closed,

    #[error("Failed to close {backend} backend: {message}")]
    Close {
        backend: &'static str,
        message: String,
    },
}

impl StorageError {
    pub fn invalid_location(location: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidLocation {
            location: location.to_string(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = StorageError> = std::result::Result<T, E>;
