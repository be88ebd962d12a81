//! Names of listed objects, relative to the location they were listed from.

use std::fmt;

use chrono::{DateTime, Utc};
use url::Url;

use crate::error::{Result, StorageError};

/// One object found below a base location.
///
/// `base_path` always ends with `/` and `relative_path` never starts with one, so
/// `base_path.join(relative_path)` is the object's absolute location. The absolute
/// location is resolved once, when the reference is created.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileReference {
    relative_path: String,
    base_path: Url,
    absolute_path: Url,
    last_modified_millis: i64,
}

impl FileReference {
    /// Create a reference, normalizing `base_path` to end with a separator.
    ///
    /// Fails if `relative_path` is empty, starts with a separator, or resolves to a
    /// location outside of `base_path`.
    pub fn new(
        relative_path: impl Into<String>,
        base_path: Url,
        last_modified_millis: i64,
    ) -> Result<Self> {
        let relative_path = relative_path.into();
        let base_path = ensure_trailing_slash(base_path);

        if relative_path.is_empty() {
            return Err(StorageError::invalid_location(
                &base_path,
                "relative path must not be empty",
            ));
        }
        if relative_path.starts_with('/') {
            return Err(StorageError::invalid_location(
                &relative_path,
                "relative path must not start with '/'",
            ));
        }

        let absolute_path = base_path
            .join(&relative_path)
            .map_err(|e| StorageError::invalid_location(&relative_path, e.to_string()))?;
        if !absolute_path.as_str().starts_with(base_path.as_str()) {
            return Err(StorageError::invalid_location(
                &relative_path,
                format!("resolves outside of {base_path}"),
            ));
        }

        Ok(Self {
            relative_path,
            base_path,
            absolute_path,
            last_modified_millis,
        })
    }

    /// Reference for `location`, expressed relative to `base_path`.
    ///
    /// `base_path` must already end with a separator.
    pub(crate) fn relativize(
        base_path: &Url,
        location: &Url,
        last_modified_millis: i64,
    ) -> Result<Self> {
        let Some(relative) = base_path.make_relative(location) else {
            return Err(StorageError::Relativize {
                location: location.to_string(),
                base: base_path.to_string(),
            });
        };

        Self::new(
            escape_leading_colon(relative),
            base_path.clone(),
            last_modified_millis,
        )
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn base_path(&self) -> &Url {
        &self.base_path
    }

    pub fn absolute_path(&self) -> &Url {
        &self.absolute_path
    }

    pub fn into_absolute_path(self) -> Url {
        self.absolute_path
    }

    pub fn last_modified_millis(&self) -> i64 {
        self.last_modified_millis
    }

    /// Modification time, if the timestamp is representable.
    pub fn modification_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.last_modified_millis)
    }
}

impl fmt::Display for FileReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.absolute_path)
    }
}

/// Append a trailing `/` to the path of `url` unless it already has one.
pub fn ensure_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

// "a:b" would otherwise be parsed as a URL with scheme "a" when joined to the base.
fn escape_leading_colon(relative: String) -> String {
    let first_segment_end = relative.find('/').unwrap_or(relative.len());
    if !relative[..first_segment_end].contains(':') {
        return relative;
    }
    let (head, tail) = relative.split_at(first_segment_end);
    format!("{}{}", head.replace(':', "%3A"), tail)
}
