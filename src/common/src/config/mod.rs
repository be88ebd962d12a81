use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Default configuration file picked up by [`Configuration::load`].
pub const CONFIG_FILE: &str = "gc-files.toml";

/// Prefix of environment variables overriding the configuration.
pub const ENV_PREFIX: &str = "GC_FILES__";

/// Object-store client properties.
///
/// A flat string mapping handed unchanged to the object-store backend. Keys follow
/// the Iceberg `S3FileIO` names (`s3.endpoint`, `s3.access-key-id`, ...) or the
/// `object_store` S3 config key names.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct StorageConfig {
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

/// Settings of the tree-walking filesystem backend.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct FilesystemConfig {
    /// Yield symbolic links that point at regular files. Symlinked directories are
    /// never traversed.
    ///
    /// Off by default, so symlinked files are left out of listings. This differs
    /// from Hadoop's local filesystem, which follows links and lists their
    /// targets; enable it to get the same set of files for links to regular files.
    #[serde(default)]
    pub follow_symlinks: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct Configuration {
    /// Object storage client properties
    #[serde(default)]
    pub storage: StorageConfig,
    /// Local filesystem settings
    #[serde(default)]
    pub filesystem: FilesystemConfig,
}

impl Configuration {
    /// Load defaults, then `gc-files.toml` from the working directory, then
    /// `GC_FILES__*` environment variables.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::load_from(CONFIG_FILE)
    }

    /// Same layering as [`Configuration::load`] with an explicit TOML file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.storage.properties.insert(key.into(), value.into());
        self
    }
}
