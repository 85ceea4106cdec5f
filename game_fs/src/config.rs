use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config read failed ({}): {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("config parse failed: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings a host hands to [`Filesystem::new`](crate::Filesystem::new).
///
/// ```toml
/// root_dir = "/opt/games/quake"
/// max_open_descriptors = 64
/// allow_direct_paths = false
/// skip_archived_wads = false
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FsConfig {
    /// Base for direct-path lookups and relative game directories.
    pub root_dir: PathBuf,
    /// Upper bound on OS descriptors held at once; `None` means unlimited.
    pub max_open_descriptors: Option<usize>,
    pub allow_direct_paths: bool,
    /// Default for archives mounted through a game directory.
    pub skip_archived_wads: bool,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            max_open_descriptors: None,
            allow_direct_paths: false,
            skip_archived_wads: false,
        }
    }
}

impl FsConfig {
    pub fn parse_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Loads a config file; a relative `root_dir` is taken relative to the
    /// file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse_toml(&text)?;
        if config.root_dir.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            config.root_dir = base.join(&config.root_dir);
        }
        Ok(config)
    }
}
