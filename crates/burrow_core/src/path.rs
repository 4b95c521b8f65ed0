//! Collection identifier to file path resolution.

use std::path::{Path, PathBuf};

/// Suffix appended to relative collection identifiers.
pub const STORE_SUFFIX: &str = "db";

/// Resolves a logical collection identifier to its on-disk location.
///
/// A relative identifier lands under the bot's configuration directory with
/// the fixed `.db` suffix; an absolute identifier is used verbatim with no
/// suffix. Identifiers may contain path separators, so a plugin can group
/// its collections (`"polls/archive"`).
///
/// Resolution is a pure function of the configuration directory, identifier,
/// and mode - two identifiers resolving to the same path denote the same
/// physical collection.
#[derive(Debug, Clone)]
pub struct PathResolver {
    config_dir: PathBuf,
}

impl PathResolver {
    /// Creates a resolver rooted at `config_dir`.
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// Returns the configuration directory.
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Resolves `identifier` to a file path.
    #[must_use]
    pub fn resolve(&self, identifier: &str, absolute: bool) -> PathBuf {
        if absolute {
            PathBuf::from(identifier)
        } else {
            self.config_dir
                .join(format!("{identifier}.{STORE_SUFFIX}"))
        }
    }
}
