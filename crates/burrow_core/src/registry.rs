//! Bot-facing storage registry.
//!
//! The registry is what the rest of the bot talks to: plugins ask it for
//! named collections, and the hosting process drives periodic housekeeping
//! and graceful shutdown through it. The shared [`Environment`] is opened
//! lazily on the first tree open - first open wins, later callers share the
//! same instance.
//!
//! Maintenance calls absorb failures: a checkpoint or log-recycling error
//! is logged as a warning and the bot keeps running with a larger-than-ideal
//! log.

use crate::config::EnvConfig;
use crate::env::Environment;
use crate::error::StoreResult;
use crate::hash::HashStore;
use crate::path::PathResolver;
use crate::stats::EnvStats;
use crate::tree::TreeStore;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Opens collections and forwards environment maintenance.
pub struct Registry {
    resolver: PathResolver,
    config: EnvConfig,
    env: Mutex<Option<Arc<Environment>>>,
}

impl Registry {
    /// Creates a registry rooted at `config_dir`, with default environment
    /// options.
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self::with_config(config_dir, EnvConfig::default())
    }

    /// Creates a registry with explicit environment options.
    pub fn with_config(config_dir: impl Into<PathBuf>, config: EnvConfig) -> Self {
        Self {
            resolver: PathResolver::new(config_dir),
            config,
            env: Mutex::new(None),
        }
    }

    /// Returns the configuration directory.
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        self.resolver.config_dir()
    }

    /// Opens the unordered hash collection named `identifier`.
    ///
    /// Hash collections are independent files; they never touch the shared
    /// environment.
    pub fn open_hash(&self, identifier: &str, absolute: bool) -> StoreResult<HashStore> {
        HashStore::open(&self.resolver, identifier, absolute)
    }

    /// Opens the ordered tree collection named `identifier`.
    ///
    /// The shared environment is opened on first use.
    pub fn open_tree(&self, identifier: &str, absolute: bool) -> StoreResult<TreeStore> {
        let env = self.ensure_env()?;
        TreeStore::open(&env, identifier, absolute)
    }

    /// Returns the shared environment, opening it if this is the first use.
    pub fn ensure_env(&self) -> StoreResult<Arc<Environment>> {
        let mut slot = self.env.lock();
        if let Some(env) = slot.as_ref() {
            if env.is_open() {
                return Ok(Arc::clone(env));
            }
            // a shut-down environment is not reusable
            *slot = None;
        }

        let env = Environment::open(self.resolver.config_dir(), self.config.clone())?;
        *slot = Some(Arc::clone(&env));
        Ok(env)
    }

    /// Whether the shared environment has been opened.
    #[must_use]
    pub fn env_opened(&self) -> bool {
        self.env
            .lock()
            .as_ref()
            .is_some_and(|env| env.is_open())
    }

    /// Flushes committed tree state to the collection data files.
    ///
    /// Failures are logged and absorbed; a failed checkpoint only means
    /// more log volume accumulates.
    pub fn checkpoint(&self) {
        let Some(env) = self.env.lock().clone() else {
            return;
        };
        if let Err(e) = env.checkpoint() {
            warn!(error = %e, "checkpoint failed");
        }
    }

    /// Deletes log segments no longer needed for recovery.
    ///
    /// Returns the deleted segment paths; failures are logged and absorbed.
    pub fn recycle_logs(&self) -> Vec<String> {
        let Some(env) = self.env.lock().clone() else {
            return Vec::new();
        };
        match env.recycle_logs() {
            Ok(recycled) => recycled,
            Err(e) => {
                warn!(error = %e, "log recycling failed");
                Vec::new()
            }
        }
    }

    /// Best-effort diagnostic snapshot of the shared environment.
    ///
    /// `None` when no tree collection has been opened yet.
    #[must_use]
    pub fn stats(&self) -> Option<EnvStats> {
        self.env.lock().as_ref().map(|env| env.stats())
    }

    /// Shuts the shared environment down.
    ///
    /// Hash collections are unaffected - each one closes with its own
    /// handle. Failures are logged and absorbed; per the shutdown sequence,
    /// an environment with active transactions keeps its on-disk state.
    pub fn shutdown(&self) {
        let Some(env) = self.env.lock().take() else {
            debug!("no environment to shut down");
            return;
        };
        if let Err(e) = env.shutdown() {
            warn!(error = %e, "environment shutdown failed");
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("config_dir", &self.resolver.config_dir())
            .field("env_opened", &self.env_opened())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn environment_opens_lazily() {
        let dir = tempdir().unwrap();
        let registry = Registry::new(dir.path());
        assert!(!registry.env_opened());

        // hash collections never open the environment
        let cache = registry.open_hash("cache", false).unwrap();
        cache.set(b"k", b"v".to_vec()).unwrap();
        assert!(!registry.env_opened());

        let _tree = registry.open_tree("users", false).unwrap();
        assert!(registry.env_opened());
    }

    #[test]
    fn environment_is_shared_across_opens() {
        let dir = tempdir().unwrap();
        let registry = Registry::new(dir.path());

        let a = registry.open_tree("a", false).unwrap();
        let b = registry.open_tree("b", false).unwrap();

        a.set("k", b"from-a".to_vec()).unwrap();
        b.set("k", b"from-b".to_vec()).unwrap();

        let env = registry.ensure_env().unwrap();
        assert_eq!(env.stats().open_trees, 2);
    }

    #[test]
    fn maintenance_is_a_no_op_without_environment() {
        let dir = tempdir().unwrap();
        let registry = Registry::new(dir.path());

        registry.checkpoint();
        assert!(registry.recycle_logs().is_empty());
        assert!(registry.stats().is_none());
        registry.shutdown();
    }

    #[test]
    fn shutdown_then_reopen_recovers() {
        let dir = tempdir().unwrap();
        let registry = Registry::new(dir.path());

        let users = registry.open_tree("users", false).unwrap();
        users.set("alice", b"admin".to_vec()).unwrap();
        registry.shutdown();
        assert!(!registry.env_opened());

        // the next open behaves like a fresh process
        let users = registry.open_tree("users", false).unwrap();
        assert_eq!(users.get("alice").unwrap(), Some(b"admin".to_vec()));
    }

    #[test]
    fn stats_come_from_the_live_environment() {
        let dir = tempdir().unwrap();
        let registry = Registry::new(dir.path());

        let tree = registry.open_tree("t", false).unwrap();
        tree.set("a", b"1".to_vec()).unwrap();

        let stats = registry.stats().unwrap();
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.open_trees, 1);
    }
}
