//! # burrow core
//!
//! Embedded transactional key-value storage for an IRC bot's plugin state.
//!
//! Plugins keep their durable state (configuration, per-user records, poll
//! archives, caches) in named collections instead of managing files
//! themselves. Two collection flavors are provided:
//!
//! - [`HashStore`] - an unordered map, one independent file per identifier,
//!   no shared state with anything else
//! - [`TreeStore`] - an ordered map with case-insensitive keys, opened under
//!   the shared transactional [`Environment`]
//!
//! The [`Environment`] owns the write-ahead log, crash recovery, checkpoint
//! and log recycling, and the orderly shutdown sequence. The hosting process
//! usually works through the [`Registry`] facade, which opens the
//! environment lazily and absorbs maintenance failures:
//!
//! ```rust,ignore
//! use burrow_core::Registry;
//!
//! let registry = Registry::new("/home/bot/.bot");
//! let users = registry.open_tree("users", false)?;
//! users.set("Alice", b"admin".to_vec())?;
//! assert_eq!(users.get("alice")?, Some(b"admin".to_vec()));
//!
//! // periodic housekeeping
//! registry.checkpoint();
//! let recycled = registry.recycle_logs();
//!
//! // graceful shutdown
//! registry.shutdown();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod env;
mod error;
mod fold;
mod frame;
mod fsutil;
mod hash;
mod log;
mod path;
mod registry;
mod stats;
mod tree;
mod txn;
mod typed;
mod types;

pub use config::{EnvConfig, LOG_BUFFER_SIZE};
pub use env::Environment;
pub use error::{StoreError, StoreResult};
pub use fold::KeyFold;
pub use hash::{HashIter, HashStore};
pub use path::{PathResolver, STORE_SUFFIX};
pub use registry::Registry;
pub use stats::EnvStats;
pub use tree::{TreeIter, TreeStore};
pub use txn::Transaction;
pub use typed::{TypedHash, TypedTree};
pub use types::{Sequence, TxnId};
