//! # burrow storage
//!
//! Byte-store backends for the burrow embedded database.
//!
//! A [`Backend`] is an opaque, append-oriented byte store. It knows nothing
//! about log records, snapshots, or collections - the `burrow_core` crate
//! owns all format interpretation. Backends only promise that bytes appended
//! at an offset can be read back from that offset, and that `flush`/`sync`
//! make them durable.
//!
//! Two implementations are provided:
//!
//! - [`FileBackend`] - persistent storage over OS file APIs
//! - [`MemoryBackend`] - volatile storage for tests and recovery simulations
//!
//! ## Example
//!
//! ```rust
//! use burrow_storage::{Backend, MemoryBackend};
//!
//! let mut store = MemoryBackend::new();
//! let at = store.append(b"state").unwrap();
//! assert_eq!(store.read_at(at, 5).unwrap(), b"state");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::Backend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::MemoryBackend;
