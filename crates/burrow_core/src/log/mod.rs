//! Segmented write-ahead log.
//!
//! Every mutation of a tree collection reaches its log segment before it is
//! acknowledged; crash recovery replays committed transactions from the log
//! into the collection data files.
//!
//! The log is a sequence of numbered segment files, `log.000001` onward,
//! in the environment's configuration directory. Appends go to the highest
//! (active) segment through a small write buffer; when the active segment
//! exceeds the configured maximum it is sealed and the next one started.
//!
//! A sealed segment is **recyclable** once no transaction recorded in it is
//! still needed for recovery: every transaction touching it has either
//! aborted, or committed at a sequence at or below the last checkpoint.
//! Recycling deletes the file.
//!
//! Records use the shared frame envelope; see [`crate::frame`] for the
//! tolerated-vs-fatal recovery policy.

mod record;
mod writer;

pub use record::{LogRecord, LogRecordKind, LOG_MAGIC};
pub use writer::LogManager;
