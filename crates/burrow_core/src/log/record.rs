//! Log record types and payload serialization.

use crate::error::{StoreError, StoreResult};
use crate::frame::{put_bytes, put_u64, PayloadCursor};
use crate::types::{Sequence, TxnId};

/// Magic bytes identifying a log segment frame.
pub const LOG_MAGIC: [u8; 4] = *b"BLOG";

/// Kind byte of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordKind {
    /// A transaction began.
    Begin = 1,
    /// A key was written within a transaction.
    Put = 2,
    /// A key was removed within a transaction.
    Delete = 3,
    /// A transaction committed.
    Commit = 4,
    /// A transaction aborted.
    Abort = 5,
    /// A checkpoint completed.
    Checkpoint = 6,
}

impl LogRecordKind {
    /// Converts a frame kind byte back to a record kind.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Begin),
            2 => Some(Self::Put),
            3 => Some(Self::Delete),
            4 => Some(Self::Commit),
            5 => Some(Self::Abort),
            6 => Some(Self::Checkpoint),
            _ => None,
        }
    }

    /// Returns the frame kind byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One record of the write-ahead log.
///
/// `Put` and `Delete` name the collection by its resolved file path so that
/// recovery can reach the right data file without any collection handle
/// being open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// A transaction began.
    Begin {
        /// Transaction ID.
        txn: TxnId,
    },
    /// A key was written.
    Put {
        /// Transaction ID.
        txn: TxnId,
        /// Resolved path of the collection file.
        collection: String,
        /// Key, in the caller's spelling.
        key: String,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// A key was removed.
    Delete {
        /// Transaction ID.
        txn: TxnId,
        /// Resolved path of the collection file.
        collection: String,
        /// Key, in the caller's spelling.
        key: String,
    },
    /// A transaction committed at `seq`.
    Commit {
        /// Transaction ID.
        txn: TxnId,
        /// Commit sequence.
        seq: Sequence,
    },
    /// A transaction aborted.
    Abort {
        /// Transaction ID.
        txn: TxnId,
    },
    /// All state up to `seq` is durable in the collection data files.
    Checkpoint {
        /// Checkpoint sequence.
        seq: Sequence,
    },
}

impl LogRecord {
    /// Returns this record's kind.
    #[must_use]
    pub fn kind(&self) -> LogRecordKind {
        match self {
            Self::Begin { .. } => LogRecordKind::Begin,
            Self::Put { .. } => LogRecordKind::Put,
            Self::Delete { .. } => LogRecordKind::Delete,
            Self::Commit { .. } => LogRecordKind::Commit,
            Self::Abort { .. } => LogRecordKind::Abort,
            Self::Checkpoint { .. } => LogRecordKind::Checkpoint,
        }
    }

    /// Returns the transaction this record belongs to, if any.
    #[must_use]
    pub fn txn(&self) -> Option<TxnId> {
        match self {
            Self::Begin { txn }
            | Self::Put { txn, .. }
            | Self::Delete { txn, .. }
            | Self::Commit { txn, .. }
            | Self::Abort { txn } => Some(*txn),
            Self::Checkpoint { .. } => None,
        }
    }

    /// Encodes the payload carried inside the frame envelope.
    #[must_use]
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Self::Begin { txn } | Self::Abort { txn } => {
                put_u64(&mut buf, txn.as_u64());
            }
            Self::Put {
                txn,
                collection,
                key,
                value,
            } => {
                put_u64(&mut buf, txn.as_u64());
                put_bytes(&mut buf, collection.as_bytes());
                put_bytes(&mut buf, key.as_bytes());
                put_bytes(&mut buf, value);
            }
            Self::Delete {
                txn,
                collection,
                key,
            } => {
                put_u64(&mut buf, txn.as_u64());
                put_bytes(&mut buf, collection.as_bytes());
                put_bytes(&mut buf, key.as_bytes());
            }
            Self::Commit { txn, seq } => {
                put_u64(&mut buf, txn.as_u64());
                put_u64(&mut buf, seq.as_u64());
            }
            Self::Checkpoint { seq } => {
                put_u64(&mut buf, seq.as_u64());
            }
        }
        buf
    }

    /// Decodes a payload previously produced by [`LogRecord::encode_payload`].
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::Corrupted`] on an unknown kind byte or a
    /// malformed payload.
    pub fn decode_payload(kind: u8, payload: &[u8]) -> StoreResult<Self> {
        let kind = LogRecordKind::from_byte(kind)
            .ok_or_else(|| StoreError::corrupted(format!("unknown log record kind {kind}")))?;
        let mut cursor = PayloadCursor::new(payload);

        let record = match kind {
            LogRecordKind::Begin => Self::Begin {
                txn: TxnId::new(cursor.take_u64()?),
            },
            LogRecordKind::Abort => Self::Abort {
                txn: TxnId::new(cursor.take_u64()?),
            },
            LogRecordKind::Put => Self::Put {
                txn: TxnId::new(cursor.take_u64()?),
                collection: cursor.take_string()?,
                key: cursor.take_string()?,
                value: cursor.take_bytes()?,
            },
            LogRecordKind::Delete => Self::Delete {
                txn: TxnId::new(cursor.take_u64()?),
                collection: cursor.take_string()?,
                key: cursor.take_string()?,
            },
            LogRecordKind::Commit => Self::Commit {
                txn: TxnId::new(cursor.take_u64()?),
                seq: Sequence::new(cursor.take_u64()?),
            },
            LogRecordKind::Checkpoint => Self::Checkpoint {
                seq: Sequence::new(cursor.take_u64()?),
            },
        };
        cursor.finish()?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(record: LogRecord) {
        let payload = record.encode_payload();
        let decoded =
            LogRecord::decode_payload(record.kind().as_byte(), &payload).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn all_kinds_round_trip() {
        round_trip(LogRecord::Begin { txn: TxnId::new(1) });
        round_trip(LogRecord::Put {
            txn: TxnId::new(2),
            collection: "/cfg/users.db".into(),
            key: "Alice".into(),
            value: vec![0xCA, 0xFE],
        });
        round_trip(LogRecord::Delete {
            txn: TxnId::new(2),
            collection: "/cfg/users.db".into(),
            key: "Bob".into(),
        });
        round_trip(LogRecord::Commit {
            txn: TxnId::new(2),
            seq: Sequence::new(9),
        });
        round_trip(LogRecord::Abort { txn: TxnId::new(3) });
        round_trip(LogRecord::Checkpoint {
            seq: Sequence::new(9),
        });
    }

    #[test]
    fn empty_value_round_trips() {
        round_trip(LogRecord::Put {
            txn: TxnId::new(1),
            collection: "/cfg/flags.db".into(),
            key: "quiet".into(),
            value: Vec::new(),
        });
    }

    #[test]
    fn unknown_kind_rejected() {
        let err = LogRecord::decode_payload(0xAB, &[]).unwrap_err();
        assert!(matches!(err, StoreError::Corrupted { .. }));
    }

    #[test]
    fn short_payload_rejected() {
        let record = LogRecord::Commit {
            txn: TxnId::new(1),
            seq: Sequence::new(2),
        };
        let payload = record.encode_payload();
        let err = LogRecord::decode_payload(
            LogRecordKind::Commit.as_byte(),
            &payload[..payload.len() - 1],
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::Corrupted { .. }));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut payload = LogRecord::Begin { txn: TxnId::new(1) }.encode_payload();
        payload.push(0);
        let err =
            LogRecord::decode_payload(LogRecordKind::Begin.as_byte(), &payload).unwrap_err();
        assert!(matches!(err, StoreError::Corrupted { .. }));
    }
}
