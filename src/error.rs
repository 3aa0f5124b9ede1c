//! Error types for each boundary of the crate.

use thiserror::Error;

use crate::transaction::{Direction, TxStatus};

/// Failures of the SQLite storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create data directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to encode or decode stored json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("corrupt row for {hash}: {reason}")]
    Corrupt { hash: String, reason: String },
}

/// Why a single node-reported record was not merged into the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeRejection {
    #[error("{hash}: node reports a {reported} but the ledger holds a {stored}")]
    DirectionMismatch {
        hash: String,
        stored: Direction,
        reported: Direction,
    },
    #[error("{hash}: refusing status regression {from} -> {to}")]
    StatusRegression {
        hash: String,
        from: TxStatus,
        to: TxStatus,
    },
}

impl MergeRejection {
    pub fn payment_hash(&self) -> &str {
        match self {
            MergeRejection::DirectionMismatch { hash, .. } => hash,
            MergeRejection::StatusRegression { hash, .. } => hash,
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("transaction not found: {0}")]
    NotFound(String),
    #[error("merge rejected: {0}")]
    Rejected(#[from] MergeRejection),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors reported by the node transport boundary.
#[derive(Debug, Clone, Error)]
pub enum NodeError {
    #[error("node unreachable: {0}")]
    Unreachable(String),
    #[error("node request timed out")]
    Timeout,
    #[error("payment failed: {0}")]
    PaymentFailed(String),
    #[error("node rejected request: {0}")]
    Rejected(String),
    #[error("operation not supported by this node source: {0}")]
    Unsupported(&'static str),
}

impl NodeError {
    /// Transient failures a later pass may succeed on.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NodeError::Unreachable(_) | NodeError::Timeout)
    }
}

/// Outcome of a failed reconciliation pass. Cloneable so every caller
/// attached to a coalesced pass receives it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("node fetch failed: {message}")]
    Node { message: String, retryable: bool },
    #[error("ledger storage failed: {0}")]
    Store(String),
    #[error("reconciliation task aborted")]
    Aborted,
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Node { retryable, .. } => *retryable,
            SyncError::Store(_) => false,
            SyncError::Aborted => true,
        }
    }
}

impl From<NodeError> for SyncError {
    fn from(e: NodeError) -> Self {
        SyncError::Node {
            retryable: e.is_retryable(),
            message: e.to_string(),
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        SyncError::Store(e.to_string())
    }
}

/// Errors of user-initiated actions (send, cancel, close).
#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("payment {hash} is already {status}")]
    AlreadyRecorded { hash: String, status: TxStatus },
}

impl From<StoreError> for ActionError {
    fn from(e: StoreError) -> Self {
        ActionError::Ledger(LedgerError::Store(e))
    }
}

/// LNURL success-action decoding failures. Callers render a placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("transaction has no success action")]
    NoSuccessAction,
    #[error("transaction is not settled")]
    NotSettled,
    #[error("payment preimage is not available")]
    MissingPreimage,
    #[error("invalid base64 in {0}")]
    InvalidBase64(&'static str),
    #[error("iv must be 16 bytes, got {0}")]
    InvalidIvLength(usize),
    #[error("ciphertext too long: {0} chars")]
    CiphertextTooLong(usize),
    #[error("decryption failed")]
    Decryption,
    #[error("decrypted message is not valid utf-8")]
    InvalidUtf8,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read or write config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}
