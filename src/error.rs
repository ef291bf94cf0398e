//! Top-level error taxonomy.
//!
//! `RejectKind` implements §7's taxonomy (structural / policy / conservation
//! / signature / timing / rate-limit / transient / fatal) as a type every
//! rejecting component can attach to its error, so the peer-manager DoS
//! scoring policy in §7 can pattern-match on it without re-deriving intent
//! from an error string.

use thiserror::Error;

/// Which bucket of §7's error taxonomy a rejection falls into, and what the
/// peer-scoring policy should do about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectKind {
    /// Malformed payload, bad type tag, payload over size. Scored.
    Structural,
    /// Canonical-order violation, fee-output-not-OP_TRUE, fee below minimum. Scored.
    Policy,
    /// A5/A6 would be violated, per-TX balance broken, insufficient vault backing. Scored.
    Conservation,
    /// Wrong signer, malformed signature, double-sign evidence. Scored.
    Signature,
    /// Timestamp too far in future, refund before expiry, block too early. Scored.
    Timing,
    /// Peer signature flood. Soft-drop, never scored, never a disconnect reason.
    RateLimit,
    /// Chain tip moved during assembly. Logged and dropped, retried next tick.
    Transient,
    /// All-committed marker mismatch at startup. Refuse to continue.
    Fatal,
}

impl RejectKind {
    /// DoS score contribution (0–100) consumed by the peer manager; `None`
    /// means "never increments a peer's score for this reason alone".
    pub fn dos_score(self) -> Option<u8> {
        match self {
            RejectKind::Structural => Some(20),
            RejectKind::Policy => Some(10),
            RejectKind::Conservation => Some(40),
            RejectKind::Signature => Some(40),
            RejectKind::Timing => Some(5),
            RejectKind::RateLimit | RejectKind::Transient | RejectKind::Fatal => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("registry error: {0}")]
    Registry(#[from] crate::masternode_registry::RegistryError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] crate::scheduler::SchedulerError),

    #[error("signer error: {0}")]
    Signer(#[from] crate::crypto::CryptoError),

    #[error("settlement error: {0}")]
    Settlement(#[from] crate::settlement::SettlementError),

    #[error("commit error: {0}")]
    Commit(#[from] crate::committer::CommitError),

    #[error("quorum error: {0}")]
    Quorum(#[from] crate::quorum::QuorumError),

    #[error("finality aggregator error: {0}")]
    Aggregator(#[from] crate::finality::aggregator::AggregatorError),

    #[error("sync gate error: {0}")]
    SyncGate(#[from] crate::sync_gate::SyncGateError),

    #[error("network error: {0}")]
    Network(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("initialization error: {0}")]
    Initialization(String),

    #[error("fatal: rebuild-from-chain required ({0})")]
    RebuildRequired(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to open {name} database: {source}")]
    DatabaseOpen {
        name: String,
        #[source]
        source: sled::Error,
    },

    #[error("database operation failed: {0}")]
    DatabaseOp(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

impl From<sled::Error> for StorageError {
    fn from(e: sled::Error) -> Self {
        StorageError::DatabaseOp(e.to_string())
    }
}
