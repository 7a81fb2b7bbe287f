use std::fmt;

/// Stable machine-readable tag for an [`Error`], carried across crate boundaries
/// and eventually surfaced on the wire layer (out of scope here, but the tag is
/// the contract the wire layer is expected to serialize).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DimensionMismatch,
    InvalidVector,
    InvalidFilter,
    InvalidParameter,
    UnknownCollection,
    CollectionExists,
    UnknownId,
    DuplicateId,
    Tombstoned,
    ReadOnly,
    ConflictPending,
    NotFinalized,
    QuotaExceeded,
    MemoryLimit,
    RecallBelowTarget,
    GraphCorruption,
    SnapshotCorruption,
    WalCorruption,
    ChecksumMismatch,
    UnknownParentVertex,
    RingEmpty,
    CoordinationConflict,
    QuorumLost,
    Partitioned,
    Timeout,
    Cancelled,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::DimensionMismatch => "DIMENSION_MISMATCH",
            ErrorKind::InvalidVector => "INVALID_VECTOR",
            ErrorKind::InvalidFilter => "INVALID_FILTER",
            ErrorKind::InvalidParameter => "INVALID_PARAMETER",
            ErrorKind::UnknownCollection => "UNKNOWN_COLLECTION",
            ErrorKind::CollectionExists => "COLLECTION_EXISTS",
            ErrorKind::UnknownId => "UNKNOWN_ID",
            ErrorKind::DuplicateId => "DUPLICATE_ID",
            ErrorKind::Tombstoned => "TOMBSTONED",
            ErrorKind::ReadOnly => "READ_ONLY",
            ErrorKind::ConflictPending => "CONFLICT_PENDING",
            ErrorKind::NotFinalized => "NOT_FINALIZED",
            ErrorKind::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorKind::MemoryLimit => "MEMORY_LIMIT",
            ErrorKind::RecallBelowTarget => "RECALL_BELOW_TARGET",
            ErrorKind::GraphCorruption => "GRAPH_CORRUPTION",
            ErrorKind::SnapshotCorruption => "SNAPSHOT_CORRUPTION",
            ErrorKind::WalCorruption => "WAL_CORRUPTION",
            ErrorKind::ChecksumMismatch => "CHECKSUM_MISMATCH",
            ErrorKind::UnknownParentVertex => "UNKNOWN_PARENT_VERTEX",
            ErrorKind::RingEmpty => "RING_EMPTY",
            ErrorKind::CoordinationConflict => "COORDINATION_CONFLICT",
            ErrorKind::QuorumLost => "QUORUM_LOST",
            ErrorKind::Partitioned => "PARTITIONED",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::Io => "IO",
        };
        f.write_str(s)
    }
}

/// Input-side validation failures: the caller handed us something we can
/// reject before touching any storage.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("vector has {got} dimensions, collection expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("vector contains a NaN or infinite component")]
    NonFiniteComponent,
    #[error("filter is malformed: {0}")]
    InvalidFilter(String),
    #[error("zero vector is not valid under cosine metric")]
    ZeroNormVector,
    #[error("external id '{0}' is unknown in this collection")]
    UnknownId(String),
    #[error("external id '{0}' is already live in this collection")]
    DuplicateId(String),
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },
}

/// Collection / index state errors: the request was well-formed but the
/// target state does not exist, already exists, or is internally broken.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("collection '{0}' does not exist")]
    UnknownCollection(String),
    #[error("collection '{0}' already exists")]
    CollectionExists(String),
    #[error("internal handle {0} has no live vector (deleted or never inserted)")]
    UnknownHandle(u32),
    #[error("HNSW graph invariant violated: {0}")]
    GraphCorruption(String),
    #[error("snapshot failed validation: {0}")]
    SnapshotCorruption(String),
    #[error("write-ahead log is corrupt at offset {offset}: {reason}")]
    WalCorruption { offset: u64, reason: String },
    #[error("handle {0} is tombstoned")]
    Tombstoned(u32),
    #[error("collection '{0}' is read-only pending operator intervention")]
    ReadOnly(String),
    #[error("key '{0}' has an unresolved conflict pending manual resolution")]
    ConflictPending(String),
    #[error("vertex {0} is not yet finalized")]
    NotFinalized(String),
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("vertex {vertex} references unknown parent {parent}")]
    UnknownParentVertex { vertex: String, parent: String },
}

/// Resource-exhaustion errors.
#[derive(Debug, thiserror::Error)]
pub enum CapacityError {
    #[error("collection '{0}' is at its configured vector quota")]
    QuotaExceeded(String),
    #[error("segment store is full (max {0} segments)")]
    SegmentsExhausted(usize),
    #[error("memory limit of {limit_bytes} bytes exceeded")]
    MemoryLimit { limit_bytes: u64 },
    #[error("recall for collection '{collection}' fell to {observed:.3}, below target {target:.3}")]
    RecallBelowTarget { collection: String, observed: f64, target: f64 },
}

/// Cross-node coordination failures (ring membership, DAG causality).
#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    #[error("consistent-hash ring has no shards")]
    RingEmpty,
    #[error("shard '{0}' is not a member of the ring")]
    UnknownShard(String),
    #[error("vertex references missing parent {0}")]
    MissingParent(String),
    #[error("vertex {0} would introduce a causality cycle")]
    CausalityCycle(String),
    #[error("conflicting writes on key '{0}' could not be resolved: {1}")]
    UnresolvedConflict(String, String),
    #[error("quorum lost for collection '{0}'")]
    QuorumLost(String),
    #[error("node is partitioned from the rest of the cluster")]
    Partitioned,
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Top-level facade error every public API in the workspace returns.
///
/// Mirrors the way `draco28-PulseDB`'s `PulseDBError` wraps its own
/// per-concern sub-errors: callers match on [`ErrorKind`] for stable,
/// cross-crate-version behavior, and use `From` for internal propagation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Capacity(#[from] CapacityError),
    #[error(transparent)]
    Coordination(#[from] CoordinationError),
    #[error("operation cancelled")]
    Cancelled,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Input(InputError::DimensionMismatch { .. }) => ErrorKind::DimensionMismatch,
            Error::Input(InputError::NonFiniteComponent) => ErrorKind::InvalidVector,
            Error::Input(InputError::ZeroNormVector) => ErrorKind::InvalidVector,
            Error::Input(InputError::InvalidFilter(_)) => ErrorKind::InvalidFilter,
            Error::Input(InputError::InvalidParameter { .. }) => ErrorKind::InvalidParameter,
            Error::Input(InputError::UnknownId(_)) => ErrorKind::UnknownId,
            Error::Input(InputError::DuplicateId(_)) => ErrorKind::DuplicateId,
            Error::State(StateError::UnknownCollection(_)) => ErrorKind::UnknownCollection,
            Error::State(StateError::CollectionExists(_)) => ErrorKind::CollectionExists,
            Error::State(StateError::UnknownHandle(_)) => ErrorKind::GraphCorruption,
            Error::State(StateError::GraphCorruption(_)) => ErrorKind::GraphCorruption,
            Error::State(StateError::SnapshotCorruption(_)) => ErrorKind::SnapshotCorruption,
            Error::State(StateError::WalCorruption { .. }) => ErrorKind::WalCorruption,
            Error::State(StateError::Tombstoned(_)) => ErrorKind::Tombstoned,
            Error::State(StateError::ReadOnly(_)) => ErrorKind::ReadOnly,
            Error::State(StateError::ConflictPending(_)) => ErrorKind::ConflictPending,
            Error::State(StateError::NotFinalized(_)) => ErrorKind::NotFinalized,
            Error::State(StateError::ChecksumMismatch { .. }) => ErrorKind::ChecksumMismatch,
            Error::State(StateError::UnknownParentVertex { .. }) => ErrorKind::UnknownParentVertex,
            Error::Capacity(CapacityError::MemoryLimit { .. }) => ErrorKind::MemoryLimit,
            Error::Capacity(CapacityError::RecallBelowTarget { .. }) => ErrorKind::RecallBelowTarget,
            Error::Capacity(_) => ErrorKind::QuotaExceeded,
            Error::Coordination(CoordinationError::RingEmpty) => ErrorKind::RingEmpty,
            Error::Coordination(CoordinationError::QuorumLost(_)) => ErrorKind::QuorumLost,
            Error::Coordination(CoordinationError::Partitioned) => ErrorKind::Partitioned,
            Error::Coordination(CoordinationError::Timeout(_)) => ErrorKind::Timeout,
            Error::Coordination(_) => ErrorKind::CoordinationConflict,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::State(StateError::UnknownCollection(_) | StateError::UnknownHandle(_))
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Input(_))
    }

    pub fn is_capacity(&self) -> bool {
        matches!(self, Error::Capacity(_))
    }

    pub fn dimension_mismatch(expected: usize, got: usize) -> Self {
        InputError::DimensionMismatch { expected, got }.into()
    }

    pub fn unknown_collection(name: impl Into<String>) -> Self {
        StateError::UnknownCollection(name.into()).into()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
