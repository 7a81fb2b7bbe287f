//! Collection-local error cases that don't belong to any lower crate
//! (outer snapshot framing, mostly), folded into the workspace-wide
//! [`vectordb_core::Error`] facade the same way every other crate's
//! sub-error is.

#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    #[error("collection snapshot is corrupt: {0}")]
    SnapshotCorruption(String),
    #[error("collection snapshot checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
}

impl From<CollectionError> for vectordb_core::Error {
    fn from(e: CollectionError) -> Self {
        use vectordb_core::error::StateError;
        match e {
            CollectionError::SnapshotCorruption(msg) => StateError::SnapshotCorruption(msg).into(),
            CollectionError::ChecksumMismatch { expected, actual } => {
                StateError::ChecksumMismatch { expected, actual }.into()
            }
        }
    }
}
