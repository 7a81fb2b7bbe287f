#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("unknown internal handle {0}")]
    UnknownHandle(u32),
    #[error("HNSW graph invariant violated: {0}")]
    GraphCorruption(String),
    #[error("snapshot failed validation: {0}")]
    SnapshotCorruption(String),
    #[error("filter references unindexed field '{0}'")]
    UnindexedField(String),
    #[error(transparent)]
    Store(#[from] vectordb_store::StoreError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IndexError>;

impl From<IndexError> for vectordb_core::Error {
    fn from(e: IndexError) -> Self {
        use vectordb_core::error::StateError;
        match e {
            IndexError::UnknownHandle(h) => StateError::UnknownHandle(h).into(),
            IndexError::GraphCorruption(msg) => StateError::GraphCorruption(msg).into(),
            IndexError::SnapshotCorruption(msg) => StateError::SnapshotCorruption(msg).into(),
            IndexError::UnindexedField(field) => {
                vectordb_core::error::InputError::InvalidFilter(format!("unindexed field '{field}'")).into()
            }
            IndexError::Store(store_err) => store_err.into(),
            IndexError::Io(io_err) => io_err.into(),
        }
    }
}
