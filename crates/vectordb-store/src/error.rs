#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("vector size mismatch: got {got} bytes, store element size is {expected}")]
    SizeMismatch { expected: usize, got: usize },
    #[error("handle {0} is out of bounds for this store")]
    OutOfBounds(u32),
    #[error("failed to grow storage: {0}")]
    GrowthFailed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for vectordb_core::Error {
    fn from(e: StoreError) -> Self {
        use vectordb_core::error::StateError;
        match e {
            StoreError::SizeMismatch { expected, got } => {
                vectordb_core::error::InputError::DimensionMismatch { expected: expected / 4, got: got / 4 }.into()
            }
            StoreError::OutOfBounds(id) => StateError::UnknownHandle(id).into(),
            StoreError::GrowthFailed(msg) => StateError::GraphCorruption(msg).into(),
            StoreError::Io(io_err) => io_err.into(),
        }
    }
}
