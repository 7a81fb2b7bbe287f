#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("malformed vertex record: {0}")]
    Malformed(String),
    #[error("vertex id mismatch: expected {expected}, got {got}")]
    IdMismatch { expected: String, got: String },
    #[error("vertex references unknown parent {parent}")]
    UnknownParent { parent: String },
    #[error("key '{0}' has an unresolved conflict pending manual resolution")]
    ConflictPending(String),
    #[error("vertex {0} is not yet finalized")]
    NotFinalized(String),
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

impl From<CoordinatorError> for vectordb_core::Error {
    fn from(e: CoordinatorError) -> Self {
        use vectordb_core::error::{CoordinationError, StateError};
        match e {
            CoordinatorError::ConflictPending(key) => StateError::ConflictPending(key).into(),
            CoordinatorError::NotFinalized(id) => StateError::NotFinalized(id).into(),
            CoordinatorError::UnknownParent { parent } => CoordinationError::MissingParent(parent).into(),
            CoordinatorError::Malformed(msg) | CoordinatorError::IdMismatch { expected: _, got: msg } => {
                CoordinationError::CausalityCycle(msg).into()
            }
        }
    }
}
