#[derive(Debug, thiserror::Error)]
pub enum RingError {
    #[error("consistent-hash ring has no shards")]
    Empty,
    #[error("shard {0} is already a member of the ring")]
    DuplicateShard(u32),
    #[error("shard {0} is not a member of the ring")]
    UnknownShard(u32),
}

pub type Result<T> = std::result::Result<T, RingError>;

impl From<RingError> for vectordb_core::Error {
    fn from(e: RingError) -> Self {
        use vectordb_core::error::CoordinationError;
        match e {
            RingError::Empty => CoordinationError::RingEmpty.into(),
            RingError::DuplicateShard(id) => CoordinationError::UnknownShard(format!("shard {id} already present")).into(),
            RingError::UnknownShard(id) => CoordinationError::UnknownShard(id.to_string()).into(),
        }
    }
}
