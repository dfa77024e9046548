use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Invalid job spec: {0}")]
    InvalidJobSpec(String),

    #[error("Duplicate job id: {0}")]
    DuplicateId(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Version conflict: {0}")]
    VersionConflict(String),

    #[error("Command rejected: {0}")]
    CommandRejected(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

impl From<Box<bincode::ErrorKind>> for QueueError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        QueueError::Codec(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
