use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpaceWeaveError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("out of space: no region satisfies the request")]
    OutOfSpace,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("snapshot does not match configuration: {0}")]
    SnapshotMismatch(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SpaceWeaveError>;
