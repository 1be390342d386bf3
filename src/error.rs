use thiserror::Error;

use crate::job::JobId;

#[derive(Error, Debug)]
pub enum JobdError {
    #[error("Invalid broker configuration: {0}")]
    Config(String),

    #[error("Queue transport error: {0}")]
    Transport(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    #[error("Malformed command: {0:?}")]
    MalformedCommand(String),

    #[error("Job store error: {0}")]
    Store(String),

    #[error("Job execution failed: {0}")]
    Execution(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, JobdError>;
