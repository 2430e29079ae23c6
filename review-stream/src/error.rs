use std::fmt;

/// Fatal-to-a-worker failure modes. "Group already exists" is deliberately
/// not a variant here — it's folded into a successful startup by
/// [`crate::worker::StreamWorker`] before this type is ever constructed.
#[derive(Debug)]
pub enum StreamError {
    Broker(redis::RedisError),
    Fatal(String),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Broker(e) => write!(f, "broker error: {e}"),
            StreamError::Fatal(msg) => write!(f, "fatal worker error: {msg}"),
        }
    }
}

impl std::error::Error for StreamError {}

impl From<redis::RedisError> for StreamError {
    fn from(e: redis::RedisError) -> Self {
        StreamError::Broker(e)
    }
}
