use thiserror::Error;

pub type Result<T> = std::result::Result<T, P2PError>;

#[derive(Error, Debug)]
pub enum P2PError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Remote error: {0}")]
    RemoteError(String),

    #[error("Name not bound in directory: {0}")]
    NotBound(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Resource already held: {0}")]
    AlreadyHeld(String),

    #[error("A download is already in progress")]
    DownloadInProgress,

    #[error("No server available")]
    NoServerAvailable,

    #[error("No candidates available for {0}")]
    NoCandidates(String),

    #[error("Download of {resource} failed: {done}/{total} parts completed")]
    DownloadFailed {
        resource: String,
        done: usize,
        total: usize,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl P2PError {
    /// True for failures that mean "the other side is currently unavailable".
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            P2PError::IoError(_)
                | P2PError::NetworkError(_)
                | P2PError::ConnectionFailed(_)
                | P2PError::Timeout(_)
                | P2PError::RemoteError(_)
                | P2PError::NotBound(_)
                | P2PError::InvalidResponse(_)
                | P2PError::SerializationError(_)
        )
    }
}

impl From<std::io::Error> for P2PError {
    fn from(err: std::io::Error) -> Self {
        P2PError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for P2PError {
    fn from(err: serde_json::Error) -> Self {
        P2PError::SerializationError(err.to_string())
    }
}
