use thiserror::Error;

pub type Result<T> = std::result::Result<T, P2PError>;

#[derive(Error, Debug)]
pub enum P2PError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Invalid clock value: {0}")]
    InvalidClock(String),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("Payload declares {declared} entries but carries {actual}")]
    PayloadCountMismatch { declared: usize, actual: usize },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Message too large: more than {0} bytes")]
    MessageTooLarge(usize),

    #[error("Download failed: {0}")]
    DownloadError(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<std::io::Error> for P2PError {
    fn from(err: std::io::Error) -> Self {
        P2PError::IoError(err.to_string())
    }
}

impl P2PError {
    /// Errors raised while turning a received line into a [`crate::core::Message`].
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            P2PError::MalformedMessage(_)
                | P2PError::InvalidClock(_)
                | P2PError::UnknownMessageType(_)
        )
    }
}
