//! Error types for the faktur system.

/// Result type alias for faktur operations.
pub type Result<T> = std::result::Result<T, FakturError>;

/// Main error type for the faktur system.
#[derive(Debug, thiserror::Error)]
pub enum FakturError {
    /// Network, DNS or TLS failures on an external call
    #[error("Transport error: {0}")]
    Transport(String),

    /// HTTP 401/403 from a provider after remediation
    #[error("Auth error ({status}): {message}")]
    Auth { status: u16, message: String },

    /// Requested invoice or file missing
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Bad input: unknown status, invalid export format, malformed intake
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Malformed XML or OCR output
    #[error("Parse error: {0}")]
    Parse(String),

    /// OCR binary missing, failed or timed out
    #[error("Subprocess error: {0}")]
    Subprocess(String),

    /// Underlying store read/write failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Character encoding failure (Windows-1250 export targets)
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped anyhow errors for compatibility
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FakturError {
    /// Create a new transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a new auth error
    pub fn auth(status: u16, message: impl Into<String>) -> Self {
        Self::Auth {
            status,
            message: message.into(),
        }
    }

    /// Create a new not found error
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a new subprocess error
    pub fn subprocess(msg: impl Into<String>) -> Self {
        Self::Subprocess(msg.into())
    }

    /// Create a new storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new encoding error
    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is an auth error
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
