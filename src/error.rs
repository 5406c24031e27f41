/// Error types for the mmdb-writer library
use std::fmt;

/// Result type alias for writer operations
pub type Result<T> = std::result::Result<T, WriterError>;

/// Main error type for writer operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterError {
    /// Invalid writer configuration (ip_version/ipv4_compatible mismatch,
    /// missing description for a declared language)
    Config(String),

    /// Prefix rejected by the tree (wrong IP version, malformed CIDR,
    /// unsupported prefix length)
    Prefix(String),

    /// Value cannot be encoded (integer out of the declared width,
    /// unsupported record shape)
    Value(String),

    /// Format capacity exceeded (value length or record size limits)
    Capacity(String),

    /// I/O errors
    Io(String),
}

impl fmt::Display for WriterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriterError::Config(msg) => write!(f, "Invalid configuration: {}", msg),
            WriterError::Prefix(msg) => write!(f, "Invalid prefix: {}", msg),
            WriterError::Value(msg) => write!(f, "Invalid value: {}", msg),
            WriterError::Capacity(msg) => write!(f, "Capacity exceeded: {}", msg),
            WriterError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for WriterError {}

impl From<std::io::Error> for WriterError {
    fn from(err: std::io::Error) -> Self {
        WriterError::Io(err.to_string())
    }
}
