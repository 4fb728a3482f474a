/*!
 * Error types for the spalink client crate.
 */
use thiserror::Error;

/// Error type for spa client operations
#[derive(Error, Debug)]
pub enum Error {
    /// The session has not completed its handshake
    #[error("Spa not connected")]
    NotConnected,

    /// The connection handshake did not complete within the configured window
    #[error("Connect timeout: {0}")]
    ConnectTimeout(String),

    /// A retry-governed request exhausted its attempt budget
    #[error("Delivery timeout: {0}")]
    DeliveryTimeout(String),

    /// The session has entered its terminal error state
    #[error("Session failed: {0}")]
    SessionFailed(String),

    /// Pack or layout resolution failed (unknown platform or revision)
    #[error("Layout lookup failed: {0}")]
    Lookup(#[from] spalink_packs::Error),

    /// An operation was attempted before the structure was ready for it
    #[error("Structure not ready: {0}")]
    StructureNotReady(String),

    /// The named field is not declared by the bound layouts
    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// The named field is declared read-only
    #[error("Field not writable: {0}")]
    FieldNotWritable(String),

    /// The value does not fit the field's declared type
    #[error("Invalid value for field {field}: {reason}")]
    InvalidValue {
        /// The field being written
        field: String,
        /// Why the value was rejected
        reason: String,
    },

    /// Transport-level failure (socket closed, send failed)
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire codec error
    #[error("Codec error: {0}")]
    Codec(String),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] spalink_core::error::Error),

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for spa client operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new connect-timeout error
    pub fn connect_timeout<S: AsRef<str>>(msg: S) -> Self {
        Error::ConnectTimeout(msg.as_ref().to_string())
    }

    /// Create a new delivery-timeout error
    pub fn delivery_timeout<S: AsRef<str>>(msg: S) -> Self {
        Error::DeliveryTimeout(msg.as_ref().to_string())
    }

    /// Create a new session-failed error
    pub fn session_failed<S: AsRef<str>>(msg: S) -> Self {
        Error::SessionFailed(msg.as_ref().to_string())
    }

    /// Create a new structure-not-ready error
    pub fn structure_not_ready<S: AsRef<str>>(msg: S) -> Self {
        Error::StructureNotReady(msg.as_ref().to_string())
    }

    /// Create a new invalid-value error
    pub fn invalid_value<S1: AsRef<str>, S2: AsRef<str>>(field: S1, reason: S2) -> Self {
        Error::InvalidValue {
            field: field.as_ref().to_string(),
            reason: reason.as_ref().to_string(),
        }
    }

    /// Create a new transport error
    pub fn transport<S: AsRef<str>>(msg: S) -> Self {
        Error::Transport(msg.as_ref().to_string())
    }

    /// Create a new codec error
    pub fn codec<S: AsRef<str>>(msg: S) -> Self {
        Error::Codec(msg.as_ref().to_string())
    }

    /// Create a new other error
    pub fn other<S: AsRef<str>>(msg: S) -> Self {
        Error::Other(msg.as_ref().to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}
