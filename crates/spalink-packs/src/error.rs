/*!
 * Error types for the spalink packs crate.
 */
use thiserror::Error;

/// Error type for pack and layout resolution
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No pack is registered for the platform key
    #[error("Unknown platform: {0}")]
    UnknownPlatform(String),

    /// No config layout is registered for the platform/revision pair
    #[error("Unknown config layout for platform {key} revision {revision}")]
    UnknownConfigLayout {
        /// The platform key that was looked up
        key: String,
        /// The config layout revision that was looked up
        revision: u16,
    },

    /// No log layout is registered for the platform/revision pair
    #[error("Unknown log layout for platform {key} revision {revision}")]
    UnknownLogLayout {
        /// The platform key that was looked up
        key: String,
        /// The log layout revision that was looked up
        revision: u16,
    },

    /// A pack or layout with the same key is already registered
    #[error("Already registered: {0}")]
    AlreadyRegistered(String),

    /// The layout definition itself is malformed
    #[error("Invalid layout: {0}")]
    InvalidLayout(String),
}

/// Result type for pack and layout resolution
pub type Result<T> = std::result::Result<T, Error>;
