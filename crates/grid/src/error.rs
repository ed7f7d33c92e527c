use thiserror::Error;

/// Errors that can occur in discovery and advertisement.
///
/// Inbound decoding problems never surface here: the peer directory drops
/// malformed advertisements instead of failing the listener.
#[derive(Error, Debug)]
pub enum GridError {
    /// Advertisement is missing a required property
    #[error("missing advertisement property: {0}")]
    MissingProperty(&'static str),

    /// Advertisement property could not be decoded
    #[error("malformed advertisement property {property}: {reason}")]
    MalformedProperty {
        property: &'static str,
        reason: String,
    },

    /// Advertisement carried no usable address
    #[error("advertisement has no address")]
    NoAddress,

    /// Failed to serialize an outgoing advertisement
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// The service discovery transport rejected an operation
    #[error("discovery error: {0}")]
    DiscoveryError(String),

    /// Advertiser was asked to start twice
    #[error("advertiser already running")]
    AlreadyRunning,

    /// I/O operation failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for GridError {
    fn from(e: serde_json::Error) -> Self {
        GridError::SerializationError(e.to_string())
    }
}

impl From<mdns_sd::Error> for GridError {
    fn from(e: mdns_sd::Error) -> Self {
        GridError::DiscoveryError(e.to_string())
    }
}

/// Convenience Result type for Grid operations
pub type Result<T> = std::result::Result<T, GridError>;
