use thiserror::Error;

/// Main error type for portmux
///
/// Transport and acquisition failures never cross the `Session` public
/// contract as errors; they become observable state (`status`, `last_error`).
/// These values surface at the host-capability seam and in outcomes that
/// carry a failure detail.
#[derive(Error, Debug)]
pub enum PortMuxError {
    /// The host rejected or failed a channel operation
    #[error("Channel error: {0}")]
    Channel(String),

    /// Operation on a channel that is no longer connected
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// The host environment does not provide the channel capability
    #[error("Host channel capability unavailable")]
    HostUnavailable,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Generic error
    #[error("Error: {0}")]
    Other(String),
}

/// Result type for portmux operations
pub type Result<T> = std::result::Result<T, PortMuxError>;
