use std::time::Duration;
use thiserror::Error;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Failures of the byte transport
///
/// `Disconnected` and `Timeout` are fatal for the protocol engine: every
/// in-flight and queued command fails and the host has to reopen the
/// channel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The stream was closed or a read/write on it failed
    #[error("Transport disconnected")]
    Disconnected,

    /// A write did not complete within the configured bound
    #[error("Transport write timed out after {0:?}")]
    Timeout(Duration),

    /// The device node could not be opened
    #[error("Failed to open {target}: {source}")]
    Open {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing the power node failed
    #[error("Power control failed: {0}")]
    Power(#[source] std::io::Error),
}

impl TransportError {
    /// Whether the channel is unusable after this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Timeout(_))
    }
}
