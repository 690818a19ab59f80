//! Error types for the notification system.

use thiserror::Error;

use crate::transport::TransportError;

/// Errors that can occur when delivering to a channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// HTTP delivery failed after retries
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Channel is not configured
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    /// Socket-level failure talking to the collector
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel has no open connection for this cycle
    #[error("Channel {0} is not connected")]
    NotConnected(&'static str),

    /// Other error
    #[error("{0}")]
    Other(String),
}
