//! Error taxonomy for streaming sessions.

use thiserror::Error;

/// Errors surfaced by a streaming session.
///
/// Asynchronous failures (anything that happens after the session has been
/// handed to its driver task) are delivered through the session's event
/// channel; local usage errors are returned directly from the call that
/// caused them. A session never retries on its own - constructing a new
/// stream is the retry mechanism.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The token fetch was rejected. No socket is opened after this.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// WebSocket-level failure, during the handshake or mid-session.
    #[error("WebSocket connection error: {0}")]
    ConnectionError(String),

    /// The service sent a frame with an `error` field. The raw frame is
    /// attached for diagnostics. The socket is left open; the service is
    /// expected to close it.
    #[error("{message}")]
    RemoteProtocol {
        /// Error description from the service.
        message: String,
        /// The unprocessed frame text.
        raw: String,
    },

    /// A text frame that was expected to be JSON failed to parse.
    #[error("invalid JSON received from service: {message}")]
    InvalidJson {
        /// Parser error description.
        message: String,
        /// The unprocessed frame text.
        raw: String,
    },

    /// A JSON frame matching none of the known shapes.
    #[error("unrecognized message received from service")]
    UnrecognizedMessage {
        /// The unprocessed frame text.
        raw: String,
    },

    /// Binary payload arrived on a direction that only carries JSON frames.
    #[error("unexpected binary data received from server")]
    UnexpectedBinary,

    /// The first audio chunk's magic bytes matched no known container
    /// format and no content type was configured.
    #[error("unable to determine content-type from file header, please specify it manually")]
    UnrecognizedFormat,

    /// The session was misconfigured; detected before any I/O.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Write or control operation after the session ended.
    #[error("stream already finished")]
    Finished,
}
