//! Shared plumbing for the streaming sessions: socket seam, session state,
//! error taxonomy, backpressure and query-string helpers.

mod error;
pub(crate) mod query;
mod socket;

#[cfg(test)]
pub(crate) mod testing;

pub use error::TransportError;
pub use socket::{
    CloseInfo, Handshake, SocketConnector, SocketEvent, TransportSocket, WsConnector,
};

use std::fmt;
use std::time::Duration;

use http::HeaderMap;
use http::header::AUTHORIZATION;

use crate::auth::TokenProvider;

/// Default outbound high-water mark in bytes. With the 10 ms drain poll this
/// caps upload speed at roughly 100 * high_water_mark per second.
pub(crate) const DEFAULT_HIGH_WATER_MARK: usize = 16 * 1024;

/// Interval between buffered-amount checks while waiting for the socket to
/// drain. Only reached for sockets that buffer past `send` completion.
pub(crate) const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Lifecycle of one streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Constructed; no I/O has happened yet.
    #[default]
    Uninitialized,
    /// Token fetch in flight.
    Authenticating,
    /// WebSocket handshake in flight.
    Connecting,
    /// Socket open, opening frame sent, awaiting the service's first
    /// readiness signal.
    OpenUnconfirmed,
    /// The service acknowledged readiness; data may flow.
    Listening,
    /// Close initiated by either side.
    Closing,
    /// Terminal; no further sends.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Uninitialized => write!(f, "uninitialized"),
            SessionState::Authenticating => write!(f, "authenticating"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::OpenUnconfirmed => write!(f, "open-unconfirmed"),
            SessionState::Listening => write!(f, "listening"),
            SessionState::Closing => write!(f, "closing"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Block until the socket's send buffer drains below the high-water mark.
pub(crate) async fn wait_for_drain(socket: &dyn TransportSocket, high_water_mark: usize) {
    while socket.buffered_amount() > high_water_mark {
        tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
    }
}

/// Fetch a bearer token and merge it under the caller-supplied headers;
/// the caller's own headers win on conflict.
pub(crate) async fn merge_bearer_token(
    provider: &dyn TokenProvider,
    caller_headers: &HeaderMap,
) -> Result<HeaderMap, TransportError> {
    let token = provider
        .token()
        .await
        .map_err(|e| TransportError::AuthenticationFailed(e.to_string()))?;

    let value: http::HeaderValue = format!("Bearer {token}")
        .parse()
        .map_err(|_| {
            TransportError::AuthenticationFailed("token is not a valid header value".to_string())
        })?;

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, value);
    for (name, v) in caller_headers.iter() {
        headers.insert(name.clone(), v.clone());
    }
    Ok(headers)
}

/// Watson transaction ID from the handshake response headers.
pub(crate) fn transaction_id_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-global-transaction-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}
