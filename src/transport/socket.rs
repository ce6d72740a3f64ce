//! WebSocket seam for streaming sessions.
//!
//! Sessions drive their socket through the [`TransportSocket`] trait rather
//! than a concrete client so the protocol state machine can be exercised
//! against scripted sockets in tests. [`WsConnector`] is the production
//! implementation on top of `tokio-tungstenite`.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::HeaderMap;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use super::error::TransportError;

/// Code and reason delivered with the socket's close event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close status code, if the peer supplied one.
    pub code: Option<u16>,
    /// Close reason text, possibly empty.
    pub reason: String,
}

/// Events delivered by a transport socket, in wire order.
#[derive(Debug)]
pub enum SocketEvent {
    /// A complete text frame.
    Text(String),
    /// A complete binary frame.
    Binary(Bytes),
    /// A socket-level error. A close event may still follow.
    Error(String),
    /// The connection closed; terminal.
    Closed(CloseInfo),
}

/// One established WebSocket connection.
///
/// Implementations must deliver events strictly in wire order and report
/// how many bytes have been accepted by `send_*` but not yet flushed, so
/// the session can apply backpressure. An implementation whose sends only
/// complete once flushed (tungstenite) reports zero.
#[async_trait]
pub trait TransportSocket: Send + Sync {
    /// Send a text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Send a binary frame.
    async fn send_binary(&mut self, data: Bytes) -> Result<(), TransportError>;

    /// Initiate the closing handshake. The close event still arrives
    /// through [`TransportSocket::next_event`].
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Bytes buffered for sending but not yet written to the wire.
    fn buffered_amount(&self) -> usize;

    /// Wait for the next socket event. `None` means the connection is gone
    /// and no close event will be delivered.
    async fn next_event(&mut self) -> Option<SocketEvent>;
}

/// Outcome of a successful WebSocket handshake.
pub struct Handshake {
    /// The established socket.
    pub socket: Box<dyn TransportSocket>,
    /// Response headers from the upgrade request.
    pub response_headers: HeaderMap,
}

/// Dials a WebSocket endpoint and returns an established socket.
#[async_trait]
pub trait SocketConnector: Send + Sync {
    /// Connect to `url`, sending `headers` with the upgrade request.
    async fn connect(&self, url: &str, headers: &HeaderMap) -> Result<Handshake, TransportError>;
}

/// Production connector backed by `tokio-tungstenite`.
pub struct WsConnector;

#[async_trait]
impl SocketConnector for WsConnector {
    async fn connect(&self, url: &str, headers: &HeaderMap) -> Result<Handshake, TransportError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::Configuration(format!("invalid endpoint URL: {e}")))?;
        for (name, value) in headers.iter() {
            request.headers_mut().insert(name.clone(), value.clone());
        }

        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| TransportError::ConnectionError(e.to_string()))?;

        debug!(status = %response.status(), "WebSocket handshake complete");

        Ok(Handshake {
            socket: Box::new(WsSocket { inner: stream }),
            response_headers: response.headers().clone(),
        })
    }
}

struct WsSocket {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl TransportSocket for WsSocket {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.inner
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::ConnectionError(e.to_string()))
    }

    async fn send_binary(&mut self, data: Bytes) -> Result<(), TransportError> {
        self.inner
            .send(Message::Binary(data))
            .await
            .map_err(|e| TransportError::ConnectionError(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.inner.close(None).await {
            Ok(()) => Ok(()),
            // Close after close is not an error worth surfacing.
            Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed)
            | Err(tokio_tungstenite::tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::ConnectionError(e.to_string())),
        }
    }

    fn buffered_amount(&self) -> usize {
        // send() resolves once the frame is flushed into the underlying
        // stream; completion of the awaited send is the drain signal.
        0
    }

    async fn next_event(&mut self) -> Option<SocketEvent> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Some(SocketEvent::Text(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(data))) => return Some(SocketEvent::Binary(data)),
                Some(Ok(Message::Close(frame))) => {
                    let info = frame
                        .map(|f| CloseInfo {
                            code: Some(u16::from(f.code)),
                            reason: f.reason.as_str().to_owned(),
                        })
                        .unwrap_or_default();
                    return Some(SocketEvent::Closed(info));
                }
                // tungstenite answers pings on the next write/flush.
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(SocketEvent::Error(e.to_string())),
                None => return None,
            }
        }
    }
}
