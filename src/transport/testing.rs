//! Scripted socket, connector and token-provider fakes for protocol tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use parking_lot::Mutex;

use super::{CloseInfo, Handshake, SocketConnector, SocketEvent, TransportError, TransportSocket};
use crate::auth::{AuthError, TokenProvider};

/// One frame recorded on the outbound side of a scripted socket.
#[derive(Debug, Clone)]
pub(crate) enum SentFrame {
    Text(String),
    Binary(Bytes),
}

impl SentFrame {
    pub(crate) fn as_text(&self) -> Option<&str> {
        match self {
            SentFrame::Text(text) => Some(text),
            SentFrame::Binary(_) => None,
        }
    }

    pub(crate) fn is_binary(&self) -> bool {
        matches!(self, SentFrame::Binary(_))
    }
}

/// Shared record of everything a scripted socket observed.
#[derive(Default)]
pub(crate) struct SocketLog {
    pub(crate) sent: Mutex<Vec<(SentFrame, Instant)>>,
    pub(crate) close_calls: AtomicUsize,
}

impl SocketLog {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn sent_frames(&self) -> Vec<SentFrame> {
        self.sent.lock().iter().map(|(frame, _)| frame.clone()).collect()
    }
}

/// A socket that replays a fixed script of inbound events, each after an
/// optional delay, and records everything sent through it. Calling `close`
/// appends a close event to the script, mimicking the closing handshake.
pub(crate) struct ScriptedSocket {
    script: VecDeque<(Duration, SocketEvent)>,
    log: Arc<SocketLog>,
    buffered: Arc<AtomicUsize>,
    track_buffered: bool,
    closed: bool,
}

impl ScriptedSocket {
    pub(crate) fn new(script: Vec<(Duration, SocketEvent)>, log: Arc<SocketLog>) -> Self {
        Self {
            script: script.into(),
            log,
            buffered: Arc::new(AtomicUsize::new(0)),
            track_buffered: false,
            closed: false,
        }
    }

    /// Track sent binary bytes in `buffered`; the test drains it manually.
    pub(crate) fn with_buffered(
        script: Vec<(Duration, SocketEvent)>,
        log: Arc<SocketLog>,
        buffered: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            script: script.into(),
            log,
            buffered,
            track_buffered: true,
            closed: false,
        }
    }
}

#[async_trait]
impl TransportSocket for ScriptedSocket {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.log.sent.lock().push((SentFrame::Text(text), Instant::now()));
        Ok(())
    }

    async fn send_binary(&mut self, data: Bytes) -> Result<(), TransportError> {
        if self.track_buffered {
            self.buffered.fetch_add(data.len(), Ordering::SeqCst);
        }
        self.log.sent.lock().push((SentFrame::Binary(data), Instant::now()));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.log.close_calls.fetch_add(1, Ordering::SeqCst);
        if !self.closed {
            self.closed = true;
            self.script.push_back((
                Duration::ZERO,
                SocketEvent::Closed(CloseInfo {
                    code: Some(1000),
                    reason: String::new(),
                }),
            ));
        }
        Ok(())
    }

    fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    async fn next_event(&mut self) -> Option<SocketEvent> {
        loop {
            let delay = match self.script.front() {
                Some((delay, _)) => *delay,
                None => {
                    // Script exhausted: wait for a close() from the session.
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    continue;
                }
            };
            // Sleep before popping so an event is never lost when the
            // driver's select drops this future mid-wait.
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some((_, event)) = self.script.pop_front() {
                return Some(event);
            }
        }
    }
}

/// Connector handing out a single scripted socket, recording the URL and
/// headers it was dialed with.
pub(crate) struct ScriptedConnector {
    socket: Mutex<Option<ScriptedSocket>>,
    pub(crate) connects: AtomicUsize,
    pub(crate) seen_url: Mutex<Option<String>>,
    pub(crate) seen_headers: Mutex<Option<HeaderMap>>,
    response_headers: HeaderMap,
}

impl ScriptedConnector {
    pub(crate) fn new(socket: ScriptedSocket) -> Arc<Self> {
        Self::with_response_headers(socket, HeaderMap::new())
    }

    pub(crate) fn with_response_headers(
        socket: ScriptedSocket,
        response_headers: HeaderMap,
    ) -> Arc<Self> {
        Arc::new(Self {
            socket: Mutex::new(Some(socket)),
            connects: AtomicUsize::new(0),
            seen_url: Mutex::new(None),
            seen_headers: Mutex::new(None),
            response_headers,
        })
    }
}

#[async_trait]
impl SocketConnector for ScriptedConnector {
    async fn connect(&self, url: &str, headers: &HeaderMap) -> Result<Handshake, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.seen_url.lock() = Some(url.to_string());
        *self.seen_headers.lock() = Some(headers.clone());
        let socket = self
            .socket
            .lock()
            .take()
            .ok_or_else(|| TransportError::ConnectionError("scripted socket already taken".into()))?;
        Ok(Handshake {
            socket: Box::new(socket),
            response_headers: self.response_headers.clone(),
        })
    }
}

/// Token provider that counts calls and returns a fixed outcome.
pub(crate) struct CountingProvider {
    pub(crate) calls: AtomicUsize,
    result: Result<String, AuthError>,
}

impl CountingProvider {
    pub(crate) fn ok(token: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            result: Ok(token.to_string()),
        })
    }

    pub(crate) fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            result: Err(AuthError::RequestFailed(message.to_string())),
        })
    }
}

#[async_trait]
impl TokenProvider for CountingProvider {
    async fn token(&self) -> Result<String, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}
