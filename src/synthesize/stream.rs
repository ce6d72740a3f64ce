//! Streaming speech synthesis over a single WebSocket connection.
//!
//! A [`SynthesizeStream`] carries its text in the configuration and yields
//! binary audio through [`SynthesizeStream::next_event`]. Nothing touches
//! the network at construction time: the token fetch and the WebSocket
//! handshake happen on the first read demand, so a short-lived token is
//! still fresh when the socket starts transmitting.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::auth::TokenProvider;
use crate::transport::{
    CloseInfo, SessionState, SocketConnector, SocketEvent, TransportError, TransportSocket,
    WsConnector, merge_bearer_token, transaction_id_from,
};

use super::config::SynthesizeConfig;
use super::messages::{InfoFrame, MarkTimings, WordTimings};

const COMMAND_CAPACITY: usize = 4;
const EVENT_CAPACITY: usize = 256;

/// A raw inbound frame, text or binary, for diagnostics.
#[derive(Debug)]
pub enum MessageFrame {
    /// A parsed text frame.
    Text(serde_json::Value),
    /// A binary audio frame.
    Binary(Bytes),
}

/// Events observed by the caller of a [`SynthesizeStream`].
#[derive(Debug)]
pub enum SynthesizeEvent {
    /// WebSocket handshake completed and the synthesis payload was sent.
    Open,
    /// Every inbound frame, for diagnostics.
    Message(MessageFrame),
    /// Metadata about the binary streams that follow.
    BinaryStreams(serde_json::Value),
    /// SSML mark timings.
    Marks(MarkTimings),
    /// Word timings.
    Words(WordTimings),
    /// Service warnings.
    Warnings(serde_json::Value),
    /// Synthesized audio bytes.
    Data(Bytes),
    /// Asynchronous session error.
    Error(TransportError),
    /// [`SynthesizeStream::stop`] was called.
    Stopping,
    /// The socket closed. Terminal.
    Close(CloseInfo),
}

enum Command {
    Stop,
}

/// Streaming synthesis session.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use watson_streaming::auth::IamTokenManager;
/// use watson_streaming::synthesize::{SynthesizeConfig, SynthesizeEvent, SynthesizeStream};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = SynthesizeConfig {
///         voice: Some("en-US_MichaelVoice".to_string()),
///         accept: Some("audio/ogg;codecs=opus".to_string()),
///         ..SynthesizeConfig::new("Hello, world.")
///     };
///     let manager = Arc::new(IamTokenManager::new(std::env::var("WATSON_API_KEY")?)?);
///     let mut stream = SynthesizeStream::with_token_provider(config, manager)?;
///
///     let mut audio = Vec::new();
///     while let Some(event) = stream.next_event().await {
///         if let SynthesizeEvent::Data(chunk) = event {
///             audio.extend_from_slice(&chunk);
///         }
///     }
///     std::fs::write("speech.ogg", audio)?;
///     Ok(())
/// }
/// ```
pub struct SynthesizeStream {
    config: SynthesizeConfig,
    token_provider: Option<Arc<dyn TokenProvider>>,
    connector: Arc<dyn SocketConnector>,
    state: Arc<Mutex<SessionState>>,
    transaction_id: Arc<Mutex<Option<String>>>,
    event_tx: Option<mpsc::Sender<SynthesizeEvent>>,
    events: mpsc::Receiver<SynthesizeEvent>,
    cmd_tx: Option<mpsc::Sender<Command>>,
    finished: bool,
}

impl SynthesizeStream {
    /// Create a session with static credentials.
    pub fn new(config: SynthesizeConfig) -> Result<Self, TransportError> {
        Self::with_connector(config, None, Arc::new(WsConnector))
    }

    /// Create a session that fetches a bearer token from `provider` on
    /// first use.
    pub fn with_token_provider(
        config: SynthesizeConfig,
        provider: Arc<dyn TokenProvider>,
    ) -> Result<Self, TransportError> {
        Self::with_connector(config, Some(provider), Arc::new(WsConnector))
    }

    /// Create a session on a custom socket implementation.
    pub fn with_connector(
        config: SynthesizeConfig,
        token_provider: Option<Arc<dyn TokenProvider>>,
        connector: Arc<dyn SocketConnector>,
    ) -> Result<Self, TransportError> {
        if config.text.is_empty() {
            return Err(TransportError::Configuration(
                "text to synthesize is required".to_string(),
            ));
        }
        let (event_tx, events) = mpsc::channel(EVENT_CAPACITY);
        Ok(Self {
            config,
            token_provider,
            connector,
            state: Arc::new(Mutex::new(SessionState::Uninitialized)),
            transaction_id: Arc::new(Mutex::new(None)),
            event_tx: Some(event_tx),
            events,
            cmd_tx: None,
            finished: false,
        })
    }

    /// Wait for the next session event. The first call authenticates and
    /// connects. `None` means the session ended; a caller observing only
    /// the end of the stream must check for a preceding
    /// [`SynthesizeEvent::Error`].
    pub async fn next_event(&mut self) -> Option<SynthesizeEvent> {
        if self.cmd_tx.is_none() && !self.finished {
            // A failure here has already been pushed onto the event channel.
            let _ = self.ensure_initialized().await;
        }
        self.events.recv().await
    }

    /// Abrupt termination: emits [`SynthesizeEvent::Stopping`] and closes
    /// the socket directly.
    pub async fn stop(&mut self) {
        self.finished = true;
        match &self.cmd_tx {
            Some(cmd_tx) => {
                let _ = cmd_tx.send(Command::Stop).await;
            }
            None => {
                *self.state.lock() = SessionState::Closed;
                if let Some(event_tx) = self.event_tx.take() {
                    let _ = event_tx.send(SynthesizeEvent::Stopping).await;
                }
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Watson transaction ID from the handshake response, once connected.
    pub fn transaction_id(&self) -> Option<String> {
        self.transaction_id.lock().clone()
    }

    /// Emit a terminal error and end the event stream.
    async fn fail(&mut self, error: TransportError) {
        self.finished = true;
        *self.state.lock() = SessionState::Closed;
        if let Some(event_tx) = self.event_tx.take() {
            let _ = event_tx.send(SynthesizeEvent::Error(error)).await;
        }
    }

    /// Authenticate and connect, exactly once, on the first read demand.
    async fn ensure_initialized(&mut self) -> Result<(), TransportError> {
        if self.cmd_tx.is_some() {
            return Ok(());
        }

        let headers = match self.token_provider.clone() {
            Some(provider) => {
                *self.state.lock() = SessionState::Authenticating;
                match merge_bearer_token(provider.as_ref(), &self.config.headers).await {
                    Ok(headers) => headers,
                    Err(error) => {
                        self.fail(error.clone()).await;
                        return Err(error);
                    }
                }
            }
            None => self.config.headers.clone(),
        };

        *self.state.lock() = SessionState::Connecting;
        let url = self.config.build_url();
        debug!(%url, "opening synthesis session");
        let connector = self.connector.clone();
        let handshake = match connector.connect(&url, &headers).await {
            Ok(handshake) => handshake,
            Err(error) => {
                self.fail(error.clone()).await;
                return Err(error);
            }
        };
        *self.transaction_id.lock() = transaction_id_from(&handshake.response_headers);

        let Some(event_tx) = self.event_tx.take() else {
            return Err(TransportError::Finished);
        };
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let payload = self.config.build_opening_payload().to_string();
        tokio::spawn(drive(
            handshake.socket,
            cmd_rx,
            event_tx,
            self.state.clone(),
            payload,
        ));
        self.cmd_tx = Some(cmd_tx);
        Ok(())
    }
}

/// Session driver: sends the synthesis payload, then forwards audio and
/// side-band frames in wire order.
async fn drive(
    mut socket: Box<dyn TransportSocket>,
    mut cmd_rx: mpsc::Receiver<Command>,
    events: mpsc::Sender<SynthesizeEvent>,
    state: Arc<Mutex<SessionState>>,
    opening_payload: String,
) {
    if let Err(error) = socket.send_text(opening_payload).await {
        *state.lock() = SessionState::Closed;
        let _ = events.send(SynthesizeEvent::Error(error)).await;
        return;
    }
    // No readiness handshake in this direction; audio may flow at once.
    *state.lock() = SessionState::Listening;
    let _ = events.send(SynthesizeEvent::Open).await;

    let mut close_sent = false;
    let mut commands_open = true;

    loop {
        tokio::select! {
            biased;

            command = cmd_rx.recv(), if commands_open => {
                match command {
                    Some(Command::Stop) => {
                        let _ = events.send(SynthesizeEvent::Stopping).await;
                    }
                    None => commands_open = false,
                }
                // Both a stop and a dropped stream end the session.
                *state.lock() = SessionState::Closing;
                if !close_sent {
                    close_sent = true;
                    if let Err(error) = socket.close().await {
                        let _ = events.send(SynthesizeEvent::Error(error)).await;
                    }
                }
            }

            event = socket.next_event() => match event {
                Some(SocketEvent::Text(text)) => {
                    let value: serde_json::Value = match serde_json::from_str(&text) {
                        Ok(value) => value,
                        Err(e) => {
                            let _ = events
                                .send(SynthesizeEvent::Error(TransportError::InvalidJson {
                                    message: e.to_string(),
                                    raw: text,
                                }))
                                .await;
                            continue;
                        }
                    };
                    let _ = events
                        .send(SynthesizeEvent::Message(MessageFrame::Text(value.clone())))
                        .await;

                    match InfoFrame::classify(&value) {
                        Ok(InfoFrame::BinaryStreams(streams)) => {
                            let _ = events.send(SynthesizeEvent::BinaryStreams(streams)).await;
                        }
                        Ok(InfoFrame::Marks(marks)) => {
                            let _ = events.send(SynthesizeEvent::Marks(marks)).await;
                        }
                        Ok(InfoFrame::Words(words)) => {
                            let _ = events.send(SynthesizeEvent::Words(words)).await;
                        }
                        Ok(InfoFrame::Error(message)) => {
                            let _ = events
                                .send(SynthesizeEvent::Error(TransportError::RemoteProtocol {
                                    message,
                                    raw: text,
                                }))
                                .await;
                        }
                        Ok(InfoFrame::Warnings(warnings)) => {
                            let _ = events.send(SynthesizeEvent::Warnings(warnings)).await;
                        }
                        Ok(InfoFrame::Unrecognized) | Err(_) => {
                            let _ = events
                                .send(SynthesizeEvent::Error(TransportError::UnrecognizedMessage {
                                    raw: text,
                                }))
                                .await;
                        }
                    }
                }
                Some(SocketEvent::Binary(data)) => {
                    let _ = events
                        .send(SynthesizeEvent::Message(MessageFrame::Binary(data.clone())))
                        .await;
                    let _ = events.send(SynthesizeEvent::Data(data)).await;
                }
                Some(SocketEvent::Error(message)) => {
                    let _ = events
                        .send(SynthesizeEvent::Error(TransportError::ConnectionError(message)))
                        .await;
                    // A close event may still follow and is handled
                    // independently.
                }
                Some(SocketEvent::Closed(info)) => {
                    *state.lock() = SessionState::Closed;
                    let _ = events.send(SynthesizeEvent::Close(info)).await;
                    break;
                }
                None => {
                    *state.lock() = SessionState::Closed;
                    break;
                }
            }
        }
    }
}
