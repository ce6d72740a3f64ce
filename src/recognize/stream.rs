//! Streaming speech recognition over a single WebSocket connection.
//!
//! A [`RecognizeStream`] accepts binary audio through [`RecognizeStream::write`]
//! and yields transcription events through [`RecognizeStream::next_event`].
//! Nothing touches the network at construction time: the token fetch and the
//! WebSocket handshake happen on the first write, so a short-lived token is
//! still fresh when the socket starts transmitting and the first chunk can
//! drive content-type inference.
//!
//! # Architecture
//!
//! ```text
//! write()/finish()/stop() ──▶ command channel ──▶ ┌─────────────┐
//!                                                 │ driver task │──▶ socket
//! next_event() ◀──────────── event channel ◀───── └─────────────┘
//! ```
//!
//! The driver owns the socket and multiplexes outbound commands against
//! inbound frames in one `select!` loop, so frames are dispatched strictly
//! in wire order with a single dispatch in flight.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::auth::TokenProvider;
use crate::transport::{
    CloseInfo, DEFAULT_HIGH_WATER_MARK, SessionState, SocketConnector, SocketEvent, TransportError,
    TransportSocket, WsConnector, merge_bearer_token, transaction_id_from, wait_for_drain,
};

use super::config::{RecognizeConfig, content_type_from_header};
use super::messages::{READY_STATE, ResultsPayload, ServerFrame, SpeakerLabel, stop_frame};

const COMMAND_CAPACITY: usize = 32;
const EVENT_CAPACITY: usize = 256;

/// Events observed by the caller of a [`RecognizeStream`].
#[derive(Debug)]
pub enum RecognizeEvent {
    /// WebSocket handshake completed and the `start` frame was sent.
    Open,
    /// The service acknowledged readiness; buffered audio is now flowing.
    Listening,
    /// Every parsed inbound frame, for diagnostics.
    Message(serde_json::Value),
    /// Interim or final recognition results.
    Results(ResultsPayload),
    /// Speaker diarization labels. May arrive in the same wire frame as a
    /// results collection; both events fire.
    SpeakerLabels(Vec<SpeakerLabel>),
    /// Finalized transcript text (primary alternative of a final result).
    Data(String),
    /// Asynchronous session error. The socket may or may not survive it;
    /// see [`TransportError`] for the per-variant contract.
    Error(TransportError),
    /// [`RecognizeStream::stop`] was called.
    Stopping,
    /// The socket closed. Terminal.
    Close(CloseInfo),
}

enum Command {
    Data(Bytes),
    Finish,
    Stop,
}

/// Duplex streaming recognition session.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use watson_streaming::auth::IamTokenManager;
/// use watson_streaming::recognize::{RecognizeConfig, RecognizeEvent, RecognizeStream};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = RecognizeConfig {
///         model: Some("en-US_BroadbandModel".to_string()),
///         interim_results: Some(true),
///         ..Default::default()
///     };
///     let manager = Arc::new(IamTokenManager::new(std::env::var("WATSON_API_KEY")?)?);
///     let mut stream = RecognizeStream::with_token_provider(config, manager);
///
///     let audio = std::fs::read("speech.wav")?;
///     stream.write(audio.into()).await?;
///     stream.finish().await;
///
///     while let Some(event) = stream.next_event().await {
///         if let RecognizeEvent::Data(transcript) = event {
///             println!("{transcript}");
///         }
///     }
///     Ok(())
/// }
/// ```
pub struct RecognizeStream {
    sink: RecognizeSink,
    events: RecognizeEvents,
}

impl RecognizeStream {
    /// Create a session with static credentials (any auth header comes from
    /// `config.headers` or the query-string token options).
    pub fn new(config: RecognizeConfig) -> Self {
        Self::with_connector(config, None, Arc::new(WsConnector))
    }

    /// Create a session that fetches a bearer token from `provider` on
    /// first use.
    pub fn with_token_provider(config: RecognizeConfig, provider: Arc<dyn TokenProvider>) -> Self {
        Self::with_connector(config, Some(provider), Arc::new(WsConnector))
    }

    /// Create a session on a custom socket implementation.
    pub fn with_connector(
        config: RecognizeConfig,
        token_provider: Option<Arc<dyn TokenProvider>>,
        connector: Arc<dyn SocketConnector>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        Self {
            sink: RecognizeSink {
                config,
                token_provider,
                connector,
                state: Arc::new(Mutex::new(SessionState::Uninitialized)),
                transaction_id: Arc::new(Mutex::new(None)),
                event_tx: Some(event_tx),
                cmd_tx: None,
                finished: false,
            },
            events: RecognizeEvents { rx: event_rx },
        }
    }

    /// Send a chunk of audio. The first write authenticates and connects;
    /// chunks written before the service is ready are buffered, not
    /// dropped. Completion is subject to the session's backpressure.
    pub async fn write(&mut self, chunk: Bytes) -> Result<(), TransportError> {
        self.sink.write(chunk).await
    }

    /// Signal end of input. Sends the `stop` control frame once the socket
    /// is open and all buffered audio has been flushed, then waits for the
    /// service to finish processing and close.
    pub async fn finish(&mut self) {
        self.sink.finish().await;
    }

    /// Abrupt termination: emits [`RecognizeEvent::Stopping`] and closes
    /// the socket directly, skipping the graceful `stop` handshake.
    pub async fn stop(&mut self) {
        self.sink.stop().await;
    }

    /// Wait for the next session event. `None` means the session ended; a
    /// caller observing only the end of the stream must check for a
    /// preceding [`RecognizeEvent::Error`].
    pub async fn next_event(&mut self) -> Option<RecognizeEvent> {
        self.events.next().await
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.sink.state()
    }

    /// Watson transaction ID from the handshake response, once connected.
    pub fn transaction_id(&self) -> Option<String> {
        self.sink.transaction_id()
    }

    /// Split into independently owned write and read halves, for feeding
    /// audio and consuming events from different tasks.
    pub fn split(self) -> (RecognizeSink, RecognizeEvents) {
        (self.sink, self.events)
    }
}

/// Write half of a [`RecognizeStream`].
pub struct RecognizeSink {
    config: RecognizeConfig,
    token_provider: Option<Arc<dyn TokenProvider>>,
    connector: Arc<dyn SocketConnector>,
    state: Arc<Mutex<SessionState>>,
    transaction_id: Arc<Mutex<Option<String>>>,
    event_tx: Option<mpsc::Sender<RecognizeEvent>>,
    cmd_tx: Option<mpsc::Sender<Command>>,
    finished: bool,
}

impl RecognizeSink {
    /// See [`RecognizeStream::write`].
    pub async fn write(&mut self, chunk: Bytes) -> Result<(), TransportError> {
        if self.finished {
            return Err(TransportError::Finished);
        }
        self.ensure_initialized(&chunk).await?;
        if let Some(cmd_tx) = &self.cmd_tx {
            cmd_tx
                .send(Command::Data(chunk))
                .await
                .map_err(|_| TransportError::Finished)?;
        }
        Ok(())
    }

    /// See [`RecognizeStream::finish`].
    pub async fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        // Never initialized means no socket was opened and none will be;
        // there is nowhere to send a stop frame.
        if let Some(cmd_tx) = &self.cmd_tx {
            let _ = cmd_tx.send(Command::Finish).await;
        }
    }

    /// See [`RecognizeStream::stop`].
    pub async fn stop(&mut self) {
        self.finished = true;
        match &self.cmd_tx {
            Some(cmd_tx) => {
                let _ = cmd_tx.send(Command::Stop).await;
            }
            None => {
                *self.state.lock() = SessionState::Closed;
                if let Some(event_tx) = self.event_tx.take() {
                    let _ = event_tx.send(RecognizeEvent::Stopping).await;
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
            let _ = event_tx.send(RecognizeEvent::Error(error)).await;
        }
    }

    /// Authenticate and connect, exactly once, on the first write demand.
    /// Safe to call on every demand: once the session is live this is a
    /// no-op, and a failed token fetch ends the session without opening a
    /// socket.
    async fn ensure_initialized(&mut self, first_chunk: &[u8]) -> Result<(), TransportError> {
        if self.cmd_tx.is_some() {
            return Ok(());
        }

        if self.config.content_type.is_none() {
            match content_type_from_header(first_chunk) {
                Some(content_type) => self.config.content_type = Some(content_type.to_string()),
                None => {
                    let error = TransportError::UnrecognizedFormat;
                    self.fail(error.clone()).await;
                    return Err(error);
                }
            }
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
        debug!(%url, "opening recognition session");
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
        let start_message = self.config.build_start_message().to_string();
        let high_water_mark = self.config.high_water_mark.unwrap_or(DEFAULT_HIGH_WATER_MARK);
        tokio::spawn(drive(
            handshake.socket,
            cmd_rx,
            event_tx,
            self.state.clone(),
            start_message,
            high_water_mark,
        ));
        self.cmd_tx = Some(cmd_tx);
        Ok(())
    }
}

/// Read half of a [`RecognizeStream`].
pub struct RecognizeEvents {
    rx: mpsc::Receiver<RecognizeEvent>,
}

impl RecognizeEvents {
    /// See [`RecognizeStream::next_event`].
    pub async fn next(&mut self) -> Option<RecognizeEvent> {
        self.rx.recv().await
    }
}

/// Session driver: owns the socket, multiplexes commands and inbound
/// frames, enforces the start-before-data-before-stop ordering.
async fn drive(
    mut socket: Box<dyn TransportSocket>,
    mut cmd_rx: mpsc::Receiver<Command>,
    events: mpsc::Sender<RecognizeEvent>,
    state: Arc<Mutex<SessionState>>,
    start_message: String,
    high_water_mark: usize,
) {
    // The start frame is structurally the first thing on the wire.
    if let Err(error) = socket.send_text(start_message).await {
        *state.lock() = SessionState::Closed;
        let _ = events.send(RecognizeEvent::Error(error)).await;
        return;
    }
    *state.lock() = SessionState::OpenUnconfirmed;
    let _ = events.send(RecognizeEvent::Open).await;

    let mut listening = false;
    let mut pending: VecDeque<Bytes> = VecDeque::new();
    let mut finish_requested = false;
    let mut stop_sent = false;
    let mut close_sent = false;
    let mut commands_open = true;

    loop {
        tokio::select! {
            biased;

            command = cmd_rx.recv(), if commands_open => {
                // A dropped sink means local input ended.
                if command.is_none() {
                    commands_open = false;
                }
                let finish = matches!(command, Some(Command::Finish) | None);

                match command {
                    Some(Command::Data(chunk)) => {
                        if listening {
                            if let Err(error) = socket.send_binary(chunk).await {
                                let _ = events.send(RecognizeEvent::Error(error)).await;
                            } else {
                                wait_for_drain(socket.as_ref(), high_water_mark).await;
                            }
                        } else {
                            // Not ready yet; hold the chunk, never drop it.
                            pending.push_back(chunk);
                        }
                    }
                    Some(Command::Stop) => {
                        let _ = events.send(RecognizeEvent::Stopping).await;
                        listening = false;
                        pending.clear();
                        *state.lock() = SessionState::Closing;
                        if !close_sent {
                            close_sent = true;
                            if let Err(error) = socket.close().await {
                                let _ = events.send(RecognizeEvent::Error(error)).await;
                            }
                        }
                    }
                    _ => {}
                }

                if finish {
                    finish_requested = true;
                    // Stop goes out now only if no buffered audio would end
                    // up behind it; otherwise it follows the flush.
                    if pending.is_empty() && !stop_sent && !close_sent {
                        stop_sent = true;
                        if let Err(error) = socket.send_text(stop_frame()).await {
                            let _ = events.send(RecognizeEvent::Error(error)).await;
                        }
                    }
                }
            }

            event = socket.next_event() => match event {
                Some(SocketEvent::Text(text)) => {
                    let value: serde_json::Value = match serde_json::from_str(&text) {
                        Ok(value) => value,
                        Err(e) => {
                            let _ = events
                                .send(RecognizeEvent::Error(TransportError::InvalidJson {
                                    message: e.to_string(),
                                    raw: text,
                                }))
                                .await;
                            continue;
                        }
                    };
                    let _ = events.send(RecognizeEvent::Message(value.clone())).await;

                    match ServerFrame::classify(&value) {
                        Ok(ServerFrame::Error(message)) => {
                            // The service is expected to close the socket
                            // itself after reporting an error.
                            let _ = events
                                .send(RecognizeEvent::Error(TransportError::RemoteProtocol {
                                    message,
                                    raw: text,
                                }))
                                .await;
                        }
                        Ok(ServerFrame::State(name)) if name == READY_STATE => {
                            if close_sent {
                                // Already closing; ignore late readiness.
                            } else if listening {
                                // Second occurrence: fully drained, close
                                // from this end.
                                listening = false;
                                *state.lock() = SessionState::Closing;
                                close_sent = true;
                                if let Err(error) = socket.close().await {
                                    let _ = events.send(RecognizeEvent::Error(error)).await;
                                }
                            } else {
                                listening = true;
                                *state.lock() = SessionState::Listening;
                                let _ = events.send(RecognizeEvent::Listening).await;
                                while let Some(chunk) = pending.pop_front() {
                                    if let Err(error) = socket.send_binary(chunk).await {
                                        let _ = events.send(RecognizeEvent::Error(error)).await;
                                        break;
                                    }
                                    wait_for_drain(socket.as_ref(), high_water_mark).await;
                                }
                                if finish_requested && pending.is_empty() && !stop_sent {
                                    stop_sent = true;
                                    if let Err(error) = socket.send_text(stop_frame()).await {
                                        let _ = events.send(RecognizeEvent::Error(error)).await;
                                    }
                                }
                            }
                        }
                        Ok(ServerFrame::State(name)) => {
                            warn!(state = %name, "unrecognized state from service");
                            let _ = events
                                .send(RecognizeEvent::Error(TransportError::UnrecognizedMessage {
                                    raw: text,
                                }))
                                .await;
                        }
                        Ok(ServerFrame::Results { results, speaker_labels }) => {
                            if let Some(results) = results {
                                let finals: Vec<String> = results
                                    .results
                                    .iter()
                                    .filter(|result| result.is_final)
                                    .filter_map(|result| {
                                        result.alternatives.first().map(|alt| alt.transcript.clone())
                                    })
                                    .collect();
                                let _ = events.send(RecognizeEvent::Results(results)).await;
                                for transcript in finals {
                                    let _ = events.send(RecognizeEvent::Data(transcript)).await;
                                }
                            }
                            if let Some(labels) = speaker_labels {
                                let _ = events.send(RecognizeEvent::SpeakerLabels(labels)).await;
                            }
                        }
                        Ok(ServerFrame::Unrecognized) | Err(_) => {
                            let _ = events
                                .send(RecognizeEvent::Error(TransportError::UnrecognizedMessage {
                                    raw: text,
                                }))
                                .await;
                        }
                    }
                }
                Some(SocketEvent::Binary(data)) => {
                    debug!(len = data.len(), "binary frame on recognition channel");
                    let _ = events
                        .send(RecognizeEvent::Error(TransportError::UnexpectedBinary))
                        .await;
                }
                Some(SocketEvent::Error(message)) => {
                    listening = false;
                    let _ = events
                        .send(RecognizeEvent::Error(TransportError::ConnectionError(message)))
                        .await;
                    // A close event may still follow; it is handled
                    // independently, not suppressed.
                }
                Some(SocketEvent::Closed(info)) => {
                    listening = false;
                    *state.lock() = SessionState::Closed;
                    let _ = events.send(RecognizeEvent::Close(info)).await;
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
