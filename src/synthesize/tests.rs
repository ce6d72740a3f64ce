//! Synthesis session protocol tests.

use std::sync::atomic::Ordering;
use std::time::Duration;

use bytes::Bytes;
use http::HeaderMap;
use http::header::AUTHORIZATION;

use super::config::SynthesizeConfig;
use super::stream::{SynthesizeEvent, SynthesizeStream};
use crate::transport::testing::{CountingProvider, ScriptedConnector, ScriptedSocket, SocketLog};
use crate::transport::{CloseInfo, SessionState, SocketEvent, TransportError};

fn binary_after(ms: u64, data: &'static [u8]) -> (Duration, SocketEvent) {
    (Duration::from_millis(ms), SocketEvent::Binary(Bytes::from_static(data)))
}

fn text_after(ms: u64, json: &str) -> (Duration, SocketEvent) {
    (Duration::from_millis(ms), SocketEvent::Text(json.to_string()))
}

fn closed_after(ms: u64) -> (Duration, SocketEvent) {
    (
        Duration::from_millis(ms),
        SocketEvent::Closed(CloseInfo {
            code: Some(1000),
            reason: String::new(),
        }),
    )
}

async fn collect(stream: &mut SynthesizeStream) -> Vec<SynthesizeEvent> {
    let mut events = Vec::new();
    while let Some(event) = stream.next_event().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_audio_and_timings_flow_in_wire_order() {
    let log = SocketLog::new();
    let socket = ScriptedSocket::new(
        vec![
            binary_after(10, b"chunk-one"),
            text_after(5, r#"{"words": [["hello", 0.0, 0.4]]}"#),
            binary_after(5, b"chunk-two"),
            closed_after(10),
        ],
        log.clone(),
    );
    let connector = ScriptedConnector::new(socket);
    let config = SynthesizeConfig {
        accept: Some("audio/ogg;codecs=opus".to_string()),
        timings: Some(vec!["words".to_string()]),
        ..SynthesizeConfig::new("hello")
    };
    let mut stream = SynthesizeStream::with_connector(config, None, connector.clone()).unwrap();

    let events = collect(&mut stream).await;

    let kinds: Vec<&str> = events
        .iter()
        .filter_map(|event| match event {
            SynthesizeEvent::Open => Some("open"),
            SynthesizeEvent::Data(_) => Some("data"),
            SynthesizeEvent::Words(_) => Some("words"),
            SynthesizeEvent::Close(_) => Some("close"),
            SynthesizeEvent::Message(_) => None,
            other => panic!("unexpected event: {other:?}"),
        })
        .collect();
    assert_eq!(kinds, vec!["open", "data", "words", "data", "close"]);

    let audio: Vec<&Bytes> = events
        .iter()
        .filter_map(|event| match event {
            SynthesizeEvent::Data(data) => Some(data),
            _ => None,
        })
        .collect();
    assert_eq!(audio[0].as_ref(), b"chunk-one");
    assert_eq!(audio[1].as_ref(), b"chunk-two");

    assert!(events.iter().any(
        |event| matches!(event, SynthesizeEvent::Words(words) if words.words[0].0 == "hello")
    ));
    assert_eq!(stream.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_opening_payload_is_the_only_outbound_frame() {
    let log = SocketLog::new();
    let socket = ScriptedSocket::new(vec![closed_after(20)], log.clone());
    let connector = ScriptedConnector::new(socket);
    let config = SynthesizeConfig {
        accept: Some("audio/wav".to_string()),
        ..SynthesizeConfig::new("read me")
    };
    let mut stream = SynthesizeStream::with_connector(config, None, connector.clone()).unwrap();

    collect(&mut stream).await;

    let sent = log.sent_frames();
    assert_eq!(sent.len(), 1);
    let payload = sent[0].as_text().unwrap();
    assert!(payload.contains(r#""text":"read me""#));
    assert!(payload.contains(r#""accept":"audio/wav""#));
    assert!(!payload.contains("action"));
}

#[tokio::test]
async fn test_error_frame_surfaces_without_audio() {
    let log = SocketLog::new();
    let socket = ScriptedSocket::new(
        vec![text_after(10, r#"{"error": "Invalid voice name"}"#), closed_after(10)],
        log.clone(),
    );
    let connector = ScriptedConnector::new(socket);
    let mut stream =
        SynthesizeStream::with_connector(SynthesizeConfig::new("hi"), None, connector.clone())
            .unwrap();

    let events = collect(&mut stream).await;

    let errors: Vec<&TransportError> = events
        .iter()
        .filter_map(|event| match event {
            SynthesizeEvent::Error(error) => Some(error),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    match errors[0] {
        TransportError::RemoteProtocol { message, raw } => {
            assert!(message.contains("Invalid voice name"));
            assert!(raw.contains("Invalid voice name"));
        }
        other => panic!("expected remote protocol error, got {other:?}"),
    }
    assert!(!events.iter().any(|event| matches!(event, SynthesizeEvent::Data(_))));
}

#[tokio::test]
async fn test_invalid_json_side_band_frame() {
    let log = SocketLog::new();
    let socket = ScriptedSocket::new(
        vec![
            (Duration::from_millis(10), SocketEvent::Text("garbage".to_string())),
            closed_after(10),
        ],
        log.clone(),
    );
    let connector = ScriptedConnector::new(socket);
    let mut stream =
        SynthesizeStream::with_connector(SynthesizeConfig::new("hi"), None, connector.clone())
            .unwrap();

    let events = collect(&mut stream).await;
    assert!(events.iter().any(|event| matches!(
        event,
        SynthesizeEvent::Error(TransportError::InvalidJson { raw, .. }) if raw == "garbage"
    )));
}

#[tokio::test]
async fn test_warnings_frame_is_a_separate_event() {
    let log = SocketLog::new();
    let socket = ScriptedSocket::new(
        vec![
            text_after(10, r#"{"warnings": ["Unknown arguments: pitch"]}"#),
            closed_after(10),
        ],
        log.clone(),
    );
    let connector = ScriptedConnector::new(socket);
    let mut stream =
        SynthesizeStream::with_connector(SynthesizeConfig::new("hi"), None, connector.clone())
            .unwrap();

    let events = collect(&mut stream).await;
    assert!(events.iter().any(|event| matches!(event, SynthesizeEvent::Warnings(_))));
    assert!(!events.iter().any(|event| matches!(event, SynthesizeEvent::Error(_))));
}

#[tokio::test]
async fn test_empty_text_rejected_at_construction() {
    let log = SocketLog::new();
    let socket = ScriptedSocket::new(vec![], log);
    let connector = ScriptedConnector::new(socket);
    let result =
        SynthesizeStream::with_connector(SynthesizeConfig::default(), None, connector.clone());
    assert!(matches!(result, Err(TransportError::Configuration(_))));
    assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_token_fetched_on_first_read_demand() {
    let log = SocketLog::new();
    let socket = ScriptedSocket::new(vec![closed_after(20)], log.clone());
    let connector = ScriptedConnector::new(socket);
    let provider = CountingProvider::ok("tok");
    let mut stream = SynthesizeStream::with_connector(
        SynthesizeConfig::new("hi"),
        Some(provider.clone()),
        connector.clone(),
    )
    .unwrap();

    // construction is cheap: no token, no socket
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    assert_eq!(connector.connects.load(Ordering::SeqCst), 0);

    collect(&mut stream).await;

    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    let headers = connector.seen_headers.lock().clone().unwrap();
    assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer tok");
}

#[tokio::test]
async fn test_caller_headers_win_over_fetched_token() {
    let log = SocketLog::new();
    let socket = ScriptedSocket::new(vec![closed_after(20)], log.clone());
    let connector = ScriptedConnector::new(socket);
    let provider = CountingProvider::ok("fetched");
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, "Bearer caller-wins".parse().unwrap());
    let config = SynthesizeConfig {
        headers,
        ..SynthesizeConfig::new("hi")
    };
    let mut stream =
        SynthesizeStream::with_connector(config, Some(provider.clone()), connector.clone()).unwrap();

    collect(&mut stream).await;

    let seen = connector.seen_headers.lock().clone().unwrap();
    assert_eq!(seen.get(AUTHORIZATION).unwrap(), "Bearer caller-wins");
}

#[tokio::test]
async fn test_token_failure_never_opens_a_socket() {
    let log = SocketLog::new();
    let socket = ScriptedSocket::new(vec![], log.clone());
    let connector = ScriptedConnector::new(socket);
    let provider = CountingProvider::failing("service down");
    let mut stream = SynthesizeStream::with_connector(
        SynthesizeConfig::new("hi"),
        Some(provider.clone()),
        connector.clone(),
    )
    .unwrap();

    let events = collect(&mut stream).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        SynthesizeEvent::Error(TransportError::AuthenticationFailed(message))
            if message.contains("service down")
    ));
    assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
    assert_eq!(stream.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_stop_closes_abruptly() {
    let log = SocketLog::new();
    let socket = ScriptedSocket::new(vec![binary_after(30, b"late-audio")], log.clone());
    let connector = ScriptedConnector::new(socket);
    let mut stream =
        SynthesizeStream::with_connector(SynthesizeConfig::new("hi"), None, connector.clone())
            .unwrap();

    // first read demand connects; then cut the session short
    let first = stream.next_event().await;
    assert!(matches!(first, Some(SynthesizeEvent::Open)));
    stream.stop().await;
    let events = collect(&mut stream).await;

    assert!(events.iter().any(|event| matches!(event, SynthesizeEvent::Stopping)));
    assert!(events.iter().any(|event| matches!(event, SynthesizeEvent::Close(_))));
    assert_eq!(log.close_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_transaction_id_from_handshake() {
    let log = SocketLog::new();
    let socket = ScriptedSocket::new(vec![closed_after(20)], log.clone());
    let mut response_headers = HeaderMap::new();
    response_headers.insert("x-global-transaction-id", "txn-9".parse().unwrap());
    let connector = ScriptedConnector::with_response_headers(socket, response_headers);
    let mut stream =
        SynthesizeStream::with_connector(SynthesizeConfig::new("hi"), None, connector.clone())
            .unwrap();

    assert_eq!(stream.transaction_id(), None);
    collect(&mut stream).await;
    assert_eq!(stream.transaction_id().as_deref(), Some("txn-9"));
}
