//! Streaming speech recognition: binary audio in, transcripts out.
//!
//! The session drives the service's duplex WebSocket protocol: an opening
//! `start` control frame configures recognition, audio flows as binary
//! frames once the service signals readiness, and a closing `stop` frame
//! ends the request. The readiness signal is deliberately overloaded by the
//! protocol - the first occurrence means "ready for audio", the second
//! "fully drained, safe to close" - and the session preserves that double
//! meaning as a single toggle.

pub mod config;
pub mod messages;
mod stream;


pub use config::{
    DEFAULT_MODEL, DEFAULT_RECOGNIZE_URL, RecognizeConfig, content_type_from_header,
};
pub use messages::{
    RecognitionResult, ResultsPayload, SpeakerLabel, TranscriptionAlternative,
};
pub use stream::{RecognizeEvent, RecognizeEvents, RecognizeSink, RecognizeStream};
