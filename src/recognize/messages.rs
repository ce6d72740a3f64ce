//! Wire messages for the recognition direction.
//!
//! Inbound frames are classified by field presence rather than an untagged
//! enum because a single frame may legitimately carry both `results` and
//! `speaker_labels`, and both must be surfaced independently.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The overloaded readiness sentinel: first occurrence means "ready for
/// audio", second means "fully drained, safe to close".
pub(crate) const READY_STATE: &str = "listening";

/// Serialized `{"action":"stop"}` closing control frame.
pub(crate) fn stop_frame() -> String {
    serde_json::json!({ "action": "stop" }).to_string()
}

// =============================================================================
// Recognition Results
// =============================================================================

/// A recognition results frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsPayload {
    /// Interim or final recognition results.
    pub results: Vec<RecognitionResult>,
    /// Index of the first result in the overall session.
    #[serde(default)]
    pub result_index: i32,
}

/// Single recognition result within a results frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionResult {
    /// Whether this result is final (not subject to change).
    #[serde(rename = "final")]
    pub is_final: bool,
    /// Transcription hypotheses, best first.
    #[serde(default)]
    pub alternatives: Vec<TranscriptionAlternative>,
    /// Keyword spotting results, when requested.
    #[serde(default)]
    pub keywords_result: Option<Value>,
    /// Word alternatives (confusion networks), when requested.
    #[serde(default)]
    pub word_alternatives: Option<Value>,
}

/// One transcription hypothesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionAlternative {
    /// Transcribed text.
    pub transcript: String,
    /// Confidence score (0.0 to 1.0); absent on interim results.
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Word timings: `[word, start_time, end_time]`.
    #[serde(default)]
    pub timestamps: Option<Vec<(String, f64, f64)>>,
    /// Per-word confidence: `[word, confidence]`.
    #[serde(default)]
    pub word_confidence: Option<Vec<(String, f64)>>,
}

// =============================================================================
// Speaker Labels
// =============================================================================

/// One speaker diarization entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerLabel {
    /// Segment start time in seconds.
    pub from: f64,
    /// Segment end time in seconds.
    pub to: f64,
    /// Speaker identifier (0, 1, 2, ...).
    pub speaker: i32,
    /// Confidence score for this label.
    pub confidence: f64,
    /// Whether this label is final.
    #[serde(rename = "final", default)]
    pub is_final: bool,
}

// =============================================================================
// Frame Classification
// =============================================================================

/// Semantic category of one inbound text frame. Exactly one category
/// matches per frame, except that `results` and `speaker_labels` may share
/// a frame.
#[derive(Debug)]
pub(crate) enum ServerFrame {
    /// Frame with a non-empty `error` field.
    Error(String),
    /// Frame with a `state` field; only the readiness sentinel is known.
    State(String),
    /// Results and/or speaker labels. At least one is present.
    Results {
        results: Option<ResultsPayload>,
        speaker_labels: Option<Vec<SpeakerLabel>>,
    },
    /// None of the known shapes.
    Unrecognized,
}

impl ServerFrame {
    /// Classify a parsed frame. Returns `Err` when a recognized field is
    /// present but its payload does not deserialize.
    pub(crate) fn classify(value: &Value) -> Result<ServerFrame, serde_json::Error> {
        if let Some(error) = value.get("error") {
            match error {
                Value::Null | Value::Bool(false) => {}
                Value::String(message) if message.is_empty() => {}
                Value::String(message) => return Ok(ServerFrame::Error(message.clone())),
                other => return Ok(ServerFrame::Error(other.to_string())),
            }
        }

        if let Some(state) = value.get("state").and_then(Value::as_str) {
            return Ok(ServerFrame::State(state.to_string()));
        }

        let has_results = value.get("results").is_some();
        let has_labels = value.get("speaker_labels").is_some();
        if has_results || has_labels {
            let results = if has_results {
                Some(serde_json::from_value(value.clone())?)
            } else {
                None
            };
            let speaker_labels = match value.get("speaker_labels") {
                Some(labels) => Some(serde_json::from_value(labels.clone())?),
                None => None,
            };
            return Ok(ServerFrame::Results { results, speaker_labels });
        }

        Ok(ServerFrame::Unrecognized)
    }
}
