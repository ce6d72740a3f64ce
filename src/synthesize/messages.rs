//! Wire messages for the synthesis direction.
//!
//! Audio arrives as binary frames. Interleaved text frames carry side-band
//! information - word/mark timings, stream metadata, warnings, errors - and
//! are classified by field presence, in the protocol's documented priority
//! order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Word timing information: `[word, start_time, end_time]` per entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordTimings {
    /// Timed words, in utterance order.
    pub words: Vec<(String, f64, f64)>,
}

/// SSML `<mark>` timings: `[mark_name, time]` per entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkTimings {
    /// Observed marks, in utterance order.
    pub marks: Vec<(String, f64)>,
}

/// Semantic category of one inbound text frame.
#[derive(Debug)]
pub(crate) enum InfoFrame {
    /// Metadata about the binary streams that follow.
    BinaryStreams(Value),
    /// SSML mark timings.
    Marks(MarkTimings),
    /// Word timings.
    Words(WordTimings),
    /// Frame with a non-empty `error` field.
    Error(String),
    /// Service warnings, e.g. unknown synthesis arguments.
    Warnings(Value),
    /// None of the known shapes.
    Unrecognized,
}

impl InfoFrame {
    /// Classify a parsed frame. Returns `Err` when a recognized field is
    /// present but its payload does not deserialize.
    pub(crate) fn classify(value: &Value) -> Result<InfoFrame, serde_json::Error> {
        if let Some(streams) = value.get("binary_streams") {
            return Ok(InfoFrame::BinaryStreams(streams.clone()));
        }
        if value.get("marks").is_some() {
            return Ok(InfoFrame::Marks(serde_json::from_value(value.clone())?));
        }
        if value.get("words").is_some() {
            return Ok(InfoFrame::Words(serde_json::from_value(value.clone())?));
        }
        if let Some(error) = value.get("error") {
            match error {
                Value::Null | Value::Bool(false) => {}
                Value::String(message) if message.is_empty() => {}
                Value::String(message) => return Ok(InfoFrame::Error(message.clone())),
                other => return Ok(InfoFrame::Error(other.to_string())),
            }
        }
        if let Some(warnings) = value.get("warnings") {
            return Ok(InfoFrame::Warnings(warnings.clone()));
        }
        Ok(InfoFrame::Unrecognized)
    }
}
