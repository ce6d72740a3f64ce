//! Recognition session configuration: endpoint URL assembly, the opening
//! `start` frame, and content-type inference.

use http::HeaderMap;
use serde_json::json;

use crate::transport::query;

/// Default Speech-to-Text base URL. The `http`-prefixed form is also
/// accepted and rewritten to the WebSocket scheme.
pub const DEFAULT_RECOGNIZE_URL: &str = "wss://stream.watsonplatform.net/speech-to-text/api";

/// Model used when the caller supplies neither a model nor a custom
/// language model.
pub const DEFAULT_MODEL: &str = "en-US_BroadbandModel";

/// Options for one recognition session.
///
/// Query-string and opening-frame parameters are fixed allow-lists; anything
/// else a caller might want simply has no field here. All values are
/// optional except where the service defines a default.
#[derive(Debug, Clone, Default)]
pub struct RecognizeConfig {
    /// Base service URL. `http(s)` schemes are rewritten to `ws(s)`.
    pub url: Option<String>,
    /// Extra headers for the upgrade request. These win over headers the
    /// session adds itself (including the bearer token).
    pub headers: HeaderMap,

    // -- query-string parameters --
    /// IAM access token placed in the query string.
    pub access_token: Option<String>,
    /// Cloud Foundry Watson token; sent verbatim, never percent-encoded.
    pub watson_token: Option<String>,
    /// Base model for all requests on this connection.
    pub model: Option<String>,
    /// Custom language model GUID.
    pub language_customization_id: Option<String>,
    /// Custom acoustic model GUID.
    pub acoustic_customization_id: Option<String>,
    /// Version of the specified base model.
    pub base_model_version: Option<String>,
    /// Opt out of request data being used to improve the service.
    pub learning_opt_out: Option<bool>,
    /// Deprecated spelling of the learning opt-out, honored when the
    /// canonical option is unset.
    pub wdc_pl_opt_out: Option<bool>,
    /// Customer ID associated with all data on this connection.
    pub watson_metadata: Option<String>,

    // -- opening-frame parameters --
    /// Audio MIME type. Sniffed from the first chunk when absent.
    pub content_type: Option<String>,
    /// Weight of the custom language model against the base model.
    pub customization_weight: Option<f64>,
    /// Request processing metrics.
    pub processing_metrics: Option<bool>,
    /// Processing metrics interval in seconds.
    pub processing_metrics_interval: Option<f64>,
    /// Request detailed signal characteristics of the input audio.
    pub audio_metrics: Option<bool>,
    /// Seconds of silence after which the service closes the connection.
    pub inactivity_timeout: Option<i64>,
    /// Return word timing information.
    pub timestamps: Option<bool>,
    /// Return per-word confidence.
    pub word_confidence: Option<bool>,
    /// Return interim results as they are produced.
    pub interim_results: Option<bool>,
    /// Keywords to spot in the audio.
    pub keywords: Option<Vec<String>>,
    /// Lower confidence bound for keyword spotting.
    pub keywords_threshold: Option<f64>,
    /// Maximum alternative transcripts to return.
    pub max_alternatives: Option<u32>,
    /// Lower confidence bound for word alternatives.
    pub word_alternatives_threshold: Option<f64>,
    /// Mask profanity in the output.
    pub profanity_filter: Option<bool>,
    /// Convert dates, times, numbers etc. to conventional representations.
    pub smart_formatting: Option<bool>,
    /// Label which words were spoken by which participant.
    pub speaker_labels: Option<bool>,
    /// Grammar to use for the request.
    pub grammar_name: Option<String>,
    /// Redact numeric data from final transcripts.
    pub redaction: Option<bool>,

    // -- local stream tuning --
    /// Outbound high-water mark in bytes. Defaults to 16 KiB.
    pub high_water_mark: Option<usize>,
}

impl RecognizeConfig {
    /// Configuration with every option unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration with the base URL taken from
    /// `WATSON_SPEECH_TO_TEXT_URL`, if set.
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("WATSON_SPEECH_TO_TEXT_URL").ok(),
            ..Self::default()
        }
    }

    fn effective_learning_opt_out(&self) -> Option<bool> {
        self.learning_opt_out.or(self.wdc_pl_opt_out)
    }

    /// Assemble the endpoint URL from the base URL, the fixed path suffix
    /// and the allow-listed query parameters.
    pub(crate) fn build_url(&self) -> String {
        let base = query::websocket_base(self.url.as_deref().unwrap_or(DEFAULT_RECOGNIZE_URL));

        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(v) = &self.access_token {
            params.push(("access_token", v.clone()));
        }
        if let Some(v) = &self.watson_token {
            params.push(("watson-token", v.clone()));
        }
        if let Some(v) = &self.model {
            params.push(("model", v.clone()));
        }
        if let Some(v) = &self.language_customization_id {
            params.push(("language_customization_id", v.clone()));
        }
        if let Some(v) = &self.acoustic_customization_id {
            params.push(("acoustic_customization_id", v.clone()));
        }
        if let Some(v) = &self.base_model_version {
            params.push(("base_model_version", v.clone()));
        }
        if let Some(v) = self.effective_learning_opt_out() {
            params.push(("x-watson-learning-opt-out", v.to_string()));
        }
        if let Some(v) = &self.watson_metadata {
            params.push(("x-watson-metadata", v.clone()));
        }
        if self.model.is_none() && self.language_customization_id.is_none() {
            params.push(("model", DEFAULT_MODEL.to_string()));
        }

        format!("{base}/v1/recognize?{}", query::stringify(&params))
    }

    /// Build the opening `start` control frame from the allow-listed
    /// payload parameters.
    pub(crate) fn build_start_message(&self) -> serde_json::Value {
        let mut msg = json!({ "action": "start" });

        if let Some(v) = &self.content_type {
            msg["content-type"] = json!(v);
        }
        if let Some(v) = self.customization_weight {
            msg["customization_weight"] = json!(v);
        }
        if let Some(v) = self.processing_metrics {
            msg["processing_metrics"] = json!(v);
        }
        if let Some(v) = self.processing_metrics_interval {
            msg["processing_metrics_interval"] = json!(v);
        }
        if let Some(v) = self.audio_metrics {
            msg["audio_metrics"] = json!(v);
        }
        if let Some(v) = self.inactivity_timeout {
            msg["inactivity_timeout"] = json!(v);
        }
        if let Some(v) = self.timestamps {
            msg["timestamps"] = json!(v);
        }
        if let Some(v) = self.word_confidence {
            msg["word_confidence"] = json!(v);
        }
        if let Some(v) = self.interim_results {
            msg["interim_results"] = json!(v);
        }
        if let Some(v) = &self.keywords {
            msg["keywords"] = json!(v);
        }
        if let Some(v) = self.keywords_threshold {
            msg["keywords_threshold"] = json!(v);
        }
        if let Some(v) = self.max_alternatives {
            msg["max_alternatives"] = json!(v);
        }
        if let Some(v) = self.word_alternatives_threshold {
            msg["word_alternatives_threshold"] = json!(v);
        }
        if let Some(v) = self.profanity_filter {
            msg["profanity_filter"] = json!(v);
        }
        if let Some(v) = self.smart_formatting {
            msg["smart_formatting"] = json!(v);
        }
        if let Some(v) = self.speaker_labels {
            msg["speaker_labels"] = json!(v);
        }
        if let Some(v) = &self.grammar_name {
            msg["grammar_name"] = json!(v);
        }
        if let Some(v) = self.redaction {
            msg["redaction"] = json!(v);
        }

        msg
    }
}

/// Infer the audio MIME type from the first bytes of a stream.
///
/// Inference happens at most once per session, before the first frame is
/// sent, and only when the caller did not specify a content type.
pub fn content_type_from_header(header: &[u8]) -> Option<&'static str> {
    if header.len() < 4 {
        return None;
    }
    match &header[..4] {
        b"RIFF" => Some("audio/wav"),
        b"fLaC" => Some("audio/flac"),
        b"OggS" => Some("audio/ogg"),
        // EBML magic, shared by webm/mkv containers
        [0x1A, 0x45, 0xDF, 0xA3] => Some("audio/webm"),
        _ => None,
    }
}
