//! Synthesis session configuration: endpoint URL assembly and the opening
//! payload frame.

use http::HeaderMap;
use serde_json::json;

use crate::transport::query;

/// Default Text-to-Speech base URL. The `http`-prefixed form is also
/// accepted and rewritten to the WebSocket scheme.
pub const DEFAULT_SYNTHESIZE_URL: &str = "wss://stream.watsonplatform.net/text-to-speech/api";

/// Options for one synthesis session.
///
/// `text` is required; everything else is drawn from the protocol's fixed
/// allow-lists for the query string and the opening payload.
#[derive(Debug, Clone, Default)]
pub struct SynthesizeConfig {
    /// Base service URL. `http(s)` schemes are rewritten to `ws(s)`.
    pub url: Option<String>,
    /// Extra headers for the upgrade request. These win over headers the
    /// session adds itself (including the bearer token).
    pub headers: HeaderMap,

    // -- opening-payload parameters --
    /// Text to synthesize, plain or SSML-annotated. At most 5 KB.
    pub text: String,
    /// Requested audio format (MIME type).
    pub accept: Option<String>,
    /// Which strings of the input to return word timing information for.
    pub timings: Option<Vec<String>>,

    // -- query-string parameters --
    /// Voice used for the synthesis.
    pub voice: Option<String>,
    /// Custom voice model GUID.
    pub customization_id: Option<String>,
    /// Cloud Foundry Watson token; sent verbatim, never percent-encoded.
    pub watson_token: Option<String>,
    /// IAM access token placed in the query string.
    pub access_token: Option<String>,
    /// Opt out of request data being used to improve the service.
    pub learning_opt_out: Option<bool>,
    /// Customer ID associated with data on this connection.
    pub watson_metadata: Option<String>,
}

impl SynthesizeConfig {
    /// Configuration synthesizing `text` with every option unset.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Configuration with the base URL taken from
    /// `WATSON_TEXT_TO_SPEECH_URL`, if set.
    pub fn from_env(text: impl Into<String>) -> Self {
        Self {
            url: std::env::var("WATSON_TEXT_TO_SPEECH_URL").ok(),
            ..Self::new(text)
        }
    }

    /// Assemble the endpoint URL from the base URL, the fixed path suffix
    /// and the allow-listed query parameters.
    pub(crate) fn build_url(&self) -> String {
        let base = query::websocket_base(self.url.as_deref().unwrap_or(DEFAULT_SYNTHESIZE_URL));

        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(v) = &self.watson_token {
            params.push(("watson-token", v.clone()));
        }
        if let Some(v) = &self.voice {
            params.push(("voice", v.clone()));
        }
        if let Some(v) = &self.customization_id {
            params.push(("customization_id", v.clone()));
        }
        if let Some(v) = self.learning_opt_out {
            params.push(("x-watson-learning-opt-out", v.to_string()));
        }
        if let Some(v) = &self.watson_metadata {
            params.push(("x-watson-metadata", v.clone()));
        }
        if let Some(v) = &self.access_token {
            params.push(("access_token", v.clone()));
        }

        format!("{base}/v1/synthesize?{}", query::stringify(&params))
    }

    /// Build the opening payload from the allow-listed fields. Unlike the
    /// recognition direction there is no `action` discriminator; the
    /// payload itself is the request.
    pub(crate) fn build_opening_payload(&self) -> serde_json::Value {
        let mut payload = json!({ "text": self.text });
        if let Some(v) = &self.accept {
            payload["accept"] = json!(v);
        }
        if let Some(v) = &self.timings {
            payload["timings"] = json!(v);
        }
        payload
    }
}
