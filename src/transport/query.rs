//! Watson-style query string assembly.
//!
//! The service endpoint that validates auth tokens only accepts the *exact*
//! token string, even where it is invalid inside a URL; percent-encoding the
//! token makes the server reject it. Every other value is encoded normally.

use url::form_urlencoded;

/// Query parameter name whose value is passed through verbatim.
const RAW_TOKEN_PARAM: &str = "watson-token";

/// Percent-encode a single query value.
pub(crate) fn encode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Stringify query parameters, encoding every value except `watson-token`.
pub(crate) fn stringify(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(key, value)| {
            if *key == RAW_TOKEN_PARAM {
                format!("{key}={value}")
            } else {
                format!("{key}={}", encode(value))
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Rewrite an `http(s)` base URL to its `ws(s)` counterpart. URLs already
/// carrying a `ws` scheme are returned unchanged.
pub(crate) fn websocket_base(url: &str) -> String {
    match url.strip_prefix("http") {
        Some(rest) => format!("ws{rest}"),
        None => url.to_string(),
    }
}
