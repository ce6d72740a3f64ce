//! Streaming speech synthesis: text in, binary audio out.
//!
//! The session sends its allow-listed payload (`text`, `accept`, `timings`)
//! as the opening frame right after the WebSocket handshake and then
//! forwards the service's binary audio frames, surfacing interleaved JSON
//! side-band frames (word/mark timings, warnings, errors) as separate
//! events.

pub mod config;
pub mod messages;
mod stream;

#[cfg(test)]
mod tests;

pub use config::{DEFAULT_SYNTHESIZE_URL, SynthesizeConfig};
pub use messages::{MarkTimings, WordTimings};
pub use stream::{MessageFrame, SynthesizeEvent, SynthesizeStream};
