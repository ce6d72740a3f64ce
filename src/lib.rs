//! Streaming WebSocket clients for IBM Watson speech services.
//!
//! Two symmetric sessions share one transport design:
//!
//! - [`recognize::RecognizeStream`] - Speech-to-Text: binary audio in,
//!   transcription events out.
//! - [`synthesize::SynthesizeStream`] - Text-to-Speech: text in (via the
//!   configuration), binary audio out.
//!
//! Both defer authentication and connection until first use, buffer data
//! written before the service is ready, dispatch inbound frames strictly in
//! wire order, and apply backpressure against the socket's send buffer.
//! Bearer tokens come from a pluggable [`auth::TokenProvider`];
//! [`auth::IamTokenManager`] implements the IBM Cloud IAM exchange with
//! caching and refresh.
//!
//! Sessions never retry on their own. A failed session surfaces exactly one
//! error on its event channel and ends; constructing a new stream is the
//! retry mechanism.

pub mod auth;
pub mod recognize;
pub mod synthesize;
pub mod transport;

pub use auth::{AuthError, IamTokenManager, StaticTokenProvider, TokenProvider};
pub use recognize::{RecognizeConfig, RecognizeEvent, RecognizeStream};
pub use synthesize::{SynthesizeConfig, SynthesizeEvent, SynthesizeStream};
pub use transport::{
    CloseInfo, SessionState, SocketConnector, TransportError, TransportSocket, WsConnector,
};
