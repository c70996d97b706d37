//! Extension payloads and protocol elements understood by the engine.
//!
//! Stanza payloads (`bind`, `disco`) implement the registry contract;
//! `features` and `stream_error` are stream-negotiation elements parsed
//! directly by the handshake state machines.

mod bind;
mod disco;
mod features;
mod stream_error;

pub use bind::{BindParser, ResourceBinding};
pub use disco::{DiscoIdentity, DiscoInfo, DiscoInfoParser};
pub use features::{FeatureSupport, StreamFeatures};
pub use stream_error::StreamFailure;
