//! # plover-xmpp
//!
//! Embeddable XMPP stream engine: incremental parsing of the stanza
//! stream over any duplex byte connection, listener-based dispatch of
//! top-level stanzas, and the three connection-establishment protocols
//! built on the same loop.
//!
//! ## Architecture
//!
//! - **Stream engine**: one cooperative read loop per connection
//!   ([`stream::Stream`]), driven by a pluggable handshake strategy
//! - **Client login**: feature discovery, SASL PLAIN, resource binding
//! - **Component handshake**: shared-secret digest (outbound and inbound)
//! - **Server dialback**: key exchange, verification round-trips,
//!   optional STARTTLS, per-domain trust bookkeeping
//!
//! Transports are `tokio` IO trait objects; TLS lives behind the
//! [`stream::TlsUpgrader`] contract and is never linked here. Concurrency
//! is task-per-connection: per-stream state needs no locking, and the one
//! cross-stream structure (the pending dialback key registry) is
//! concurrency-safe and owned by the embedder.

pub mod client;
pub mod component;
pub mod config;
pub mod extensions;
pub mod ids;
pub mod jid;
pub mod s2s;
pub mod stanza;
pub mod stream;
pub mod xml;

mod error;

pub use client::{ClientLogin, ClientState, ClientStream};
pub use component::{ComponentAccept, ComponentLogin, ComponentState};
pub use config::{ClientConfig, ComponentConfig, ServerConfig};
pub use error::{generate_stream_error, stream_errors, XmppError};
pub use jid::Jid;
pub use s2s::{ConnectionListener, DialbackInitiator, DialbackResult, InboundServer, VerifyRegistry};
pub use stanza::{ExtensionParser, InfoQuery, Message, Presence, StanzaExtension};
pub use stream::{
    CloseOutcome, Handled, IqListener, MessageListener, PresenceListener, Stream, StreamCore,
    StreamHandler, StreamListener, TlsUpgrader, Transport,
};
pub use xml::{ns, StreamHeader};
