//! Server-to-server trust establishment.
//!
//! Two roles share one trust primitive: the outbound [`DialbackInitiator`]
//! opens a stream to a remote domain and proves key ownership; the inbound
//! [`InboundServer`] accepts streams, answers verification requests and
//! gates stanza routing on established trust. The pending-key registry is
//! the only state shared between connection loops and is owned above the
//! stream layer.

pub mod dialback;
pub mod inbound;
pub mod outbound;

use dashmap::DashMap;

use crate::extensions::StreamFailure;
use crate::jid::Jid;
use crate::XmppError;

pub use dialback::{generate_key, verify_key, DialbackResult};
pub use inbound::InboundServer;
pub use outbound::DialbackInitiator;

/// Server dialback namespace.
pub const NS_DIALBACK: &str = "jabber:server:dialback";

/// Dialback feature namespace (stream features advertisement).
pub const NS_DIALBACK_FEATURES: &str = "urn:xmpp:features:dialback";

/// Callbacks from the dialback state machines to their owner.
///
/// One listener serves both roles; every method has a no-op default so
/// implementations pick what they care about. `finished` / `exception`
/// fire exactly once per outbound stream.
pub trait ConnectionListener: Send + Sync {
    /// Outbound: decide whether to secure when the peer offers STARTTLS.
    fn securing(&self, _peer: &Jid) -> bool {
        false
    }

    /// Outbound: the peer validated our key; the stream is trust-ready.
    fn ready(&self, _peer: &Jid) {}

    /// Outbound: a `db:verify` arrived for cross-checking against a
    /// pending outbound key.
    fn verify(&self, _from: Option<&str>, _type: Option<&str>, _stream_id: Option<&str>) {}

    /// Outbound: the peer reported a stream-level error during dialback.
    fn dialback_error(&self, _peer: &Jid, _failure: &StreamFailure) {}

    /// Outbound: the stream ended. `dirty` when the transport dropped
    /// without closing the document.
    fn finished(&self, _peer: &Jid, _dirty: bool) {}

    /// Outbound: the stream died on an unexpected failure.
    fn exception(&self, _peer: &Jid, _error: &XmppError) {}

    /// Inbound: a remote domain presented a dialback key for external
    /// verification against its authoritative server.
    fn dialback_key_received(&self, _from: &Jid, _stream_id: &str, _key: &str) {}
}

/// No-op listener for streams whose owner does not care.
pub struct NullConnectionListener;

impl ConnectionListener for NullConnectionListener {}

/// Concurrency-safe registry of pending outbound dialback keys, keyed by
/// peer domain.
///
/// Independent connection loops read and write this map: the outbound
/// initiator records the key it sent, and inbound acceptors answer
/// `db:verify` requests against it. Owned by the caller, above any single
/// stream.
#[derive(Default)]
pub struct VerifyRegistry {
    pending: DashMap<String, String>,
}

impl VerifyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the pending key for a peer domain, replacing any previous one.
    pub fn insert(&self, domain: &str, key: impl Into<String>) {
        self.pending.insert(domain.to_string(), key.into());
    }

    /// The pending key for a domain, if any.
    pub fn get(&self, domain: &str) -> Option<String> {
        self.pending.get(domain).map(|entry| entry.value().clone())
    }

    /// Whether the presented key matches the pending one. Compares in
    /// constant time; absent entries never match.
    pub fn matches(&self, domain: &str, presented: &str) -> bool {
        match self.pending.get(domain) {
            Some(entry) => dialback::constant_time_eq(entry.as_bytes(), presented.as_bytes()),
            None => false,
        }
    }

    /// Remove the entry if and only if the presented key matches. Returns
    /// whether it matched.
    pub fn compare_and_remove(&self, domain: &str, presented: &str) -> bool {
        self.pending
            .remove_if(domain, |_, key| {
                dialback::constant_time_eq(key.as_bytes(), presented.as_bytes())
            })
            .is_some()
    }

    /// Drop the pending key for a domain.
    pub fn remove(&self, domain: &str) {
        self.pending.remove(domain);
    }
}
