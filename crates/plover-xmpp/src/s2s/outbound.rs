//! Outbound dialback initiator.
//!
//! Opens a `jabber:server` stream to a remote domain, optionally secures
//! it, and proves ownership of a dialback key. The owning task learns
//! about progress through the [`ConnectionListener`] callbacks.

use std::sync::Arc;

use async_trait::async_trait;
use minidom::Element;
use rand::distr::Alphanumeric;
use rand::Rng;
use tracing::{info, instrument, warn};

use crate::extensions::{StreamFailure, StreamFeatures};
use crate::jid::Jid;
use crate::s2s::{dialback, ConnectionListener, NS_DIALBACK};
use crate::stream::{CloseOutcome, Handled, Stream, StreamCore, StreamHandler, TlsUpgrader, Transport};
use crate::xml::{element_to_string, ns, StreamHeader};
use crate::XmppError;

/// The outbound dialback state machine.
pub struct DialbackInitiator {
    /// The remote domain this stream dials back to.
    peer: Jid,
    /// Per-attempt secret behind the derived key.
    secret: String,
    /// Externally supplied key; derived from the secret when None.
    db_key: Option<String>,
    /// A pending inbound stream id to cross-verify once this stream opens.
    check_sid: Option<String>,
    listener: Arc<dyn ConnectionListener>,
    upgrader: Option<Box<dyn TlsUpgrader>>,
    stream_ready: bool,
}

impl DialbackInitiator {
    /// Build an initiator stream from `local` to the remote `peer`.
    ///
    /// `check_sid` carries the stream id of a pending inbound connection
    /// from the same peer, to be verified over this stream. `db_key`
    /// supplies an externally generated key; when None a fresh secret is
    /// drawn and the key derived from it.
    pub fn stream(
        local: Jid,
        peer: Jid,
        check_sid: Option<String>,
        db_key: Option<String>,
        listener: Arc<dyn ConnectionListener>,
        upgrader: Option<Box<dyn TlsUpgrader>>,
        transport: Transport,
    ) -> Stream<Self> {
        let core = StreamCore::new(local, Some(peer.clone()), ns::JABBER_SERVER, transport);
        let secret: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(15)
            .map(char::from)
            .collect();

        Stream::new(
            core,
            Self {
                peer,
                secret,
                db_key,
                check_sid,
                listener,
                upgrader,
                stream_ready: false,
            },
        )
    }

    /// Whether the peer has validated our key.
    pub fn stream_ready(&self) -> bool {
        self.stream_ready
    }

    /// The key for the current attempt, derived over the stream id the
    /// peer assigned.
    fn key(&self, core: &StreamCore) -> String {
        match self.db_key {
            Some(ref key) => key.clone(),
            None => dialback::generate_key(&self.secret, &self.peer, core.local(), core.stream_id()),
        }
    }

    /// Send the key exchange (and any pending cross-verification).
    async fn process_dialback(&mut self, core: &mut StreamCore) -> Result<(), XmppError> {
        let key = self.key(core);

        if let Some(sid) = self.check_sid.take() {
            let verify = dialback::build_verify(core.local(), &self.peer, &sid, &key);
            core.send_str(&verify).await?;
        }

        let result = dialback::build_result(core.local(), &self.peer, &key);
        core.send_str(&result).await
    }

    fn open_stream_tag(&self, core: &StreamCore) -> String {
        format!(
            "<?xml version='1.0'?><stream:stream xmlns='{}' id='{}' xmlns:stream='{}' xmlns:db='{}' from='{}' to='{}' version='1.0'>",
            ns::JABBER_SERVER,
            core.ids().generate(),
            ns::STREAM,
            NS_DIALBACK,
            core.local(),
            self.peer
        )
    }
}

#[async_trait]
impl StreamHandler for DialbackInitiator {
    #[instrument(name = "s2s.outbound.handshake", skip(self, core), fields(peer = %self.peer))]
    async fn handshake(&mut self, core: &mut StreamCore) -> Result<bool, XmppError> {
        let open = self.open_stream_tag(core);
        core.send_str(&open).await?;

        let header = core.read_header().await?;
        match header.id {
            Some(ref id) if !id.is_empty() => core.set_stream_id(id.clone()),
            _ => {
                return Err(XmppError::stream(format!(
                    "stream to {} invalid first packet",
                    self.peer
                )))
            }
        }

        info!(peer = %self.peer, stream_id = %core.stream_id(), "stream open");

        // Pre-1.0 peers never send features; exchange keys immediately.
        if header.version.is_none() {
            self.process_dialback(core).await?;
        }

        Ok(true)
    }

    async fn handle_element(
        &mut self,
        core: &mut StreamCore,
        element: &Element,
    ) -> Result<Handled, XmppError> {
        match (element.name(), element.ns().as_str()) {
            ("result", NS_DIALBACK) => {
                if element.attr("type") == Some("valid") {
                    self.stream_ready = true;
                    core.set_authenticated(true);
                    self.listener.ready(&self.peer);
                } else {
                    info!(peer = %self.peer, stream_id = %core.stream_id(), "dialback fail");
                }
                Ok(Handled::Consumed)
            }
            ("verify", NS_DIALBACK) => {
                self.listener.verify(
                    element.attr("from"),
                    element.attr("type"),
                    element.attr("id"),
                );
                Ok(Handled::Consumed)
            }
            ("features", ns::STREAM) => {
                let features = StreamFeatures::parse(element);
                if !core.secured()
                    && features.starttls.offered()
                    && self.upgrader.is_some()
                    && self.listener.securing(&self.peer)
                {
                    info!(peer = %self.peer, stream_id = %core.stream_id(), "securing");
                    core.send_str(&format!("<starttls xmlns='{}'/>", ns::TLS)).await?;
                } else {
                    self.process_dialback(core).await?;
                }
                Ok(Handled::Consumed)
            }
            ("proceed", ns::TLS) => {
                let upgrader = match self.upgrader.as_mut() {
                    Some(u) => u,
                    None => {
                        warn!(peer = %self.peer, "unsolicited proceed");
                        return Ok(Handled::Consumed);
                    }
                };
                let transport = core
                    .take_transport()
                    .ok_or_else(|| XmppError::internal("transport not installed"))?;
                let secured = upgrader.secure(transport).await?;
                core.install_transport(secured);
                core.set_secured(true);

                // Restart over the secured byte stream; the peer answers
                // with a fresh header and features.
                let open = self.open_stream_tag(core);
                core.send_str(&open).await?;
                Ok(Handled::Consumed)
            }
            ("error", _) => {
                let failure = StreamFailure::parse(element);
                self.listener.dialback_error(&self.peer, &failure);
                Ok(Handled::Consumed)
            }
            (name, _) => {
                warn!(
                    peer = %self.peer,
                    stream_id = %core.stream_id(),
                    element = %element_to_string(element).unwrap_or_else(|_| name.to_string()),
                    "unhandled element"
                );
                Ok(Handled::Consumed)
            }
        }
    }

    async fn handle_restart(
        &mut self,
        core: &mut StreamCore,
        header: &StreamHeader,
    ) -> Result<(), XmppError> {
        if core.secured() {
            if let Some(ref id) = header.id {
                core.set_stream_id(id.clone());
            }
        } else {
            warn!("stream restart before TLS");
        }
        Ok(())
    }

    async fn on_close(&mut self, _core: &mut StreamCore, outcome: &CloseOutcome<'_>) {
        match outcome {
            CloseOutcome::Clean => self.listener.finished(&self.peer, false),
            CloseOutcome::Dirty => self.listener.finished(&self.peer, true),
            CloseOutcome::Failed(e) => self.listener.exception(&self.peer, e),
        }
    }
}

impl Stream<DialbackInitiator> {
    /// Ask the peer's authoritative side to confirm a key presented on a
    /// pending inbound stream.
    pub async fn send_dialback_verify(&mut self, sid: &str, key: &str) -> Result<(), XmppError> {
        let (core, handler) = self.parts_mut();
        let verify = dialback::build_verify(core.local(), &handler.peer, sid, key);
        core.send_str(&verify).await
    }
}
