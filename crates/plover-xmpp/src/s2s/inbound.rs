//! Inbound server-to-server acceptor.
//!
//! Accepts a `jabber:server` stream from a remote server, answers its
//! dialback traffic, and routes stanzas only from domains whose dialback
//! completed. Trust is granted in exactly one place:
//! [`Stream::send_dialback_result`] with a `valid` result.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use minidom::Element;
use tracing::{debug, info, instrument, warn};

use crate::config::ServerConfig;
use crate::jid::Jid;
use crate::s2s::{dialback, ConnectionListener, DialbackResult, VerifyRegistry, NS_DIALBACK};
use crate::stream::{CloseOutcome, Handled, Stream, StreamCore, StreamHandler, TlsUpgrader, Transport};
use crate::xml::{element_to_string, ns, StreamHeader};
use crate::XmppError;

/// The inbound server-to-server state machine.
pub struct InboundServer {
    config: ServerConfig,
    listener: Arc<dyn ConnectionListener>,
    upgrader: Option<Box<dyn TlsUpgrader>>,
    registry: Arc<VerifyRegistry>,
    /// Domains whose dialback completed on this stream.
    trusted: HashSet<Jid>,
}

impl InboundServer {
    /// Build an acceptor stream for a freshly accepted connection.
    pub fn stream(
        config: ServerConfig,
        listener: Arc<dyn ConnectionListener>,
        upgrader: Option<Box<dyn TlsUpgrader>>,
        registry: Arc<VerifyRegistry>,
        transport: Transport,
    ) -> Stream<Self> {
        let local = Jid::domain(config.domain.clone());
        let core = StreamCore::new(local, None, ns::JABBER_SERVER, transport);

        Stream::new(
            core,
            Self {
                config,
                listener,
                upgrader,
                registry,
                trusted: HashSet::new(),
            },
        )
    }

    /// The domains trusted on this stream so far.
    pub fn trusted_domains(&self) -> &HashSet<Jid> {
        &self.trusted
    }

    fn is_trusted(&self, domain: &Jid) -> bool {
        self.trusted.contains(domain)
    }

    async fn send_open_stream(
        &self,
        core: &mut StreamCore,
        peer_host: Option<&str>,
        versioned: bool,
    ) -> Result<(), XmppError> {
        let mut open = format!(
            "<?xml version='1.0'?><stream:stream xmlns='{}' xmlns:stream='{}' xmlns:db='{}' from='{}' id='{}' version='1.0'>",
            ns::JABBER_SERVER,
            ns::STREAM,
            NS_DIALBACK,
            core.local(),
            core.stream_id()
        );
        if versioned {
            open.push_str("<stream:features>");
            let tls_usable = self.upgrader.is_some()
                && !core.secured()
                && !peer_host.map(|h| self.config.is_tls_broken(h)).unwrap_or(false);
            if tls_usable {
                open.push_str(&format!(
                    "<starttls xmlns='{}'><optional/></starttls>",
                    ns::TLS
                ));
            }
            open.push_str("</stream:features>");
        }
        core.send_str(&open).await
    }

    /// Validate addressing and trust for an inbound stanza.
    fn check_from_to(&self, core: &StreamCore, element: &Element) -> bool {
        let (from, to) = match (element.attr("from"), element.attr("to")) {
            (Some(f), Some(t)) if !f.is_empty() && !t.is_empty() => (f, t),
            _ => return false,
        };

        let to_jid: Jid = match to.parse() {
            Ok(jid) => jid,
            Err(_) => return false,
        };
        if to_jid.domain_part() != core.local().domain_part() {
            return false;
        }

        let from_jid: Jid = match from.parse() {
            Ok(jid) => jid,
            Err(_) => return false,
        };
        self.is_trusted(&from_jid.domain_jid())
    }

    async fn handle_dialback_result(
        &mut self,
        core: &mut StreamCore,
        element: &Element,
    ) -> Result<Handled, XmppError> {
        let local = core.local().to_string();
        let dfrom = match element.attr("from") {
            Some(f) => f.to_string(),
            None => {
                warn!(stream_id = %core.stream_id(), "dialback result without sender");
                return Ok(Handled::Stop);
            }
        };
        let dto = element.attr("to").map(str::to_string);

        info!(from = %dfrom, to = ?dto, stream_id = %core.stream_id(), "asking for dialback");

        // A remote claiming to be this server (or a subdomain of it) is
        // spoofing; cut the stream without a reply.
        if dfrom == local || dfrom.ends_with(&format!(".{}", local)) {
            warn!(from = %dfrom, "stream from is invalid");
            return Ok(Handled::Stop);
        }

        if dto.as_deref() == Some(local.as_str()) {
            let key = element.text();
            let from_jid: Jid = dfrom
                .parse()
                .map_err(|_| XmppError::stream("malformed dialback sender"))?;
            let stream_id = core.stream_id().to_string();
            self.listener.dialback_key_received(&from_jid, &stream_id, &key);
            Ok(Handled::Consumed)
        } else {
            warn!(from = %dfrom, to = ?dto, stream_id = %core.stream_id(), "dialback result with invalid to");
            Ok(Handled::Stop)
        }
    }

    async fn handle_dialback_verify(
        &mut self,
        core: &mut StreamCore,
        element: &Element,
    ) -> Result<Handled, XmppError> {
        let (vfrom, vto, vid) = match (element.attr("from"), element.attr("to"), element.attr("id")) {
            (Some(f), Some(t), Some(i)) => (f.to_string(), t.to_string(), i.to_string()),
            _ => {
                warn!(stream_id = %core.stream_id(), "dialback verify missing attributes");
                return Ok(Handled::Consumed);
            }
        };
        let key = element.text();

        let valid = self.registry.matches(&vfrom, &key);
        let result = if valid {
            info!(from = %vfrom, stream_id = %core.stream_id(), "dialback verify valid");
            DialbackResult::Valid
        } else {
            warn!(from = %vfrom, stream_id = %core.stream_id(), "dialback verify invalid");
            DialbackResult::Invalid
        };

        let reply = dialback::build_verify_response(&vto, &vfrom, &vid, result);
        core.send_str(&reply).await?;
        Ok(Handled::Consumed)
    }

    async fn handle_starttls(&mut self, core: &mut StreamCore) -> Result<Handled, XmppError> {
        let upgrader = match self.upgrader.as_mut() {
            Some(u) => u,
            None => {
                warn!(stream_id = %core.stream_id(), "starttls without an upgrader");
                return Ok(Handled::Consumed);
            }
        };

        core.send_str(&format!("<proceed xmlns='{}'/>", ns::TLS)).await?;
        let transport = core
            .take_transport()
            .ok_or_else(|| XmppError::internal("transport not installed"))?;
        let secured = upgrader.secure(transport).await?;
        core.install_transport(secured);
        core.set_secured(true);
        debug!(stream_id = %core.stream_id(), "TLS established, awaiting stream restart");
        Ok(Handled::Consumed)
    }
}

#[async_trait]
impl StreamHandler for InboundServer {
    #[instrument(name = "s2s.inbound.handshake", skip(self, core), fields(domain = %self.config.domain))]
    async fn handshake(&mut self, core: &mut StreamCore) -> Result<bool, XmppError> {
        let header = core.read_header().await?;

        if header.stream_ns.as_deref() != Some(ns::STREAM) {
            return Err(XmppError::stream("invalid stream namespace"));
        }

        let stream_id = match header.id {
            Some(ref id) if !id.is_empty() => id.clone(),
            _ => core.ids().generate(),
        };
        core.set_stream_id(stream_id);

        if let Some(ref from) = header.from {
            if self.config.is_banned(from) {
                info!(from = %from, "banned host, closing");
                core.abort().await;
                return Ok(false);
            }
        }

        self.send_open_stream(core, header.from.as_deref(), header.version.is_some())
            .await?;
        Ok(true)
    }

    async fn handle_element(
        &mut self,
        core: &mut StreamCore,
        element: &Element,
    ) -> Result<Handled, XmppError> {
        match (element.name(), element.ns().as_str()) {
            ("result", NS_DIALBACK) => self.handle_dialback_result(core, element).await,
            ("verify", NS_DIALBACK) => self.handle_dialback_verify(core, element).await,
            ("presence", _) | ("message", _) | ("iq", _) => {
                if self.check_from_to(core, element) {
                    Ok(Handled::Fallthrough)
                } else {
                    debug!(
                        name = %element.name(),
                        from = ?element.attr("from"),
                        to = ?element.attr("to"),
                        "dropping stanza from untrusted sender"
                    );
                    Ok(Handled::Consumed)
                }
            }
            ("starttls", _) if !core.secured() => self.handle_starttls(core).await,
            ("error", _) => {
                let failure = crate::extensions::StreamFailure::parse(element);
                info!(stream_id = %core.stream_id(), error = %failure, "stream error from peer");
                Ok(Handled::Stop)
            }
            (name, _) => {
                warn!(
                    stream_id = %core.stream_id(),
                    element = %element_to_string(element).unwrap_or_else(|_| name.to_string()),
                    "unhandled stanza"
                );
                Ok(Handled::Consumed)
            }
        }
    }

    async fn handle_restart(
        &mut self,
        core: &mut StreamCore,
        _header: &StreamHeader,
    ) -> Result<(), XmppError> {
        if core.secured() {
            self.send_open_stream(core, None, true).await
        } else {
            warn!(stream_id = %core.stream_id(), "stream restart before TLS");
            Ok(())
        }
    }

    async fn on_close(&mut self, core: &mut StreamCore, outcome: &CloseOutcome<'_>) {
        match outcome {
            CloseOutcome::Clean => info!(stream_id = %core.stream_id(), "stream finished"),
            CloseOutcome::Dirty => info!(stream_id = %core.stream_id(), "stream closed (dirty)"),
            CloseOutcome::Failed(e) => warn!(stream_id = %core.stream_id(), error = %e, "stream error"),
        }
        core.close().await;
    }
}

impl Stream<InboundServer> {
    /// Answer a peer's key exchange. On `valid` the peer's domain joins
    /// the trusted set and its stanzas start routing; this is the single
    /// mutation point that grants trust.
    pub async fn send_dialback_result(
        &mut self,
        peer: &Jid,
        result: DialbackResult,
    ) -> Result<(), XmppError> {
        let (core, handler) = self.parts_mut();
        let reply = dialback::build_result_response(core.local(), peer, result);
        core.send_str(&reply).await?;

        if result == DialbackResult::Valid {
            handler.trusted.insert(peer.domain_jid());
            info!(peer = %peer, stream_id = %core.stream_id(), "stream ready");
        }
        Ok(())
    }
}
