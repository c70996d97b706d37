//! External component handshake (shared-secret digest).
//!
//! A component authenticates to its server by hashing the server-assigned
//! stream id with a shared secret: `hex(SHA1(streamID || secret))`. The
//! outbound side dials in as a subordinate service; the inbound side
//! accepts one.

use sha1::{Digest, Sha1};
use tracing::debug;

use async_trait::async_trait;

use crate::config::ComponentConfig;
use crate::error::{generate_stream_error, stream_errors};
use crate::jid::Jid;
use crate::s2s::dialback::constant_time_eq;
use crate::stream::{Stream, StreamCore, StreamHandler, Transport};
use crate::xml::ns;
use crate::XmppError;

/// Progress through the component handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    /// Stream header exchanged.
    StreamOpened,
    /// Digest sent (outbound) or awaited (inbound).
    HandshakeSent,
    /// Digest accepted.
    Authenticated,
    /// Digest rejected or the stream was invalid.
    Failed,
}

/// The handshake digest: `hex(SHA1(streamID || secret))`.
pub fn handshake_digest(stream_id: &str, secret: &str) -> String {
    hex::encode(Sha1::digest(format!("{}{}", stream_id, secret).as_bytes()))
}

/// Outbound component handshake: dial a server as a subordinate service.
pub struct ComponentLogin {
    secret: String,
    state: ComponentState,
}

impl ComponentLogin {
    /// Build a component stream dialing in as `config.domain`.
    pub fn stream(config: &ComponentConfig, transport: Transport) -> Result<Stream<Self>, XmppError> {
        let identity: Jid = config.domain.parse()?;
        let core = StreamCore::new(
            identity.clone(),
            Some(identity),
            ns::COMPONENT_ACCEPT,
            transport,
        );

        Ok(Stream::new(
            core,
            Self {
                secret: config.secret.clone(),
                state: ComponentState::StreamOpened,
            },
        ))
    }

    /// Where the handshake currently stands.
    pub fn state(&self) -> ComponentState {
        self.state
    }
}

#[async_trait]
impl StreamHandler for ComponentLogin {
    async fn handshake(&mut self, core: &mut StreamCore) -> Result<bool, XmppError> {
        let target = core
            .peer()
            .cloned()
            .ok_or_else(|| XmppError::internal("component stream has no peer"))?;

        core.send_str(&format!(
            "<stream:stream xmlns='{}' xmlns:stream='{}' to='{}'>",
            ns::COMPONENT_ACCEPT,
            ns::STREAM,
            target
        ))
        .await?;

        let header = core.read_header().await?;
        let stream_id = header.id.unwrap_or_default();
        core.set_stream_id(stream_id.clone());

        if header.from.as_deref() != Some(target.to_string().as_str()) {
            self.state = ComponentState::Failed;
            return Err(XmppError::auth_failed("stream:stream, failed authentication"));
        }

        core.send_str(&format!(
            "<handshake>{}</handshake>",
            handshake_digest(&stream_id, &self.secret)
        ))
        .await?;
        self.state = ComponentState::HandshakeSent;

        let element = core.read_element().await?;
        if element.name() == "handshake" {
            self.state = ComponentState::Authenticated;
            core.set_authenticated(true);
            debug!(component = %core.local(), "component handshake accepted");
            core.notify_ready();
            Ok(true)
        } else {
            self.state = ComponentState::Failed;
            Err(XmppError::auth_failed(format!(
                "{}, failed authentication",
                element.name()
            )))
        }
    }
}

/// Inbound component acceptor: authenticate a subordinate service.
pub struct ComponentAccept {
    secret: String,
    state: ComponentState,
}

impl ComponentAccept {
    /// Build an acceptor stream for a component expected to present
    /// itself as `config.domain`.
    pub fn stream(config: &ComponentConfig, transport: Transport) -> Result<Stream<Self>, XmppError> {
        let identity: Jid = config.domain.parse()?;
        let core = StreamCore::new(identity, None, ns::COMPONENT_ACCEPT, transport);

        Ok(Stream::new(
            core,
            Self {
                secret: config.secret.clone(),
                state: ComponentState::StreamOpened,
            },
        ))
    }

    /// Where the handshake currently stands.
    pub fn state(&self) -> ComponentState {
        self.state
    }
}

#[async_trait]
impl StreamHandler for ComponentAccept {
    async fn handshake(&mut self, core: &mut StreamCore) -> Result<bool, XmppError> {
        let header = core.read_header().await?;

        if header.ns.as_deref() != Some(ns::COMPONENT_ACCEPT)
            || header.stream_ns.as_deref() != Some(ns::STREAM)
        {
            self.state = ComponentState::Failed;
            return Err(XmppError::stream("invalid stream"));
        }
        if header.to.as_deref() != Some(core.local().to_string().as_str()) {
            self.state = ComponentState::Failed;
            return Err(XmppError::stream("invalid domain"));
        }

        let stream_id = core.ids().generate();
        core.set_stream_id(stream_id.clone());
        core.send_str(&format!(
            "<stream:stream xmlns:stream='{}' xmlns='{}' from='{}' id='{}'>",
            ns::STREAM,
            ns::COMPONENT_ACCEPT,
            core.local().bare(),
            stream_id
        ))
        .await?;
        self.state = ComponentState::HandshakeSent;

        let element = core.read_element().await?;
        if element.name() != "handshake" {
            self.state = ComponentState::Failed;
            return Err(XmppError::auth_failed(format!(
                "{}, failed authentication",
                element.name()
            )));
        }

        let expected = handshake_digest(&stream_id, &self.secret);
        let presented = element.text();
        if !constant_time_eq(presented.trim().as_bytes(), expected.as_bytes()) {
            self.state = ComponentState::Failed;
            core.send_str(&generate_stream_error(stream_errors::NOT_AUTHORIZED, None))
                .await?;
            return Err(XmppError::auth_failed("stream:stream, failed authentication"));
        }

        core.send_str("<handshake/>").await?;
        self.state = ComponentState::Authenticated;
        core.set_authenticated(true);
        debug!(component = %core.local(), "component authenticated");
        core.notify_ready();
        Ok(true)
    }
}

/// An outbound component stream.
pub type ComponentStream = Stream<ComponentLogin>;
/// An inbound component stream.
pub type ComponentAcceptStream = Stream<ComponentAccept>;
