//! Client login: feature discovery, SASL PLAIN, resource binding.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::debug;

use crate::config::ClientConfig;
use crate::extensions::{BindParser, FeatureSupport, ResourceBinding, StreamFeatures};
use crate::jid::Jid;
use crate::stanza::{iq_type, InfoQuery};
use crate::stream::{Stream, StreamCore, StreamHandler, Transport};
use crate::xml::{ns, StreamEvent};
use crate::XmppError;

/// Progress through the login handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Transport connected, nothing negotiated.
    Connected,
    /// The server's feature advertisement arrived.
    FeaturesReceived,
    /// SASL PLAIN request sent.
    Authenticating,
    /// SASL succeeded, stream restarted.
    Authenticated,
    /// Bind request sent, awaiting the correlated response.
    ResourceBinding,
    /// Resource bound; the stream is ready for stanzas.
    Ready,
}

/// The client login state machine.
pub struct ClientLogin {
    password: String,
    state: ClientState,
    bound: Arc<AtomicBool>,
}

impl ClientLogin {
    /// Build a client stream for the account in `config`.
    pub fn stream(config: &ClientConfig, transport: Transport) -> Result<Stream<Self>, XmppError> {
        let local: Jid = config.jid.parse()?;
        if local.local_part().is_none() {
            return Err(XmppError::config("client JID needs a local part"));
        }
        let peer = local.domain_jid();
        let core = StreamCore::new(local, Some(peer), ns::JABBER_CLIENT, transport);

        Ok(Stream::new(
            core,
            Self {
                password: config.password.clone(),
                state: ClientState::Connected,
                bound: Arc::new(AtomicBool::new(false)),
            },
        ))
    }

    /// Where the handshake currently stands.
    pub fn state(&self) -> ClientState {
        if self.bound.load(Ordering::SeqCst) {
            ClientState::Ready
        } else {
            self.state
        }
    }

    fn open_stream_tag(core: &StreamCore) -> String {
        let domain = core
            .peer()
            .map(|p| p.domain_part().to_string())
            .unwrap_or_default();
        format!(
            "<stream:stream xmlns='{}' xmlns:stream='{}' to='{}' version='1.0'>",
            ns::JABBER_CLIENT,
            ns::STREAM,
            domain
        )
    }

    /// The SASL PLAIN payload: `base64(authzid \0 authcid \0 password)`.
    fn plain_payload(&self, core: &StreamCore) -> Result<String, XmppError> {
        let local_part = core
            .local()
            .local_part()
            .ok_or_else(|| XmppError::config("client JID needs a local part"))?;
        let message = format!("{}\0{}\0{}", core.local().bare(), local_part, self.password);
        Ok(BASE64.encode(message.as_bytes()))
    }

    /// Read elements until the features advertisement, skipping restart
    /// headers in between.
    async fn read_features(core: &mut StreamCore) -> Result<StreamFeatures, XmppError> {
        loop {
            match core.next_event().await? {
                StreamEvent::Header(header) => {
                    if let Some(id) = header.id {
                        core.set_stream_id(id);
                    }
                }
                StreamEvent::Element(element) => {
                    if element.name() == "features" {
                        return Ok(StreamFeatures::parse(&element));
                    }
                    return Err(XmppError::stream(format!(
                        "expected stream:features, got <{}>",
                        element.name()
                    )));
                }
                StreamEvent::End => {
                    return Err(XmppError::stream("stream closed during negotiation"))
                }
            }
        }
    }

    /// Send the bind request and register its one-shot response handler.
    async fn bind_resource(&mut self, core: &mut StreamCore) -> Result<(), XmppError> {
        core.extensions_mut().register(Arc::new(BindParser));

        let mut bind = InfoQuery::of_type(iq_type::SET);
        let bind_id = core.ids().generate();
        bind.envelope.id = Some(bind_id.clone());
        bind.set_child(Box::new(ResourceBinding::request(
            core.local().resource_part().map(str::to_string),
        )));

        let server = core
            .peer()
            .cloned()
            .ok_or_else(|| XmppError::internal("client stream has no peer"))?;
        let bound = self.bound.clone();
        core.expect_response(
            &server,
            &bind_id,
            Box::new(move |core, iq| {
                let binding = iq
                    .child()
                    .and_then(|c| c.as_any().downcast_ref::<ResourceBinding>());
                let Some(binding) = binding else {
                    return false;
                };

                if let Some(resource) = binding.jid.as_ref().and_then(|j| j.resource_part()) {
                    let rebound = core.local().with_resource(resource);
                    core.set_local(rebound);
                }
                bound.store(true, Ordering::SeqCst);
                core.notify_ready();

                // Legacy session establishment, for servers that predate
                // its removal. Swallow the reply.
                let session = core.local().domain_jid();
                core.expect_response(&session, "sess", Box::new(|_core, _iq| true));
                core.enqueue(format!(
                    "<iq type='set' id='sess'><session xmlns='{}'/></iq>",
                    ns::SESSION
                ));
                true
            }),
        );

        core.send_iq(&bind).await?;
        self.state = ClientState::ResourceBinding;
        Ok(())
    }
}

#[async_trait]
impl StreamHandler for ClientLogin {
    async fn handshake(&mut self, core: &mut StreamCore) -> Result<bool, XmppError> {
        core.send_str(&Self::open_stream_tag(core)).await?;

        let header = core.read_header().await?;
        if let Some(id) = header.id {
            core.set_stream_id(id);
        }

        let features = Self::read_features(core).await?;
        self.state = ClientState::FeaturesReceived;

        if features.starttls == FeatureSupport::Required || !features.plain {
            return Err(XmppError::auth_failed("stream:features, failed authentication"));
        }

        self.state = ClientState::Authenticating;
        let auth = format!(
            "<auth xmlns='{}' mechanism='PLAIN'>{}</auth>",
            ns::SASL,
            self.plain_payload(core)?
        );
        core.send_str(&auth).await?;

        let element = core.read_element().await?;
        if element.name() != "success" {
            return Err(XmppError::auth_failed(format!(
                "{}, failed authentication",
                element.name()
            )));
        }
        core.set_authenticated(true);
        self.state = ClientState::Authenticated;
        debug!(jid = %core.local(), "authenticated, restarting stream");

        // SASL requires a fresh stream after success.
        core.send_str(&Self::open_stream_tag(core)).await?;
        let _features = Self::read_features(core).await?;

        self.bind_resource(core).await?;
        Ok(true)
    }
}

/// A client stream: the generic engine driven by [`ClientLogin`].
pub type ClientStream = Stream<ClientLogin>;
