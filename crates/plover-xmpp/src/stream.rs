//! The stream engine.
//!
//! One engine instance drives one connection: it owns the transport and
//! the XML framer, runs the read loop, and routes every top-level item to
//! either the protocol handshake strategy or the listener registries.
//! Protocol roles (client login, component handshake, server dialback) are
//! [`StreamHandler`] implementations plugged into the generic [`Stream`]
//! loop.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use minidom::Element;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::{generate_stream_error, stream_errors};
use crate::extensions::StreamFailure;
use crate::ids::{default_generator, IdGenerator};
use crate::jid::Jid;
use crate::stanza::{ExtensionRegistry, InfoQuery, Message, Presence};
use crate::xml::{element_to_string, StreamEvent, StreamHeader, XmlStream};
use crate::XmppError;

/// Boxed read half of a connection.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed write half of a connection.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The duplex byte connection a stream runs over.
pub struct Transport {
    /// Read half.
    pub reader: BoxReader,
    /// Write half.
    pub writer: BoxWriter,
}

impl Transport {
    /// Box a pair of halves into a transport.
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

/// Performs the TLS upgrade when a stream negotiates STARTTLS.
///
/// The engine never links a TLS library; it hands the current transport
/// out and installs whatever comes back. `tokio::io::join` lets an
/// implementation rejoin the halves for a real handshake.
#[async_trait]
pub trait TlsUpgrader: Send + Sync {
    /// Wrap the transport in TLS and return the secured replacement.
    async fn secure(&mut self, transport: Transport) -> Result<Transport, XmppError>;
}

/// Broadcast listener for message stanzas.
pub trait MessageListener: Send + Sync {
    /// Called for every inbound message, in arrival order.
    fn on_message(&self, message: &Message);
}

/// Broadcast listener for presence stanzas.
pub trait PresenceListener: Send + Sync {
    /// Called for every inbound presence, in arrival order.
    fn on_presence(&self, presence: &Presence);
}

/// Broadcast listener for IQ stanzas without a pending correlation.
pub trait IqListener: Send + Sync {
    /// Handle an IQ; return true if it was handled. If no listener
    /// handles it, the engine auto-replies with an error.
    fn on_iq(&self, iq: &InfoQuery) -> bool;
}

/// Stream lifecycle listener.
pub trait StreamListener: Send + Sync {
    /// The stream finished its handshake and is ready for stanzas.
    fn on_ready(&self) {}
    /// The stream failed. Fired at most once per stream.
    fn on_failure(&self, _reason: &XmppError) {}
}

/// One-shot handler for a correlated IQ response. Removed from the
/// registry atomically with invocation.
pub type IqResponseHandler = Box<dyn FnOnce(&mut StreamCore, &InfoQuery) -> bool + Send>;

/// What a protocol handler did with an element.
pub enum Handled {
    /// The handler consumed it.
    Consumed,
    /// Not a protocol element; run the generic stanza dispatch.
    Fallthrough,
    /// End the read loop (clean close).
    Stop,
}

/// How a stream ended.
#[derive(Debug)]
pub enum CloseOutcome<'a> {
    /// The peer ended the stream document (or the handler stopped it).
    Clean,
    /// The transport dropped without ending the document.
    Dirty,
    /// A protocol, parse or authentication failure.
    Failed(&'a XmppError),
}

/// A protocol role driven by the generic stream loop.
///
/// `handshake` runs once before the read loop. During the loop every
/// element is offered to `handle_element` before the generic dispatch, so
/// protocol elements (`starttls`, dialback `result`/`verify`, ...) never
/// reach the stanza registries.
#[async_trait]
pub trait StreamHandler: Send {
    /// Run the connection-establishment protocol. Return false to end the
    /// stream without entering the read loop.
    async fn handshake(&mut self, core: &mut StreamCore) -> Result<bool, XmppError>;

    /// Offer a top-level element to the protocol layer.
    async fn handle_element(
        &mut self,
        _core: &mut StreamCore,
        _element: &Element,
    ) -> Result<Handled, XmppError> {
        Ok(Handled::Fallthrough)
    }

    /// A stream header arrived mid-loop (restart after TLS).
    async fn handle_restart(
        &mut self,
        _core: &mut StreamCore,
        header: &StreamHeader,
    ) -> Result<(), XmppError> {
        warn!(from = ?header.from, "unexpected stream restart");
        Ok(())
    }

    /// The loop ended; fired exactly once per stream.
    async fn on_close(&mut self, _core: &mut StreamCore, _outcome: &CloseOutcome<'_>) {}
}

/// Per-connection engine state: transport, framer, session flags and the
/// listener registries.
pub struct StreamCore {
    local: Jid,
    peer: Option<Jid>,
    transport: Option<Transport>,
    xml: XmlStream,
    stream_id: String,
    secured: bool,
    authenticated: bool,
    terminated: bool,
    created: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    ids: Arc<dyn IdGenerator>,
    extensions: ExtensionRegistry,
    message_listeners: Vec<Arc<dyn MessageListener>>,
    presence_listeners: Vec<Arc<dyn PresenceListener>>,
    iq_listeners: Vec<Arc<dyn IqListener>>,
    iq_response_handlers: HashMap<String, IqResponseHandler>,
    stream_listeners: Vec<Arc<dyn StreamListener>>,
    outbox: Vec<String>,
}

impl StreamCore {
    /// Create an engine over a transport. `default_ns` is the stream's
    /// stanza namespace (`jabber:client`, `jabber:server`, ...).
    pub fn new(local: Jid, peer: Option<Jid>, default_ns: &str, transport: Transport) -> Self {
        let now = Utc::now();
        Self {
            local,
            peer,
            transport: Some(transport),
            xml: XmlStream::new(default_ns),
            stream_id: String::new(),
            secured: false,
            authenticated: false,
            terminated: false,
            created: now,
            last_activity: now,
            ids: default_generator(),
            extensions: ExtensionRegistry::new(),
            message_listeners: Vec::new(),
            presence_listeners: Vec::new(),
            iq_listeners: Vec::new(),
            iq_response_handlers: HashMap::new(),
            stream_listeners: Vec::new(),
            outbox: Vec::new(),
        }
    }

    /// Replace the id generator (deterministic ids in tests).
    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Replace the id generator in place.
    pub fn set_ids(&mut self, ids: Arc<dyn IdGenerator>) {
        self.ids = ids;
    }

    /// This side's identity.
    pub fn local(&self) -> &Jid {
        &self.local
    }

    /// Adopt a new local identity (resource binding).
    pub fn set_local(&mut self, local: Jid) {
        self.local = local;
    }

    /// The peer's identity, if known.
    pub fn peer(&self) -> Option<&Jid> {
        self.peer.as_ref()
    }

    /// The current stream id.
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Set the current stream id.
    pub fn set_stream_id(&mut self, id: impl Into<String>) {
        self.stream_id = id.into();
    }

    /// Whether TLS has been applied.
    pub fn secured(&self) -> bool {
        self.secured
    }

    /// Mark TLS applied.
    pub fn set_secured(&mut self, secured: bool) {
        self.secured = secured;
    }

    /// Whether the connection-establishment protocol completed.
    pub fn authenticated(&self) -> bool {
        self.authenticated
    }

    /// Mark the stream authenticated (or no longer so).
    pub fn set_authenticated(&mut self, authenticated: bool) {
        self.authenticated = authenticated;
    }

    /// When the session was created.
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Last read or write activity. Exposed for external idle policy; the
    /// engine applies no timeouts itself.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    /// The id generation capability.
    pub fn ids(&self) -> &Arc<dyn IdGenerator> {
        &self.ids
    }

    /// The extension parser registry.
    pub fn extensions(&self) -> &ExtensionRegistry {
        &self.extensions
    }

    /// Mutable access to the extension parser registry.
    pub fn extensions_mut(&mut self) -> &mut ExtensionRegistry {
        &mut self.extensions
    }

    /// Register a message listener.
    pub fn add_message_listener(&mut self, listener: Arc<dyn MessageListener>) {
        self.message_listeners.push(listener);
    }

    /// Register a presence listener.
    pub fn add_presence_listener(&mut self, listener: Arc<dyn PresenceListener>) {
        self.presence_listeners.push(listener);
    }

    /// Register a broadcast IQ listener.
    pub fn add_iq_listener(&mut self, listener: Arc<dyn IqListener>) {
        self.iq_listeners.push(listener);
    }

    /// Register a stream lifecycle listener.
    pub fn add_stream_listener(&mut self, listener: Arc<dyn StreamListener>) {
        self.stream_listeners.push(listener);
    }

    /// Remove a previously registered message listener (by identity).
    pub fn remove_message_listener(&mut self, listener: &Arc<dyn MessageListener>) {
        self.message_listeners.retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Remove a previously registered presence listener (by identity).
    pub fn remove_presence_listener(&mut self, listener: &Arc<dyn PresenceListener>) {
        self.presence_listeners.retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Remove a previously registered broadcast IQ listener (by identity).
    pub fn remove_iq_listener(&mut self, listener: &Arc<dyn IqListener>) {
        self.iq_listeners.retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Register a one-shot handler for the response to an IQ sent to
    /// `to` with id `id`. Fires at most once; the registration is removed
    /// in the same step that invokes it.
    pub fn expect_response(&mut self, to: &Jid, id: &str, handler: IqResponseHandler) {
        self.iq_response_handlers
            .insert(correlation_key(Some(to), Some(id)), handler);
    }

    /// Drop a pending response handler that never fired.
    pub fn cancel_response(&mut self, to: &Jid, id: &str) {
        self.iq_response_handlers
            .remove(&correlation_key(Some(to), Some(id)));
    }

    /// Number of response handlers still pending.
    pub fn pending_responses(&self) -> usize {
        self.iq_response_handlers.len()
    }

    /// Queue XML text to be sent after the current dispatch step. Lets
    /// synchronous listeners emit stanzas from inside the read loop.
    pub fn enqueue(&mut self, xml: impl Into<String>) {
        self.outbox.push(xml.into());
    }

    /// Send raw XML text, synchronously flushing the writer.
    pub async fn send_str(&mut self, xml: &str) -> Result<(), XmppError> {
        self.last_activity = Utc::now();
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| XmppError::internal("transport not installed"))?;
        transport.writer.write_all(xml.as_bytes()).await?;
        transport.writer.flush().await?;
        Ok(())
    }

    /// Serialize and send a message.
    pub async fn send_message(&mut self, message: &Message) -> Result<(), XmppError> {
        self.send_str(&message.to_xml()).await
    }

    /// Serialize and send a presence.
    pub async fn send_presence(&mut self, presence: &Presence) -> Result<(), XmppError> {
        self.send_str(&presence.to_xml()).await
    }

    /// Serialize and send an IQ.
    pub async fn send_iq(&mut self, iq: &InfoQuery) -> Result<(), XmppError> {
        self.send_str(&iq.to_xml()).await
    }

    /// Flush everything listeners queued with [`enqueue`](Self::enqueue).
    pub async fn flush_outbox(&mut self) -> Result<(), XmppError> {
        let pending = std::mem::take(&mut self.outbox);
        for xml in pending {
            self.send_str(&xml).await?;
        }
        Ok(())
    }

    /// Take the next complete item off the wire, reading more bytes as
    /// needed. Malformed XML is answered with a stream-level `invalid-xml`
    /// error before the local failure surfaces.
    pub async fn next_event(&mut self) -> Result<StreamEvent, XmppError> {
        loop {
            match self.xml.next_event() {
                Ok(Some(event)) => {
                    self.last_activity = Utc::now();
                    return Ok(event);
                }
                Ok(None) => {}
                Err(e) => {
                    if matches!(e, XmppError::XmlParse(_)) {
                        let _ = self
                            .send_str(&generate_stream_error(stream_errors::INVALID_XML, None))
                            .await;
                    }
                    return Err(e);
                }
            }

            let mut buf = [0u8; 8192];
            let n = {
                let transport = self
                    .transport
                    .as_mut()
                    .ok_or_else(|| XmppError::internal("transport not installed"))?;
                transport.reader.read(&mut buf).await?
            };
            if n == 0 {
                return Err(XmppError::ConnectionClosed);
            }
            self.last_activity = Utc::now();
            self.xml.feed(&buf[..n]);
        }
    }

    /// Read the next item and require it to be a stream header.
    pub async fn read_header(&mut self) -> Result<StreamHeader, XmppError> {
        match self.next_event().await? {
            StreamEvent::Header(header) => Ok(header),
            StreamEvent::Element(el) => Err(XmppError::stream(format!(
                "expected stream header, got <{}>",
                el.name()
            ))),
            StreamEvent::End => Err(XmppError::stream("stream closed during negotiation")),
        }
    }

    /// Read the next item and require it to be an element.
    pub async fn read_element(&mut self) -> Result<Element, XmppError> {
        match self.next_event().await? {
            StreamEvent::Element(element) => Ok(element),
            StreamEvent::Header(_) => Err(XmppError::stream("unexpected stream header")),
            StreamEvent::End => Err(XmppError::stream("stream closed during negotiation")),
        }
    }

    /// Take the transport out for a TLS upgrade.
    pub fn take_transport(&mut self) -> Option<Transport> {
        self.transport.take()
    }

    /// Install a replacement transport and drop any buffered bytes of the
    /// old byte stream.
    pub fn install_transport(&mut self, transport: Transport) {
        self.transport = Some(transport);
        self.xml.reset();
    }

    /// Generic stanza dispatch for one top-level element.
    ///
    /// Messages and presences broadcast to their registries; IQs run the
    /// correlation path first, then broadcast, then the auto error reply;
    /// a stream-level `error` is fatal; anything else is logged and
    /// skipped.
    pub async fn dispatch(&mut self, element: &Element) -> Result<(), XmppError> {
        match element.name() {
            "message" => {
                let message = Message::parse(element, &self.extensions)?;
                for listener in &self.message_listeners {
                    listener.on_message(&message);
                }
            }
            "presence" => {
                let presence = Presence::parse(element, &self.extensions)?;
                for listener in &self.presence_listeners {
                    listener.on_presence(&presence);
                }
            }
            "iq" => {
                self.dispatch_iq(element).await?;
            }
            "error" => {
                let failure = StreamFailure::parse(element);
                return Err(XmppError::Stream(failure.to_string()));
            }
            other => {
                debug!(
                    element = %element_to_string(element).unwrap_or_else(|_| other.to_string()),
                    "unhandled element"
                );
            }
        }
        self.flush_outbox().await
    }

    async fn dispatch_iq(&mut self, element: &Element) -> Result<(), XmppError> {
        let iq = InfoQuery::parse(element, &self.extensions)?;
        let key = correlation_key(iq.envelope.from.as_ref(), iq.envelope.id.as_deref());

        let mut handled = false;
        if let Some(handler) = self.iq_response_handlers.remove(&key) {
            handled = handler(self, &iq);
        } else {
            for listener in &self.iq_listeners {
                handled |= listener.on_iq(&iq);
            }
        }

        if !handled {
            let reply = iq.error().to_xml();
            self.send_str(&reply).await?;
        }
        Ok(())
    }

    /// Notify stream listeners the handshake completed.
    pub fn notify_ready(&self) {
        for listener in &self.stream_listeners {
            listener.on_ready();
        }
    }

    /// The failure path: flush/close the writer best-effort if we were
    /// authenticated, then notify stream listeners exactly once.
    pub async fn connection_failed(&mut self, reason: &XmppError) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        if self.authenticated {
            if let Some(transport) = self.transport.as_mut() {
                let _ = transport.writer.shutdown().await;
            }
        }

        for listener in &self.stream_listeners {
            listener.on_failure(reason);
        }
    }

    /// Whether a terminal notification already fired.
    pub fn terminated(&self) -> bool {
        self.terminated
    }

    pub(crate) fn mark_terminated(&mut self) {
        self.terminated = true;
    }

    /// Write the stream close tag best-effort and release the writer.
    /// Failures during close are swallowed.
    pub async fn close(&mut self) {
        self.authenticated = false;
        if let Some(transport) = self.transport.as_mut() {
            let _ = transport.writer.write_all(b"</stream:stream>").await;
            let _ = transport.writer.flush().await;
            let _ = transport.writer.shutdown().await;
        }
    }

    /// Drop the connection without any closing handshake.
    pub async fn abort(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            let _ = transport.writer.shutdown().await;
        }
    }
}

/// Correlation key for one-shot IQ response handlers.
fn correlation_key(from: Option<&Jid>, id: Option<&str>) -> String {
    format!(
        "{}\n{}",
        from.map(|j| j.to_string()).unwrap_or_default(),
        id.unwrap_or_default()
    )
}

/// A protocol stream: the generic engine plus one handshake strategy.
pub struct Stream<H: StreamHandler> {
    core: StreamCore,
    handler: H,
    opened: bool,
}

impl<H: StreamHandler> Stream<H> {
    /// Combine an engine and a protocol handler.
    pub fn new(core: StreamCore, handler: H) -> Self {
        Self {
            core,
            handler,
            opened: false,
        }
    }

    /// The engine state.
    pub fn core(&self) -> &StreamCore {
        &self.core
    }

    /// Mutable engine state (listener registration, sending).
    pub fn core_mut(&mut self) -> &mut StreamCore {
        &mut self.core
    }

    /// The protocol handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Mutable access to the protocol handler.
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Mutable access to the engine and handler together.
    pub fn parts_mut(&mut self) -> (&mut StreamCore, &mut H) {
        (&mut self.core, &mut self.handler)
    }

    /// Run the connection-establishment protocol. Returns false if the
    /// stream ended during the handshake.
    pub async fn open(&mut self) -> Result<bool, XmppError> {
        self.opened = true;
        self.handler.handshake(&mut self.core).await
    }

    /// Process one inbound item. Returns false when the stream ended.
    /// [`open`](Self::open) must have succeeded first.
    pub async fn step(&mut self) -> Result<bool, XmppError> {
        debug_assert!(self.opened, "step() before open()");
        match self.core.next_event().await? {
            StreamEvent::Element(element) => {
                match self.handler.handle_element(&mut self.core, &element).await? {
                    Handled::Consumed => {}
                    Handled::Fallthrough => self.core.dispatch(&element).await?,
                    Handled::Stop => return Ok(false),
                }
                Ok(true)
            }
            StreamEvent::Header(header) => {
                self.handler.handle_restart(&mut self.core, &header).await?;
                Ok(true)
            }
            StreamEvent::End => Ok(false),
        }
    }

    /// Drive the stream to completion: handshake, then the read loop,
    /// then exactly one terminal notification.
    pub async fn run(&mut self) -> Result<(), XmppError> {
        let result = self.drive().await;

        let outcome = match &result {
            Ok(()) => CloseOutcome::Clean,
            Err(e) if e.is_disconnect() => CloseOutcome::Dirty,
            Err(e) => CloseOutcome::Failed(e),
        };

        if !self.core.terminated() {
            self.handler.on_close(&mut self.core, &outcome).await;
            match &outcome {
                CloseOutcome::Failed(e) => self.core.connection_failed(e).await,
                _ => self.core.mark_terminated(),
            }
        }

        result
    }

    async fn drive(&mut self) -> Result<(), XmppError> {
        if !self.opened && !self.open().await? {
            return Ok(());
        }
        while self.step().await? {}
        Ok(())
    }
}
