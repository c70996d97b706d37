//! Error types for the stream engine.

use thiserror::Error;

/// Engine errors.
#[derive(Debug, Error)]
pub enum XmppError {
    /// IO error (network, transport)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the transport without ending the stream document
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// XML parsing error
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// Authentication failed (SASL, handshake digest, dialback)
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Policy rejection (banned host, spoofed domain, untrusted sender)
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// Stream error (protocol-level failure)
    #[error("stream error: {0}")]
    Stream(String),

    /// Malformed JID text
    #[error("malformed JID: {0}")]
    JidMalformed(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl XmppError {
    /// Create a new XML parse error.
    pub fn xml_parse(msg: impl Into<String>) -> Self {
        Self::XmlParse(msg.into())
    }

    /// Create a new authentication error.
    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::AuthFailed(msg.into())
    }

    /// Create a new policy violation error.
    pub fn policy(msg: impl Into<String>) -> Self {
        Self::PolicyViolation(msg.into())
    }

    /// Create a new stream error.
    pub fn stream(msg: impl Into<String>) -> Self {
        Self::Stream(msg.into())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error is an abrupt transport closure (EOF, reset)
    /// rather than a protocol failure. Streams that distinguish a dirty
    /// shutdown branch on this.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::ConnectionClosed => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Generate a stream error followed by the stream close tag.
///
/// Stream errors are fatal and must be followed by closing the stream.
pub fn generate_stream_error(condition: &str, text: Option<&str>) -> String {
    let mut error = format!(
        "<stream:error><{} xmlns='urn:ietf:params:xml:ns:xmpp-streams'/>",
        condition
    );

    if let Some(t) = text {
        error.push_str(&format!(
            "<text xmlns='urn:ietf:params:xml:ns:xmpp-streams' xml:lang='en'>{}</text>",
            t
        ));
    }

    error.push_str("</stream:error></stream:stream>");
    error
}

/// Stream error conditions used by the engine.
pub mod stream_errors {
    /// Stream error: host unknown
    pub const HOST_UNKNOWN: &str = "host-unknown";
    /// Stream error: invalid namespace
    pub const INVALID_NAMESPACE: &str = "invalid-namespace";
    /// Stream error: invalid XML
    pub const INVALID_XML: &str = "invalid-xml";
    /// Stream error: not authorized
    pub const NOT_AUTHORIZED: &str = "not-authorized";
    /// Stream error: not well-formed
    pub const NOT_WELL_FORMED: &str = "not-well-formed";
    /// Stream error: policy violation
    pub const POLICY_VIOLATION: &str = "policy-violation";
    /// Stream error: restricted XML
    pub const RESTRICTED_XML: &str = "restricted-xml";
    /// Stream error: undefined condition
    pub const UNDEFINED_CONDITION: &str = "undefined-condition";
}
