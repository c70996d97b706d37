//! Incremental XML framing for XMPP streams.
//!
//! An XMPP session is one long-lived XML document, so parsing has to be
//! incremental: bytes are fed in as they arrive and complete top-level
//! items (the stream header, whole stanzas, the closing tag) are emitted
//! as soon as the buffer holds them. Complete elements are handed to
//! minidom, so consumers always see whole subtrees and never a cursor
//! stranded mid-element.

use minidom::Element;

use crate::XmppError;

/// Namespace URIs used on the wire.
pub mod ns {
    /// Client stream namespace
    pub const JABBER_CLIENT: &str = "jabber:client";
    /// Server stream namespace
    pub const JABBER_SERVER: &str = "jabber:server";
    /// Server dialback namespace
    pub const DIALBACK: &str = "jabber:server:dialback";
    /// Component accept namespace
    pub const COMPONENT_ACCEPT: &str = "jabber:component:accept";
    /// Stream framing namespace
    pub const STREAM: &str = "http://etherx.jabber.org/streams";
    /// STARTTLS namespace
    pub const TLS: &str = "urn:ietf:params:xml:ns:xmpp-tls";
    /// SASL namespace
    pub const SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
    /// Resource binding namespace
    pub const BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
    /// Legacy session namespace
    pub const SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";
    /// Stanza error namespace
    pub const STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
    /// Stream error namespace
    pub const STREAMS: &str = "urn:ietf:params:xml:ns:xmpp-streams";
    /// Service discovery info namespace
    pub const DISCO_INFO: &str = "http://jabber.org/protocol/disco#info";
}

/// Escape text for use in XML attribute values and character data.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Parsed stream header information.
///
/// The opening `<stream:stream ...>` tag is intentionally unclosed XML
/// (its end tag arrives at session end), so it is parsed from the raw tag
/// text rather than as an element.
#[derive(Debug, Clone, Default)]
pub struct StreamHeader {
    /// The 'to' attribute (target domain)
    pub to: Option<String>,
    /// The 'from' attribute (source domain)
    pub from: Option<String>,
    /// The 'id' attribute (stream ID, assigned by the receiving side)
    pub id: Option<String>,
    /// The 'version' attribute ("1.0" for post-RFC-3920 peers)
    pub version: Option<String>,
    /// The 'xml:lang' attribute
    pub lang: Option<String>,
    /// The default 'xmlns' declaration
    pub ns: Option<String>,
    /// The 'xmlns:stream' declaration
    pub stream_ns: Option<String>,
}

impl StreamHeader {
    /// Parse a stream header from the raw text of its opening tag.
    pub fn parse(tag: &str) -> Result<Self, XmppError> {
        if !tag.starts_with("<stream:stream") && !tag.starts_with("<stream ") {
            return Err(XmppError::xml_parse("no stream:stream element found"));
        }
        Ok(StreamHeader {
            to: extract_attribute(tag, "to"),
            from: extract_attribute(tag, "from"),
            id: extract_attribute(tag, "id"),
            version: extract_attribute(tag, "version"),
            lang: extract_attribute(tag, "xml:lang"),
            ns: extract_attribute(tag, "xmlns"),
            stream_ns: extract_attribute(tag, "xmlns:stream"),
        })
    }
}

/// Extract an attribute value from an XML tag string.
fn extract_attribute(tag: &str, name: &str) -> Option<String> {
    for quote in ['\'', '"'] {
        let pattern = format!("{}={}", name, quote);
        for (start, _) in tag.match_indices(&pattern) {
            // Attribute names are always preceded by whitespace; without
            // this check "to=" would match inside "proto=".
            if start == 0 || !tag.as_bytes()[start - 1].is_ascii_whitespace() {
                continue;
            }
            let value_start = start + pattern.len();
            if let Some(len) = tag[value_start..].find(quote) {
                return Some(tag[value_start..value_start + len].to_string());
            }
        }
    }
    None
}

/// One complete top-level item of the stream document.
#[derive(Debug)]
pub enum StreamEvent {
    /// A stream header, either the initial one or a restart after SASL/TLS.
    Header(StreamHeader),
    /// A complete top-level element (stanza or protocol element).
    Element(Element),
    /// The `</stream:stream>` close tag: clean end of the document.
    End,
}

enum TagKind {
    Open,
    Close,
    SelfClose,
}

/// Incremental framer over the raw byte stream.
///
/// Feed bytes in with [`feed`](XmlStream::feed), take complete items out
/// with [`next_event`](XmlStream::next_event). The buffer always begins at
/// a top-level boundary, so framing state never has to survive across
/// calls. Stream restarts need no reset: a `stream:stream` opener is
/// recognized by name wherever it appears.
pub struct XmlStream {
    buffer: Vec<u8>,
    default_ns: String,
}

impl XmlStream {
    /// Create a framer whose stanzas live in the given default namespace.
    pub fn new(default_ns: impl Into<String>) -> Self {
        Self {
            buffer: Vec::with_capacity(8192),
            default_ns: default_ns.into(),
        }
    }

    /// Feed raw bytes into the framer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Discard all buffered bytes. Used when the transport itself is
    /// replaced (TLS upgrade) and the old byte stream ends.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Take the next complete top-level item, if the buffer holds one.
    pub fn next_event(&mut self) -> Result<Option<StreamEvent>, XmppError> {
        loop {
            match self.buffer.iter().position(|b| !b.is_ascii_whitespace()) {
                None => {
                    self.buffer.clear();
                    return Ok(None);
                }
                Some(0) => {}
                Some(n) => {
                    self.buffer.drain(..n);
                }
            }

            if self.buffer[0] != b'<' {
                return Err(XmppError::xml_parse("character data at stream level"));
            }
            if self.buffer.len() < 2 {
                return Ok(None);
            }

            match self.buffer[1] {
                b'?' => {
                    // XML prolog; drop it and keep scanning.
                    match find(&self.buffer, b"?>") {
                        Some(end) => {
                            self.buffer.drain(..end + 2);
                            continue;
                        }
                        None => return Ok(None),
                    }
                }
                b'!' => {
                    // Comments, DTDs and CDATA are forbidden in XMPP streams.
                    return Err(XmppError::xml_parse("restricted XML construct"));
                }
                b'/' => {
                    // Closing tag at stream level: end of the document.
                    return match self.buffer.iter().position(|&b| b == b'>') {
                        Some(end) => {
                            self.buffer.drain(..=end);
                            Ok(Some(StreamEvent::End))
                        }
                        None => Ok(None),
                    };
                }
                _ => return self.scan_element(),
            }
        }
    }

    /// Scan for one complete element (or a stream header) from the start
    /// of the buffer, tracking tag depth.
    fn scan_element(&mut self) -> Result<Option<StreamEvent>, XmppError> {
        let mut depth = 0usize;
        let mut first = true;
        let mut i = 0usize;

        while i < self.buffer.len() {
            if self.buffer[i] != b'<' {
                i += 1;
                continue;
            }
            if i + 1 >= self.buffer.len() {
                return Ok(None);
            }
            if matches!(self.buffer[i + 1], b'!' | b'?') {
                return Err(XmppError::xml_parse("restricted XML construct"));
            }

            let (tag_end, kind) = match scan_tag(&self.buffer, i) {
                Some(t) => t,
                None => return Ok(None),
            };

            match kind {
                TagKind::Open => {
                    if first {
                        let name = tag_name(&self.buffer[i..tag_end]);
                        if name == "stream:stream" || name == "stream" {
                            let tag = take_str(&mut self.buffer, tag_end)?;
                            let header = StreamHeader::parse(&tag)?;
                            return Ok(Some(StreamEvent::Header(header)));
                        }
                    }
                    depth += 1;
                }
                TagKind::SelfClose => {
                    if first {
                        return self.complete_element(tag_end);
                    }
                }
                TagKind::Close => {
                    if depth == 0 {
                        return Err(XmppError::xml_parse("unbalanced end tag"));
                    }
                    depth -= 1;
                    if depth == 0 {
                        return self.complete_element(tag_end);
                    }
                }
            }

            first = false;
            i = tag_end + 1;
        }

        Ok(None)
    }

    /// Detach the complete element ending at `tag_end` and parse it.
    fn complete_element(&mut self, tag_end: usize) -> Result<Option<StreamEvent>, XmppError> {
        let raw = take_str(&mut self.buffer, tag_end)?;

        // Stanzas arrive without namespace declarations (they inherit them
        // from the stream root we never hand to minidom), so re-supply the
        // stream-scoped declarations around the detached element.
        let wrapped = format!(
            "<wrap xmlns='{}' xmlns:stream='{}' xmlns:db='{}'>{}</wrap>",
            self.default_ns,
            ns::STREAM,
            ns::DIALBACK,
            raw
        );
        let root: Element = wrapped
            .parse()
            .map_err(|e| XmppError::xml_parse(format!("failed to parse element: {}", e)))?;
        let element = root
            .children()
            .next()
            .cloned()
            .ok_or_else(|| XmppError::xml_parse("empty element frame"))?;

        Ok(Some(StreamEvent::Element(element)))
    }
}

/// First index of `needle` in `haystack`.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Remove `..=end` from the buffer and return it as UTF-8 text.
fn take_str(buffer: &mut Vec<u8>, end: usize) -> Result<String, XmppError> {
    let bytes: Vec<u8> = buffer.drain(..=end).collect();
    String::from_utf8(bytes).map_err(|e| XmppError::xml_parse(format!("invalid UTF-8: {}", e)))
}

/// Scan one tag starting at `start` (which holds `<`). Returns the index
/// of the closing `>` and the tag kind, or None if the tag is incomplete.
/// `>` inside quoted attribute values does not terminate the tag.
fn scan_tag(buf: &[u8], start: usize) -> Option<(usize, TagKind)> {
    let closing = buf.get(start + 1) == Some(&b'/');
    let mut quote: Option<u8> = None;
    let mut j = start + 1;

    while j < buf.len() {
        let b = buf[j];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'>' => {
                    let kind = if closing {
                        TagKind::Close
                    } else if buf[j - 1] == b'/' {
                        TagKind::SelfClose
                    } else {
                        TagKind::Open
                    };
                    return Some((j, kind));
                }
                _ => {}
            },
        }
        j += 1;
    }
    None
}

/// The name of the tag in `tag` (which starts with `<` or `</`).
fn tag_name(tag: &[u8]) -> String {
    let start = if tag.get(1) == Some(&b'/') { 2 } else { 1 };
    let end = tag[start..]
        .iter()
        .position(|&b| b.is_ascii_whitespace() || b == b'>' || b == b'/')
        .map(|p| start + p)
        .unwrap_or(tag.len());
    String::from_utf8_lossy(&tag[start..end]).to_string()
}

/// Serialize a minidom element back to XML text.
pub fn element_to_string(element: &Element) -> Result<String, XmppError> {
    let mut output = Vec::new();
    element
        .write_to(&mut output)
        .map_err(|e| XmppError::xml_parse(format!("failed to serialize element: {}", e)))?;
    String::from_utf8(output).map_err(|e| XmppError::xml_parse(format!("invalid UTF-8: {}", e)))
}
