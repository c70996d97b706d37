//! Stanza model: the base envelope, the three stanza kinds, and the
//! namespace-keyed extension payload contract.

mod iq;
mod message;
mod presence;

pub use iq::{iq_type, InfoQuery};
pub use message::Message;
pub use presence::Presence;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use minidom::Element;
use tracing::trace;

use crate::jid::Jid;
use crate::xml::escape;
use crate::XmppError;

/// A parsed extension payload carried inside a stanza.
///
/// Implementations are keyed by namespace and serialize themselves back to
/// XML text. `as_any` allows callers that registered a concrete extension
/// to get it back out of a stanza's children.
pub trait StanzaExtension: fmt::Debug + Send + Sync {
    /// The namespace this payload lives in.
    fn namespace(&self) -> &str;

    /// Serialize to XML text.
    fn to_xml(&self) -> String;

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;
}

/// Factory that parses payloads of one namespace.
///
/// `parse` returns None when the element is not applicable; the payload is
/// then dropped whole, exactly as for an unregistered namespace.
pub trait ExtensionParser: Send + Sync {
    /// The namespace this parser owns.
    fn namespace(&self) -> &str;

    /// Parse one child element into a payload, or None if not applicable.
    fn parse(&self, element: &Element) -> Option<Box<dyn StanzaExtension>>;
}

/// Per-stream registry of extension parsers.
///
/// Exactly one parser is registered per namespace; registering again for
/// the same namespace replaces the previous one.
#[derive(Default, Clone)]
pub struct ExtensionRegistry {
    parsers: HashMap<String, Arc<dyn ExtensionParser>>,
}

impl ExtensionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parser under its namespace.
    pub fn register(&mut self, parser: Arc<dyn ExtensionParser>) {
        self.parsers.insert(parser.namespace().to_string(), parser);
    }

    /// Remove the parser for a namespace.
    pub fn unregister(&mut self, namespace: &str) {
        self.parsers.remove(namespace);
    }

    /// Parse one child element, or None for unrecognized namespaces.
    pub fn parse_child(&self, element: &Element) -> Option<Box<dyn StanzaExtension>> {
        match self.parsers.get(&element.ns()) {
            Some(parser) => parser.parse(element),
            None => {
                trace!(name = %element.name(), ns = %element.ns(), "dropping payload in unregistered namespace");
                None
            }
        }
    }
}

/// The attributes and payload children every stanza kind shares.
#[derive(Debug, Default)]
pub struct Envelope {
    /// Sender address.
    pub from: Option<Jid>,
    /// Recipient address.
    pub to: Option<Jid>,
    /// Stanza id. Freshly constructed stanzas get a timestamp-derived id;
    /// parsed stanzas keep exactly what was on the wire.
    pub id: Option<String>,
    /// The 'type' attribute.
    pub type_: Option<String>,
    /// Extension payloads, in insertion order.
    pub children: Vec<Box<dyn StanzaExtension>>,
}

impl Envelope {
    /// A fresh envelope with a generated id.
    pub fn new() -> Self {
        Self {
            id: Some(default_id()),
            ..Default::default()
        }
    }

    /// Parse the shared attributes from a stanza element.
    pub fn parse(element: &Element) -> Result<Self, XmppError> {
        let from = element.attr("from").map(str::parse).transpose()?;
        let to = element.attr("to").map(str::parse).transpose()?;
        Ok(Self {
            from,
            to,
            id: element.attr("id").map(str::to_string),
            type_: element.attr("type").map(str::to_string),
            children: Vec::new(),
        })
    }

    /// Render the shared attributes (` from='..' to='..' id='..' type='..'`).
    pub fn attrs_xml(&self) -> String {
        let mut out = String::new();
        if let Some(ref from) = self.from {
            out.push_str(&format!(" from='{}'", escape(&from.to_string())));
        }
        if let Some(ref to) = self.to {
            out.push_str(&format!(" to='{}'", escape(&to.to_string())));
        }
        if let Some(ref id) = self.id {
            out.push_str(&format!(" id='{}'", escape(id)));
        }
        if let Some(ref type_) = self.type_ {
            out.push_str(&format!(" type='{}'", escape(type_)));
        }
        out
    }

    /// Render all payload children.
    pub fn children_xml(&self) -> String {
        self.children.iter().map(|c| c.to_xml()).collect()
    }

    /// The first payload in the given namespace, if any.
    pub fn child_in(&self, namespace: &str) -> Option<&dyn StanzaExtension> {
        self.children
            .iter()
            .find(|c| c.namespace() == namespace)
            .map(|c| c.as_ref())
    }
}

/// Timestamp-derived default stanza id.
fn default_id() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    pub(crate) struct Probe {
        pub ns: String,
        pub text: String,
    }

    impl StanzaExtension for Probe {
        fn namespace(&self) -> &str {
            &self.ns
        }

        fn to_xml(&self) -> String {
            format!("<probe xmlns='{}'>{}</probe>", self.ns, escape(&self.text))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    pub(crate) struct ProbeParser;

    impl ExtensionParser for ProbeParser {
        fn namespace(&self) -> &str {
            "urn:test:probe"
        }

        fn parse(&self, element: &Element) -> Option<Box<dyn StanzaExtension>> {
            Some(Box::new(Probe {
                ns: element.ns(),
                text: element.text(),
            }))
        }
    }

    fn parse_el(xml: &str) -> Element {
        xml.parse().unwrap()
    }

    #[test]
    fn test_envelope_parse_attrs() {
        let el = parse_el("<iq xmlns='jabber:client' from='a@x.com/r' to='x.com' id='42' type='get'/>");
        let env = Envelope::parse(&el).unwrap();
        assert_eq!(env.from.as_ref().unwrap().to_string(), "a@x.com/r");
        assert_eq!(env.to.as_ref().unwrap().to_string(), "x.com");
        assert_eq!(env.id.as_deref(), Some("42"));
        assert_eq!(env.type_.as_deref(), Some("get"));
    }

    #[test]
    fn test_envelope_parse_keeps_absent_id() {
        let el = parse_el("<message xmlns='jabber:client'/>");
        let env = Envelope::parse(&el).unwrap();
        assert_eq!(env.id, None);
    }

    #[test]
    fn test_fresh_envelope_has_id() {
        let env = Envelope::new();
        assert!(env.id.is_some());
    }

    #[test]
    fn test_attrs_are_escaped() {
        let mut env = Envelope::new();
        env.id = Some("a'b".into());
        assert!(env.attrs_xml().contains("id='a&apos;b'"));
    }

    #[test]
    fn test_registry_replaces_per_namespace() {
        let mut registry = ExtensionRegistry::new();
        registry.register(Arc::new(ProbeParser));
        registry.register(Arc::new(ProbeParser));

        let el = parse_el("<probe xmlns='urn:test:probe'>hello</probe>");
        let payload = registry.parse_child(&el).unwrap();
        assert_eq!(payload.namespace(), "urn:test:probe");
    }

    #[test]
    fn test_registry_drops_unknown_namespace() {
        let registry = ExtensionRegistry::new();
        let el = parse_el("<x xmlns='urn:unknown'><deep><deeper/></deep></x>");
        assert!(registry.parse_child(&el).is_none());
    }
}
