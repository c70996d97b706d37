//! Info/query stanzas.

use minidom::Element;

use crate::stanza::{Envelope, ExtensionRegistry, StanzaExtension};
use crate::xml::ns;
use crate::XmppError;

/// IQ type attribute values.
pub mod iq_type {
    /// Request for information.
    pub const GET: &str = "get";
    /// Request to change state.
    pub const SET: &str = "set";
    /// Successful response.
    pub const RESULT: &str = "result";
    /// Error response.
    pub const ERROR: &str = "error";
}

/// An info/query stanza.
///
/// An IQ carries at most one payload child; setting a payload replaces any
/// previous one.
#[derive(Debug, Default)]
pub struct InfoQuery {
    /// Shared stanza attributes; `children` never holds more than one entry.
    pub envelope: Envelope,
}

impl InfoQuery {
    /// A fresh IQ with a generated id.
    pub fn new() -> Self {
        Self {
            envelope: Envelope::new(),
        }
    }

    /// A fresh IQ of the given type.
    pub fn of_type(type_: &str) -> Self {
        let mut iq = Self::new();
        iq.envelope.type_ = Some(type_.to_string());
        iq
    }

    /// Set the payload, replacing any previous one.
    pub fn set_child(&mut self, child: Box<dyn StanzaExtension>) {
        self.envelope.children.clear();
        self.envelope.children.push(child);
    }

    /// The payload, if any.
    pub fn child(&self) -> Option<&dyn StanzaExtension> {
        self.envelope.children.first().map(|c| c.as_ref())
    }

    /// Parse an iq element. Of the registered payloads found, the last one
    /// wins; everything else is dropped.
    pub fn parse(element: &Element, registry: &ExtensionRegistry) -> Result<Self, XmppError> {
        let mut iq = InfoQuery {
            envelope: Envelope::parse(element)?,
        };

        for child in element.children() {
            if let Some(payload) = registry.parse_child(child) {
                iq.set_child(payload);
            }
        }

        Ok(iq)
    }

    /// Build the result reply: addresses swapped, id preserved.
    pub fn reply(&self) -> InfoQuery {
        let mut reply = InfoQuery::new();
        reply.envelope.from = self.envelope.to.clone();
        reply.envelope.to = self.envelope.from.clone();
        reply.envelope.id = self.envelope.id.clone();
        reply.envelope.type_ = Some(iq_type::RESULT.to_string());
        reply
    }

    /// Build the error reply: addresses swapped, id preserved. The error
    /// condition is always `service-unavailable` for now.
    pub fn error(&self) -> InfoQuery {
        let mut error = InfoQuery::new();
        error.envelope.from = self.envelope.to.clone();
        error.envelope.to = self.envelope.from.clone();
        error.envelope.id = self.envelope.id.clone();
        error.envelope.type_ = Some(iq_type::ERROR.to_string());
        error
    }

    /// Serialize to XML text. An `error` IQ always carries the fixed
    /// `service-unavailable` condition.
    pub fn to_xml(&self) -> String {
        let mut out = format!("<iq{}>", self.envelope.attrs_xml());
        out.push_str(&self.envelope.children_xml());
        if self.envelope.type_.as_deref() == Some(iq_type::ERROR) {
            out.push_str(&format!(
                "<error type='cancel'><service-unavailable xmlns='{}'/></error>",
                ns::STANZAS
            ));
        }
        out.push_str("</iq>");
        out
    }
}
