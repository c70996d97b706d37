//! Message stanzas.

use minidom::Element;

use crate::stanza::{Envelope, ExtensionRegistry};
use crate::xml::escape;
use crate::XmppError;

/// A message stanza.
#[derive(Debug, Default)]
pub struct Message {
    /// Shared stanza attributes and extension payloads.
    pub envelope: Envelope,
    /// Message body text.
    pub body: Option<String>,
    /// Message subject.
    pub subject: Option<String>,
    /// Conversation thread id.
    pub thread: Option<String>,
}

impl Message {
    /// A fresh message with a generated id.
    pub fn new() -> Self {
        Self {
            envelope: Envelope::new(),
            ..Default::default()
        }
    }

    /// Parse a message element. Payload children are resolved through the
    /// registry; unrecognized namespaces are dropped whole.
    pub fn parse(element: &Element, registry: &ExtensionRegistry) -> Result<Self, XmppError> {
        let mut message = Message {
            envelope: Envelope::parse(element)?,
            ..Default::default()
        };

        for child in element.children() {
            match child.name() {
                "body" => message.body = Some(child.text()),
                "subject" => message.subject = Some(child.text()),
                "thread" => message.thread = Some(child.text()),
                _ => {
                    if let Some(payload) = registry.parse_child(child) {
                        message.envelope.children.push(payload);
                    }
                }
            }
        }

        Ok(message)
    }

    /// Serialize to XML text.
    pub fn to_xml(&self) -> String {
        let mut out = format!("<message{}>", self.envelope.attrs_xml());
        if let Some(ref subject) = self.subject {
            out.push_str(&format!("<subject>{}</subject>", escape(subject)));
        }
        if let Some(ref body) = self.body {
            out.push_str(&format!("<body>{}</body>", escape(body)));
        }
        if let Some(ref thread) = self.thread {
            out.push_str(&format!("<thread>{}</thread>", escape(thread)));
        }
        out.push_str(&self.envelope.children_xml());
        out.push_str("</message>");
        out
    }
}
