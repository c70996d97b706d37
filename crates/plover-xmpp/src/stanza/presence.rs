//! Presence stanzas.

use minidom::Element;

use crate::stanza::{Envelope, ExtensionRegistry};
use crate::xml::escape;
use crate::XmppError;

/// A presence stanza.
#[derive(Debug, Default)]
pub struct Presence {
    /// Shared stanza attributes and extension payloads.
    pub envelope: Envelope,
    /// Availability sub-state (away / chat / dnd / xa).
    pub show: Option<String>,
    /// Human-readable status line.
    pub status: Option<String>,
    /// Priority, -128..=127. Out-of-range or unparsable values stay unset.
    pub priority: Option<i8>,
}

impl Presence {
    /// A fresh presence with a generated id.
    pub fn new() -> Self {
        Self {
            envelope: Envelope::new(),
            ..Default::default()
        }
    }

    /// Parse a presence element.
    pub fn parse(element: &Element, registry: &ExtensionRegistry) -> Result<Self, XmppError> {
        let mut presence = Presence {
            envelope: Envelope::parse(element)?,
            ..Default::default()
        };

        for child in element.children() {
            match child.name() {
                "show" => presence.show = Some(child.text()),
                "status" => presence.status = Some(child.text()),
                "priority" => presence.priority = child.text().trim().parse().ok(),
                _ => {
                    if let Some(payload) = registry.parse_child(child) {
                        presence.envelope.children.push(payload);
                    }
                }
            }
        }

        Ok(presence)
    }

    /// Build an empty reply addressed back at the sender.
    pub fn reply(&self) -> Presence {
        let mut reply = Presence::new();
        reply.envelope.from = self.envelope.to.clone();
        reply.envelope.to = self.envelope.from.clone();
        reply
    }

    /// Serialize to XML text.
    pub fn to_xml(&self) -> String {
        let mut out = format!("<presence{}>", self.envelope.attrs_xml());
        if let Some(ref show) = self.show {
            out.push_str(&format!("<show>{}</show>", escape(show)));
        }
        if let Some(priority) = self.priority {
            out.push_str(&format!("<priority>{}</priority>", priority));
        }
        if let Some(ref status) = self.status {
            out.push_str(&format!("<status>{}</status>", escape(status)));
        }
        out.push_str(&self.envelope.children_xml());
        out.push_str("</presence>");
        out
    }
}
