//! Resource binding payload.

use std::any::Any;

use minidom::Element;

use crate::jid::Jid;
use crate::stanza::{ExtensionParser, StanzaExtension};
use crate::xml::{escape, ns};

/// The resource-binding payload.
///
/// A bind request optionally names the resource the client wants; the
/// server's response carries the full JID that was actually bound.
#[derive(Debug, Default)]
pub struct ResourceBinding {
    /// Requested resource (client side).
    pub resource: Option<String>,
    /// Bound full address (server side).
    pub jid: Option<Jid>,
}

impl ResourceBinding {
    /// A request for the given resource (or a server-assigned one if None).
    pub fn request(resource: Option<String>) -> Self {
        Self {
            resource,
            jid: None,
        }
    }
}

impl StanzaExtension for ResourceBinding {
    fn namespace(&self) -> &str {
        ns::BIND
    }

    fn to_xml(&self) -> String {
        let mut out = format!("<bind xmlns='{}'>", ns::BIND);
        if let Some(ref resource) = self.resource {
            out.push_str(&format!("<resource>{}</resource>", escape(resource)));
        }
        if let Some(ref jid) = self.jid {
            out.push_str(&format!("<jid>{}</jid>", escape(&jid.to_string())));
        }
        out.push_str("</bind>");
        out
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Parser for the resource-binding namespace.
pub struct BindParser;

impl ExtensionParser for BindParser {
    fn namespace(&self) -> &str {
        ns::BIND
    }

    fn parse(&self, element: &Element) -> Option<Box<dyn StanzaExtension>> {
        if element.name() != "bind" {
            return None;
        }

        let mut binding = ResourceBinding::default();
        for child in element.children() {
            match child.name() {
                "resource" => binding.resource = Some(child.text()),
                "jid" => binding.jid = child.text().parse().ok(),
                _ => {}
            }
        }
        Some(Box::new(binding))
    }
}
