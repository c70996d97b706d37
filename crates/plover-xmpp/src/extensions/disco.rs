//! Service discovery info payload.

use std::any::Any;

use minidom::Element;

use crate::stanza::{ExtensionParser, StanzaExtension};
use crate::xml::{escape, ns};

/// One advertised identity in a disco#info result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoIdentity {
    /// Identity category (e.g. "server", "component").
    pub category: String,
    /// Identity type within the category.
    pub type_: String,
    /// Human-readable name.
    pub name: Option<String>,
}

/// The disco#info query/result payload.
#[derive(Debug, Default)]
pub struct DiscoInfo {
    /// The node being queried, if any.
    pub node: Option<String>,
    /// Advertised identities.
    pub identities: Vec<DiscoIdentity>,
    /// Advertised feature namespaces.
    pub features: Vec<String>,
}

impl DiscoInfo {
    /// An empty query payload.
    pub fn query() -> Self {
        Self::default()
    }

    /// Add an identity.
    pub fn add_identity(&mut self, category: &str, type_: &str, name: Option<&str>) {
        self.identities.push(DiscoIdentity {
            category: category.to_string(),
            type_: type_.to_string(),
            name: name.map(str::to_string),
        });
    }

    /// Add a feature namespace.
    pub fn add_feature(&mut self, feature: &str) {
        self.features.push(feature.to_string());
    }
}

impl StanzaExtension for DiscoInfo {
    fn namespace(&self) -> &str {
        ns::DISCO_INFO
    }

    fn to_xml(&self) -> String {
        let mut out = format!("<query xmlns='{}'", ns::DISCO_INFO);
        if let Some(ref node) = self.node {
            out.push_str(&format!(" node='{}'", escape(node)));
        }
        out.push('>');
        for identity in &self.identities {
            out.push_str(&format!(
                "<identity category='{}' type='{}'",
                escape(&identity.category),
                escape(&identity.type_)
            ));
            if let Some(ref name) = identity.name {
                out.push_str(&format!(" name='{}'", escape(name)));
            }
            out.push_str("/>");
        }
        for feature in &self.features {
            out.push_str(&format!("<feature var='{}'/>", escape(feature)));
        }
        out.push_str("</query>");
        out
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Parser for the disco#info namespace.
pub struct DiscoInfoParser;

impl ExtensionParser for DiscoInfoParser {
    fn namespace(&self) -> &str {
        ns::DISCO_INFO
    }

    fn parse(&self, element: &Element) -> Option<Box<dyn StanzaExtension>> {
        if element.name() != "query" {
            return None;
        }

        let mut info = DiscoInfo {
            node: element.attr("node").map(str::to_string),
            ..Default::default()
        };

        for child in element.children() {
            match child.name() {
                "identity" => {
                    if let (Some(category), Some(type_)) = (child.attr("category"), child.attr("type")) {
                        info.identities.push(DiscoIdentity {
                            category: category.to_string(),
                            type_: type_.to_string(),
                            name: child.attr("name").map(str::to_string),
                        });
                    }
                }
                "feature" => {
                    if let Some(var) = child.attr("var") {
                        info.features.push(var.to_string());
                    }
                }
                _ => {}
            }
        }

        Some(Box::new(info))
    }
}
