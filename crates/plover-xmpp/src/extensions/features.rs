//! Stream feature negotiation element.

use minidom::Element;

use crate::xml::ns;

/// Degree of support a peer advertises for a negotiable feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeatureSupport {
    /// Not advertised.
    #[default]
    NotAvailable,
    /// Advertised, optional.
    Optional,
    /// Advertised, mandatory-to-negotiate.
    Required,
}

impl FeatureSupport {
    /// Whether the feature was advertised at all.
    pub fn offered(&self) -> bool {
        !matches!(self, Self::NotAvailable)
    }
}

/// The parsed `stream:features` element.
#[derive(Debug, Clone, Default)]
pub struct StreamFeatures {
    /// STARTTLS advertisement.
    pub starttls: FeatureSupport,
    /// Whether SASL PLAIN is among the offered mechanisms.
    pub plain: bool,
    /// Whether the dialback errors feature is advertised.
    pub dialback: bool,
    /// Whether resource binding is advertised.
    pub bind: bool,
    /// Whether legacy session establishment is advertised.
    pub session: bool,
}

impl StreamFeatures {
    /// Parse a `stream:features` element.
    pub fn parse(element: &Element) -> Self {
        let mut features = StreamFeatures::default();

        for child in element.children() {
            match (child.name(), child.ns().as_str()) {
                ("starttls", ns::TLS) => {
                    features.starttls = if child.children().any(|c| c.name() == "required") {
                        FeatureSupport::Required
                    } else {
                        FeatureSupport::Optional
                    };
                }
                ("mechanisms", ns::SASL) => {
                    features.plain = child
                        .children()
                        .filter(|c| c.name() == "mechanism")
                        .any(|c| c.text() == "PLAIN");
                }
                ("dialback", _) => features.dialback = true,
                ("bind", ns::BIND) => features.bind = true,
                ("session", ns::SESSION) => features.session = true,
                _ => {}
            }
        }

        features
    }
}
