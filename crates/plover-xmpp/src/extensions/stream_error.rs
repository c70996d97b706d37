//! Stream-level error element.

use std::fmt;

use minidom::Element;

use crate::xml::ns;

/// A parsed `stream:error` received from the peer. Always fatal.
#[derive(Debug, Clone)]
pub struct StreamFailure {
    /// The defined condition (e.g. "not-authorized").
    pub condition: String,
    /// Optional descriptive text.
    pub text: Option<String>,
}

impl StreamFailure {
    /// Parse a `stream:error` element.
    pub fn parse(element: &Element) -> Self {
        let mut condition = "undefined-condition".to_string();
        let mut text = None;

        for child in element.children() {
            if child.name() == "text" && child.ns() == ns::STREAMS {
                text = Some(child.text());
            } else if child.ns() == ns::STREAMS {
                condition = child.name().to_string();
            }
        }

        StreamFailure { condition, text }
    }
}

impl fmt::Display for StreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.text {
            Some(ref text) => write!(f, "{} ({})", self.condition, text),
            None => write!(f, "{}", self.condition),
        }
    }
}
