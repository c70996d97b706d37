//! XMPP addresses.
//!
//! A JID names an entity on the network: `local@domain/resource`. The bare
//! form (`local@domain` or just `domain`) identifies an account or server,
//! the full form additionally names one session (resource).

use std::fmt;
use std::str::FromStr;

use crate::XmppError;

/// An immutable XMPP address.
///
/// Derived forms (`bare`, `with_resource`) produce new values; equality is
/// structural over all three fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Jid {
    domain: String,
    local: Option<String>,
    resource: Option<String>,
}

impl Jid {
    /// Create a bare domain JID.
    pub fn domain(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            local: None,
            resource: None,
        }
    }

    /// Create a bare `local@domain` JID.
    pub fn bare_parts(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            local: Some(local.into()),
            resource: None,
        }
    }

    /// The domain part.
    pub fn domain_part(&self) -> &str {
        &self.domain
    }

    /// The local part, if any.
    pub fn local_part(&self) -> Option<&str> {
        self.local.as_deref()
    }

    /// The resource part, if any.
    pub fn resource_part(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// The bare form of this address (resource stripped).
    pub fn bare(&self) -> Jid {
        Jid {
            domain: self.domain.clone(),
            local: self.local.clone(),
            resource: None,
        }
    }

    /// A copy of this address carrying the given resource.
    pub fn with_resource(&self, resource: impl Into<String>) -> Jid {
        Jid {
            domain: self.domain.clone(),
            local: self.local.clone(),
            resource: Some(resource.into()),
        }
    }

    /// The bare JID of this address's domain alone.
    pub fn domain_jid(&self) -> Jid {
        Jid::domain(self.domain.clone())
    }

    /// Whether this is a full JID (has a resource).
    pub fn is_full(&self) -> bool {
        self.resource.is_some()
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref local) = self.local {
            write!(f, "{}@", local)?;
        }
        write!(f, "{}", self.domain)?;
        if let Some(ref resource) = self.resource {
            write!(f, "/{}", resource)?;
        }
        Ok(())
    }
}

impl FromStr for Jid {
    type Err = XmppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(XmppError::JidMalformed("empty".into()));
        }

        let (bare, resource) = match s.split_once('/') {
            Some((bare, resource)) => {
                if resource.is_empty() {
                    return Err(XmppError::JidMalformed(s.into()));
                }
                (bare, Some(resource.to_string()))
            }
            None => (s, None),
        };

        let (local, domain) = match bare.split_once('@') {
            Some((local, domain)) => {
                if local.is_empty() {
                    return Err(XmppError::JidMalformed(s.into()));
                }
                (Some(local.to_string()), domain)
            }
            None => (None, bare),
        };

        if domain.is_empty() || domain.contains('@') {
            return Err(XmppError::JidMalformed(s.into()));
        }

        Ok(Jid {
            domain: domain.to_string(),
            local,
            resource,
        })
    }
}
