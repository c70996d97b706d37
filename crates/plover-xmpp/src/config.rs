//! Connection configuration.

use serde::{Deserialize, Serialize};

/// Client login configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// The account address, optionally carrying a preferred resource
    /// (e.g. "alice@example.com/phone").
    pub jid: String,
    /// Account password for SASL PLAIN.
    pub password: String,
}

/// Component handshake configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentConfig {
    /// The component's address (e.g. "push.example.com").
    pub domain: String,
    /// Shared secret for the handshake digest.
    pub secret: String,
}

/// Server-to-server configuration.
///
/// The host lists are policy input owned by the embedder; the engine reads
/// them and never mutates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// This server's domain (e.g. "example.com").
    pub domain: String,
    /// Hosts whose inbound connections are closed without reply.
    #[serde(default)]
    pub banned_hosts: Vec<String>,
    /// Hosts that negotiate TLS incorrectly; STARTTLS is never offered to
    /// or attempted with them.
    #[serde(default)]
    pub broken_tls_hosts: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            domain: "localhost".to_string(),
            banned_hosts: Vec::new(),
            broken_tls_hosts: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Whether inbound connections from this host are rejected outright.
    pub fn is_banned(&self, host: &str) -> bool {
        self.banned_hosts.iter().any(|h| h == host)
    }

    /// Whether TLS is known-broken for this host.
    pub fn is_tls_broken(&self, host: &str) -> bool {
        self.broken_tls_hosts.iter().any(|h| h == host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_from_json() {
        let config: ServerConfig = serde_json::from_str(
            r#"{"domain": "a.example", "banned_hosts": ["spam.example"]}"#,
        )
        .unwrap();

        assert_eq!(config.domain, "a.example");
        assert!(config.is_banned("spam.example"));
        // Omitted lists default to empty.
        assert!(config.broken_tls_hosts.is_empty());
    }

    #[test]
    fn test_host_lists() {
        let config = ServerConfig {
            domain: "example.com".into(),
            banned_hosts: vec!["spam.example".into()],
            broken_tls_hosts: vec!["legacy.example".into()],
        };

        assert!(config.is_banned("spam.example"));
        assert!(!config.is_banned("ok.example"));
        assert!(config.is_tls_broken("legacy.example"));
        assert!(!config.is_tls_broken("spam.example"));
    }
}
