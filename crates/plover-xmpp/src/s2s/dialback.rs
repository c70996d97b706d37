//! Dialback key material and wire elements.
//!
//! The dialback key lets a receiving server check that whoever opened a
//! stream claiming to be `from` can answer for that domain, without
//! certificates. The key is derived from a per-attempt secret:
//!
//! ```text
//! key = hex(HMAC-SHA256(key = SHA256(secret), msg = "<to> <from> <streamID>"))
//! ```
//!
//! Keys are never persisted; the originating side recomputes them per
//! attempt and the verifying side compares verbatim.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::jid::Jid;

type HmacSha256 = Hmac<Sha256>;

/// Outcome of a dialback verification, as carried in the `type` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialbackResult {
    /// Verification successful.
    Valid,
    /// Verification failed.
    Invalid,
}

impl DialbackResult {
    /// The wire value of the `type` attribute.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        }
    }

    /// Parse a `type` attribute value.
    pub fn from_attr(s: &str) -> Option<Self> {
        match s {
            "valid" => Some(Self::Valid),
            "invalid" => Some(Self::Invalid),
            _ => None,
        }
    }
}

/// Derive the dialback key for one outbound attempt.
pub fn generate_key(secret: &str, to: &Jid, from: &Jid, stream_id: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(&Sha256::digest(secret.as_bytes()))
        .expect("HMAC can take key of any size");
    mac.update(format!("{} {} {}", to, from, stream_id).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Check a presented key against the deterministic derivation.
pub fn verify_key(presented: &str, secret: &str, to: &Jid, from: &Jid, stream_id: &str) -> bool {
    constant_time_eq(
        presented.as_bytes(),
        generate_key(secret, to, from, stream_id).as_bytes(),
    )
}

/// Constant-time comparison to prevent timing attacks.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Build the `db:result` key exchange sent by the originating server.
pub fn build_result(from: &Jid, to: &Jid, key: &str) -> String {
    format!(
        "<db:result xmlns:db='{}' from='{}' to='{}'>{}</db:result>",
        super::NS_DIALBACK,
        from,
        to,
        key
    )
}

/// Build the `db:result` answer sent by the receiving server.
pub fn build_result_response(from: &Jid, to: &Jid, result: DialbackResult) -> String {
    format!(
        "<db:result xmlns:db='{}' from='{}' to='{}' type='{}'/>",
        super::NS_DIALBACK,
        from,
        to,
        result.as_str()
    )
}

/// Build the `db:verify` request sent to the authoritative server.
pub fn build_verify(from: &Jid, to: &Jid, id: &str, key: &str) -> String {
    format!(
        "<db:verify xmlns:db='{}' from='{}' to='{}' id='{}'>{}</db:verify>",
        super::NS_DIALBACK,
        from,
        to,
        id,
        key
    )
}

/// Build the `db:verify` answer sent by the authoritative server.
pub fn build_verify_response(from: &str, to: &str, id: &str, result: DialbackResult) -> String {
    format!(
        "<db:verify xmlns:db='{}' from='{}' to='{}' id='{}' type='{}'/>",
        super::NS_DIALBACK,
        from,
        to,
        id,
        result.as_str()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jid(s: &str) -> Jid {
        s.parse().unwrap()
    }

    #[test]
    fn test_key_generation_is_deterministic() {
        let to = jid("b.example");
        let from = jid("a.example");

        let key1 = generate_key("secret", &to, &from, "stream-1");
        let key2 = generate_key("secret", &to, &from, "stream-1");
        assert_eq!(key1, key2);

        assert_ne!(key1, generate_key("secret", &to, &from, "stream-2"));
        assert_ne!(key1, generate_key("other", &to, &from, "stream-1"));
        assert_ne!(key1, generate_key("secret", &from, &to, "stream-1"));
    }

    #[test]
    fn test_key_is_hex_sha256_sized() {
        let key = generate_key("s", &jid("b.example"), &jid("a.example"), "id");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_verification_matches_generation_exactly() {
        let to = jid("b.example");
        let from = jid("a.example");
        let key = generate_key("secret", &to, &from, "stream-1");

        assert!(verify_key(&key, "secret", &to, &from, "stream-1"));
        assert!(!verify_key(&key, "secret", &to, &from, "stream-2"));
        assert!(!verify_key(&key, "wrong", &to, &from, "stream-1"));

        let mut tampered = key.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == '0' { '1' } else { '0' });
        assert!(!verify_key(&tampered, "secret", &to, &from, "stream-1"));
    }

    #[test]
    fn test_build_result() {
        let xml = build_result(&jid("a.example"), &jid("b.example"), "abc123");
        assert!(xml.contains("db:result"));
        assert!(xml.contains("from='a.example'"));
        assert!(xml.contains("to='b.example'"));
        assert!(xml.contains("abc123"));
    }

    #[test]
    fn test_build_verify_response() {
        let xml = build_verify_response("b.example", "a.example", "stream-1", DialbackResult::Valid);
        assert!(xml.contains("db:verify"));
        assert!(xml.contains("id='stream-1'"));
        assert!(xml.contains("type='valid'"));

        let xml = build_verify_response("b.example", "a.example", "stream-1", DialbackResult::Invalid);
        assert!(xml.contains("type='invalid'"));
    }

    #[test]
    fn test_result_type_attr() {
        assert_eq!(DialbackResult::Valid.as_str(), "valid");
        assert_eq!(DialbackResult::from_attr("valid"), Some(DialbackResult::Valid));
        assert_eq!(DialbackResult::from_attr("invalid"), Some(DialbackResult::Invalid));
        assert_eq!(DialbackResult::from_attr("maybe"), None);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"hello", b"hell"));
        assert!(constant_time_eq(b"", b""));
    }
}
