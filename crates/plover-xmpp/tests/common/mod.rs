//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::sync::Once;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Initialize test logging once.
pub fn init_test() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    });
}

/// Read from the peer side until the accumulated text contains `needle`.
pub async fn read_until(peer: &mut DuplexStream, collected: &mut String, needle: &str) {
    while !collected.contains(needle) {
        let mut buf = [0u8; 4096];
        let n = peer.read(&mut buf).await.expect("peer read");
        assert!(n > 0, "peer closed while waiting for {:?}; got {:?}", needle, collected);
        collected.push_str(&String::from_utf8_lossy(&buf[..n]));
    }
}

/// Write script bytes to the peer side.
pub async fn send(peer: &mut DuplexStream, data: &str) {
    peer.write_all(data.as_bytes()).await.expect("peer write");
}

/// Extract the value of `attr` from the first tag in `xml` that contains
/// `marker`.
pub fn attr_of(xml: &str, marker: &str, attr: &str) -> Option<String> {
    let start = xml.find(marker)?;
    let tag_end = xml[start..].find('>')? + start;
    let tag = &xml[start..tag_end];
    for quote in ['\'', '"'] {
        let pattern = format!("{}={}", attr, quote);
        if let Some(pos) = tag.find(&pattern) {
            let value_start = pos + pattern.len();
            if let Some(len) = tag[value_start..].find(quote) {
                return Some(tag[value_start..value_start + len].to_string());
            }
        }
    }
    None
}
