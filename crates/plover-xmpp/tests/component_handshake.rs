//! Component handshake end-to-end, both directions, against scripted
//! peers on an in-memory pipe.
//!
//! Run with: `cargo test -p plover-xmpp --test component_handshake`

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{duplex, AsyncReadExt};

use plover_xmpp::component::{handshake_digest, ComponentAccept, ComponentLogin, ComponentState};
use plover_xmpp::ids::SequentialGenerator;
use plover_xmpp::stream::{StreamListener, Transport};
use plover_xmpp::{ComponentConfig, XmppError};

use common::{init_test, read_until, send};

struct ReadyFlag {
    ready: AtomicBool,
    failed: AtomicBool,
}

impl StreamListener for ReadyFlag {
    fn on_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    fn on_failure(&self, _reason: &XmppError) {
        self.failed.store(true, Ordering::SeqCst);
    }
}

fn component_config(secret: &str) -> ComponentConfig {
    ComponentConfig {
        domain: "push.example.com".into(),
        secret: secret.into(),
    }
}

#[tokio::test]
async fn test_outbound_handshake_sends_digest_of_stream_id() {
    init_test();

    let (ours, mut peer) = duplex(65536);
    let (reader, writer) = tokio::io::split(ours);

    let mut stream =
        ComponentLogin::stream(&component_config("s3cr3t"), Transport::new(reader, writer)).unwrap();
    let listener = Arc::new(ReadyFlag {
        ready: AtomicBool::new(false),
        failed: AtomicBool::new(false),
    });
    stream.core_mut().add_stream_listener(listener.clone());

    let server = tokio::spawn(async move {
        let mut seen = String::new();
        read_until(&mut peer, &mut seen, "<stream:stream").await;
        assert!(seen.contains("jabber:component:accept"));
        assert!(seen.contains("to='push.example.com'"));

        send(
            &mut peer,
            "<stream:stream xmlns='jabber:component:accept' \
             xmlns:stream='http://etherx.jabber.org/streams' \
             from='push.example.com' id='abc123'>",
        )
        .await;

        // hex(SHA1("abc123" || "s3cr3t"))
        read_until(&mut peer, &mut seen, "</handshake>").await;
        assert!(seen.contains("<handshake>49fc1ea83a54123ae5a273341bed522fe7d4b91c</handshake>"));
        send(&mut peer, "<handshake/>").await;
        send(&mut peer, "</stream:stream>").await;
    });

    stream.run().await.unwrap();
    server.await.unwrap();

    assert_eq!(stream.handler().state(), ComponentState::Authenticated);
    assert!(listener.ready.load(Ordering::SeqCst));
    assert!(!listener.failed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_outbound_rejects_wrong_server_identity() {
    init_test();

    let (ours, mut peer) = duplex(65536);
    let (reader, writer) = tokio::io::split(ours);

    let mut stream =
        ComponentLogin::stream(&component_config("s3cr3t"), Transport::new(reader, writer)).unwrap();

    let server = tokio::spawn(async move {
        let mut seen = String::new();
        read_until(&mut peer, &mut seen, "<stream:stream").await;
        send(
            &mut peer,
            "<stream:stream xmlns='jabber:component:accept' \
             xmlns:stream='http://etherx.jabber.org/streams' \
             from='imposter.example.com' id='abc123'>",
        )
        .await;
    });

    let err = stream.run().await.unwrap_err();
    server.await.unwrap();

    assert!(matches!(err, XmppError::AuthFailed(_)));
    assert_eq!(stream.handler().state(), ComponentState::Failed);
}

#[tokio::test]
async fn test_inbound_accepts_matching_digest() {
    init_test();

    let (ours, mut peer) = duplex(65536);
    let (reader, writer) = tokio::io::split(ours);

    let mut stream =
        ComponentAccept::stream(&component_config("s3cr3t"), Transport::new(reader, writer)).unwrap();
    stream
        .core_mut()
        .set_ids(Arc::new(SequentialGenerator::new("sid")));

    let component = tokio::spawn(async move {
        send(
            &mut peer,
            "<stream:stream xmlns='jabber:component:accept' \
             xmlns:stream='http://etherx.jabber.org/streams' to='push.example.com'>",
        )
        .await;

        let mut seen = String::new();
        read_until(&mut peer, &mut seen, "id=").await;
        // First generated id is "sid-1".
        assert!(seen.contains("id='sid-1'"));

        let digest = handshake_digest("sid-1", "s3cr3t");
        send(&mut peer, &format!("<handshake>{}</handshake>", digest)).await;

        read_until(&mut peer, &mut seen, "<handshake/>").await;
        send(&mut peer, "</stream:stream>").await;
    });

    stream.run().await.unwrap();
    component.await.unwrap();

    assert_eq!(stream.handler().state(), ComponentState::Authenticated);
    assert!(stream.core().authenticated());
}

#[tokio::test]
async fn test_inbound_rejects_wrong_digest() {
    init_test();

    let (ours, mut peer) = duplex(65536);
    let (reader, writer) = tokio::io::split(ours);

    let mut stream =
        ComponentAccept::stream(&component_config("s3cr3t"), Transport::new(reader, writer)).unwrap();
    let listener = Arc::new(ReadyFlag {
        ready: AtomicBool::new(false),
        failed: AtomicBool::new(false),
    });
    stream.core_mut().add_stream_listener(listener.clone());

    let component = tokio::spawn(async move {
        send(
            &mut peer,
            "<stream:stream xmlns='jabber:component:accept' \
             xmlns:stream='http://etherx.jabber.org/streams' to='push.example.com'>",
        )
        .await;

        let mut seen = String::new();
        read_until(&mut peer, &mut seen, "id=").await;
        send(
            &mut peer,
            &format!("<handshake>{}</handshake>", handshake_digest("whatever", "wrong")),
        )
        .await;

        // The acceptor answers with a not-authorized stream error.
        read_until(&mut peer, &mut seen, "</stream:stream>").await;
        assert!(seen.contains("<not-authorized"));
        seen
    });

    let err = stream.run().await.unwrap_err();
    component.await.unwrap();

    assert!(matches!(err, XmppError::AuthFailed(_)));
    assert_eq!(stream.handler().state(), ComponentState::Failed);
    assert!(listener.failed.load(Ordering::SeqCst));
    assert!(!listener.ready.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_inbound_rejects_wrong_namespace() {
    init_test();

    let (ours, mut peer) = duplex(65536);
    let (reader, writer) = tokio::io::split(ours);

    let mut stream =
        ComponentAccept::stream(&component_config("s3cr3t"), Transport::new(reader, writer)).unwrap();

    let component = tokio::spawn(async move {
        send(
            &mut peer,
            "<stream:stream xmlns='jabber:client' \
             xmlns:stream='http://etherx.jabber.org/streams' to='push.example.com'>",
        )
        .await;
        let mut buf = [0u8; 1024];
        let _ = peer.read(&mut buf).await;
    });

    let err = stream.run().await.unwrap_err();
    component.await.unwrap();

    assert!(matches!(err, XmppError::Stream(_)));
}
