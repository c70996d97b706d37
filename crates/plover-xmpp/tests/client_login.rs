//! Client login end-to-end: feature discovery, SASL PLAIN, stream
//! restart, resource binding and the ready notification, against a
//! scripted server on an in-memory pipe.
//!
//! Run with: `cargo test -p plover-xmpp --test client_login`

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::duplex;

use plover_xmpp::stream::{StreamListener, Transport};
use plover_xmpp::{ClientConfig, ClientLogin, XmppError};

use common::{attr_of, init_test, read_until, send};

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

fn client_config() -> ClientConfig {
    ClientConfig {
        jid: "alice@example.com/phone".into(),
        password: "secret".into(),
    }
}

const FEATURES_PLAIN: &str = "<stream:features>\
    <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>PLAIN</mechanism></mechanisms>\
    </stream:features>";

const FEATURES_BIND: &str = "<stream:features>\
    <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/>\
    </stream:features>";

fn server_header(id: &str) -> String {
    format!(
        "<?xml version='1.0'?><stream:stream xmlns='jabber:client' \
         xmlns:stream='http://etherx.jabber.org/streams' id='{}' from='example.com' version='1.0'>",
        id
    )
}

#[tokio::test]
async fn test_login_binds_requested_resource() {
    init_test();

    let (ours, mut peer) = duplex(65536);
    let (reader, writer) = tokio::io::split(ours);

    let mut stream = ClientLogin::stream(&client_config(), Transport::new(reader, writer)).unwrap();
    let listener = Arc::new(ReadyFlag {
        ready: AtomicBool::new(false),
        failed: AtomicBool::new(false),
    });
    stream.core_mut().add_stream_listener(listener.clone());

    let server = tokio::spawn(async move {
        let mut seen = String::new();

        // Opening header from the client, then our header and features.
        read_until(&mut peer, &mut seen, "<stream:stream").await;
        assert!(seen.contains("to='example.com'"));
        send(&mut peer, &server_header("s1")).await;
        send(&mut peer, FEATURES_PLAIN).await;

        // SASL PLAIN with base64("alice@example.com\0alice\0secret").
        read_until(&mut peer, &mut seen, "</auth>").await;
        assert!(seen.contains("mechanism='PLAIN'"));
        assert!(seen.contains("YWxpY2VAZXhhbXBsZS5jb20AYWxpY2UAc2VjcmV0"));
        send(&mut peer, "<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>").await;

        // The restarted stream.
        seen.clear();
        read_until(&mut peer, &mut seen, "<stream:stream").await;
        send(&mut peer, &server_header("s2")).await;
        send(&mut peer, FEATURES_BIND).await;

        // Bind request; answer with the bound full JID.
        read_until(&mut peer, &mut seen, "</iq>").await;
        assert!(seen.contains("<resource>phone</resource>"));
        let bind_id = attr_of(&seen, "<iq", "id").expect("bind iq id");
        send(
            &mut peer,
            &format!(
                "<iq from='example.com' id='{}' type='result'>\
                 <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'>\
                 <jid>alice@example.com/phone</jid></bind></iq>",
                bind_id
            ),
        )
        .await;

        // Legacy session establishment follows the ready notification.
        seen.clear();
        read_until(&mut peer, &mut seen, "</iq>").await;
        assert!(seen.contains("id='sess'"));
        assert!(seen.contains("urn:ietf:params:xml:ns:xmpp-session"));

        // End the stream cleanly.
        send(&mut peer, "</stream:stream>").await;
        seen
    });

    stream.run().await.unwrap();
    server.await.unwrap();

    assert!(listener.ready.load(Ordering::SeqCst));
    assert!(!listener.failed.load(Ordering::SeqCst));
    assert_eq!(stream.core().local().to_string(), "alice@example.com/phone");
    assert!(stream.core().authenticated());
}

#[tokio::test]
async fn test_login_adopts_server_assigned_resource() {
    init_test();

    let (ours, mut peer) = duplex(65536);
    let (reader, writer) = tokio::io::split(ours);

    let config = ClientConfig {
        jid: "alice@example.com".into(),
        password: "secret".into(),
    };
    let mut stream = ClientLogin::stream(&config, Transport::new(reader, writer)).unwrap();

    let server = tokio::spawn(async move {
        let mut seen = String::new();
        read_until(&mut peer, &mut seen, "<stream:stream").await;
        send(&mut peer, &server_header("s1")).await;
        send(&mut peer, FEATURES_PLAIN).await;

        read_until(&mut peer, &mut seen, "</auth>").await;
        send(&mut peer, "<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>").await;

        seen.clear();
        read_until(&mut peer, &mut seen, "<stream:stream").await;
        send(&mut peer, &server_header("s2")).await;
        send(&mut peer, FEATURES_BIND).await;

        read_until(&mut peer, &mut seen, "</iq>").await;
        let bind_id = attr_of(&seen, "<iq", "id").expect("bind iq id");
        send(
            &mut peer,
            &format!(
                "<iq from='example.com' id='{}' type='result'>\
                 <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'>\
                 <jid>alice@example.com/gen-42</jid></bind></iq>",
                bind_id
            ),
        )
        .await;

        seen.clear();
        read_until(&mut peer, &mut seen, "</iq>").await;
        send(&mut peer, "</stream:stream>").await;
    });

    stream.run().await.unwrap();
    server.await.unwrap();

    assert_eq!(stream.core().local().to_string(), "alice@example.com/gen-42");
}

#[tokio::test]
async fn test_login_fails_when_plain_unsupported() {
    init_test();

    let (ours, mut peer) = duplex(65536);
    let (reader, writer) = tokio::io::split(ours);

    let mut stream = ClientLogin::stream(&client_config(), Transport::new(reader, writer)).unwrap();
    let listener = Arc::new(ReadyFlag {
        ready: AtomicBool::new(false),
        failed: AtomicBool::new(false),
    });
    stream.core_mut().add_stream_listener(listener.clone());

    let server = tokio::spawn(async move {
        let mut seen = String::new();
        read_until(&mut peer, &mut seen, "<stream:stream").await;
        send(&mut peer, &server_header("s1")).await;
        send(
            &mut peer,
            "<stream:features>\
             <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
             <mechanism>SCRAM-SHA-256</mechanism></mechanisms></stream:features>",
        )
        .await;
    });

    let err = stream.run().await.unwrap_err();
    server.await.unwrap();

    assert!(matches!(err, XmppError::AuthFailed(_)));
    assert!(listener.failed.load(Ordering::SeqCst));
    assert!(!listener.ready.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_login_fails_when_starttls_required() {
    init_test();

    let (ours, mut peer) = duplex(65536);
    let (reader, writer) = tokio::io::split(ours);

    let mut stream = ClientLogin::stream(&client_config(), Transport::new(reader, writer)).unwrap();

    let server = tokio::spawn(async move {
        let mut seen = String::new();
        read_until(&mut peer, &mut seen, "<stream:stream").await;
        send(&mut peer, &server_header("s1")).await;
        send(
            &mut peer,
            "<stream:features>\
             <starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'><required/></starttls>\
             <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
             <mechanism>PLAIN</mechanism></mechanisms></stream:features>",
        )
        .await;
    });

    let err = stream.run().await.unwrap_err();
    server.await.unwrap();

    assert!(matches!(err, XmppError::AuthFailed(_)));
}

#[tokio::test]
async fn test_sasl_rejection_names_offending_element() {
    init_test();

    let (ours, mut peer) = duplex(65536);
    let (reader, writer) = tokio::io::split(ours);

    let mut stream = ClientLogin::stream(&client_config(), Transport::new(reader, writer)).unwrap();

    let server = tokio::spawn(async move {
        let mut seen = String::new();
        read_until(&mut peer, &mut seen, "<stream:stream").await;
        send(&mut peer, &server_header("s1")).await;
        send(&mut peer, FEATURES_PLAIN).await;

        read_until(&mut peer, &mut seen, "</auth>").await;
        send(
            &mut peer,
            "<failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><not-authorized/></failure>",
        )
        .await;
    });

    let err = stream.run().await.unwrap_err();
    server.await.unwrap();

    match err {
        XmppError::AuthFailed(reason) => assert!(reason.contains("failure")),
        other => panic!("expected AuthFailed, got {:?}", other),
    }
}
