//! End-to-end key agreement over real loopback sockets: the signed DH
//! handshake, encrypted traffic afterwards, and rejection of responses
//! signed by the wrong key.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use node_transport::crypto::ecdsa::{Curve, KeyPairGenerator, Signer, Verifier};
use node_transport::crypto::sha::HashKind;
use node_transport::protocol::handshake;
use node_transport::protocol::packets::crypto::DhKeyExchangeRequest;
use node_transport::protocol::packets::network::Echo;
use node_transport::protocol::packets::register_builtin_packets;
use node_transport::{NodeError, PacketDispatcher, Session};

struct Peer {
    session: Arc<Session>,
    dispatcher: Arc<PacketDispatcher>,
}

/// A connected session with its receiver wired into a dispatcher.
fn wire(session: Arc<Session>) -> Peer {
    let dispatcher = PacketDispatcher::start();
    let sink = dispatcher.clone();
    session
        .set_packet_receiver(move |envelope| sink.enqueue_packet(envelope))
        .unwrap();
    Peer {
        session,
        dispatcher,
    }
}

async fn connected_peers() -> (Peer, Peer) {
    register_builtin_packets();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).await.unwrap();
    let (accepted, _) = listener.accept().await.unwrap();
    (wire(Session::start(client)), wire(Session::start(accepted)))
}

/// Full handshake, then an encrypted echo round-trip: the client sends
/// `Echo{"0"}` and reads `Echo{"1"}` back, all under AES.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn handshake_then_encrypted_echo() {
    let (client, server) = connected_peers().await;

    let pair = KeyPairGenerator::new(Curve::Secp256k1).generate().unwrap();
    let signer = Signer::from_private_key_pem(&pair.private_pem, HashKind::Sha256).unwrap();
    let verifier = Verifier::from_public_key_pem(&pair.public_pem, HashKind::Sha256).unwrap();

    // Server: answer the key exchange, then echo incremented payloads.
    let responder = server.session.clone();
    server
        .dispatcher
        .register_default_handler::<Echo, _>(move |echo: Echo| {
            let next = echo.text.parse::<i64>().unwrap() + 1;
            let session = responder.clone();
            tokio::spawn(async move {
                session
                    .send_packet(Echo {
                        text: next.to_string(),
                    })
                    .await;
            });
        });

    let server_session = server.session.clone();
    let server_dispatcher = server.dispatcher.clone();
    let server_task = tokio::spawn(async move {
        let request: DhKeyExchangeRequest = server_dispatcher
            .await_packet(Some(Duration::from_secs(5)))
            .await
            .expect("no key exchange request arrived");
        handshake::server_key_exchange(&server_session, &signer, &request)
            .await
            .expect("server handshake failed");
    });

    handshake::client_key_exchange(
        &client.session,
        &client.dispatcher,
        &verifier,
        Some(Duration::from_secs(5)),
    )
    .await
    .expect("client handshake failed");
    server_task.await.unwrap();

    assert!(client.session.secured());
    assert!(server.session.secured());

    assert!(client.session.send_packet(Echo { text: "0".into() }).await);
    let reply: Echo = client
        .dispatcher
        .await_packet(Some(Duration::from_secs(5)))
        .await
        .expect("no echo reply arrived");
    assert_eq!(reply.text, "1");

    client.session.close();
    server.session.close();
}

/// A response signed by a different key is rejected: the client aborts
/// without installing encryption.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn wrong_signing_key_aborts_handshake() {
    let (client, server) = connected_peers().await;

    let server_pair = KeyPairGenerator::new(Curve::Secp256k1).generate().unwrap();
    let other_pair = KeyPairGenerator::new(Curve::Secp256k1).generate().unwrap();

    // Server signs with its own key; the client trusts a different one.
    let signer =
        Signer::from_private_key_pem(&server_pair.private_pem, HashKind::Sha256).unwrap();
    let verifier =
        Verifier::from_public_key_pem(&other_pair.public_pem, HashKind::Sha256).unwrap();

    let server_session = server.session.clone();
    let server_dispatcher = server.dispatcher.clone();
    tokio::spawn(async move {
        if let Some(request) = server_dispatcher
            .await_packet::<DhKeyExchangeRequest>(Some(Duration::from_secs(5)))
            .await
        {
            let _ = handshake::server_key_exchange(&server_session, &signer, &request).await;
        }
    });

    let result = handshake::client_key_exchange(
        &client.session,
        &client.dispatcher,
        &verifier,
        Some(Duration::from_secs(5)),
    )
    .await;

    assert!(matches!(result, Err(NodeError::Handshake(_))));
    assert!(!client.session.secured());

    client.session.close();
    server.session.close();
}
