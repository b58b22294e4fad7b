//! End-to-end tests over real loopback TCP sockets, no mocked transport.
//!
//! Unlike the teacher's daemon-plus-CLI harness, there is no external
//! process or namespace to stand up here: the whole servent is a
//! library, so these tests drive two or three in-process instances
//! against each other on `127.0.0.1` and assert on the public API.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use winny_core::cmds::QueryCmd;
use winny_core::config::Config;
use winny_core::{Command, FileKey, NodeAddr};
use winny_net::conn::{handshake, read_frame, write_frame, LocalIdentity};

fn identity(speed: u32, port: u32) -> LocalIdentity {
    LocalIdentity {
        speed,
        port,
        ddns: String::new(),
        clusters: [String::new(), String::new(), String::new()],
    }
}

async fn loopback_pair(server_port: u16) -> (TcpStream, TcpStream, std::net::SocketAddr) {
    let listener = TcpListener::bind(("127.0.0.1", server_port)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connect = TcpStream::connect(addr);
    let (accept_res, connect_res) = tokio::join!(listener.accept(), connect);
    let (server_stream, client_addr) = accept_res.unwrap();
    let client_stream = connect_res.unwrap();
    (server_stream, client_stream, client_addr)
}

#[tokio::test]
async fn handshake_reconciles_address_and_classifies_direction() {
    let (server_stream, client_stream, client_transport_addr) = loopback_pair(0).await;
    let client_local_addr = client_stream.local_addr().unwrap();

    let server_identity = identity(1000, 7743);
    let client_identity = identity(1000, client_local_addr.port() as u32);

    let server_task = tokio::spawn(async move {
        handshake(server_stream, client_transport_addr, false, &server_identity, 1 << 20)
            .await
            .unwrap()
    });
    let client_peer_addr = client_stream.peer_addr().unwrap();
    let client_established = handshake(client_stream, client_peer_addr, true, &client_identity, 1 << 20)
        .await
        .unwrap();
    let server_established = server_task.await.unwrap();

    // Speeds are equal, so the tie-break applies: acceptor upstream,
    // dialer downstream.
    assert!(!server_established.is_downstream);
    assert!(client_established.is_downstream);

    // Both ends are on loopback, so the address each side observes the
    // peer dialing from matches what the peer advertised.
    assert!(!client_established.is_nat);
    assert!(!server_established.is_nat);

    assert_eq!(
        server_established.remote_addr,
        NodeAddr::new(Ipv4Addr::LOCALHOST, client_local_addr.port())
    );
}

#[tokio::test]
async fn much_faster_remote_overrides_dial_direction_tie_break() {
    let (server_stream, client_stream, client_transport_addr) = loopback_pair(0).await;

    // The client advertises a much higher speed than the server, so the
    // speed ratio test should decide direction rather than the
    // dialer/acceptor tie-break: the slower side (the server, despite
    // being the acceptor) ends up downstream.
    let server_identity = identity(100, 7743);
    let client_identity = identity(10_000, 0);

    let server_task = tokio::spawn(async move {
        handshake(server_stream, client_transport_addr, false, &server_identity, 1 << 20)
            .await
            .unwrap()
    });
    let client_peer_addr = client_stream.peer_addr().unwrap();
    let client_established = handshake(client_stream, client_peer_addr, true, &client_identity, 1 << 20)
        .await
        .unwrap();
    let server_established = server_task.await.unwrap();

    assert!(server_established.is_downstream);
    assert!(!client_established.is_downstream);
}

#[tokio::test]
async fn steady_state_frame_roundtrips_over_the_established_sockets() {
    let (server_stream, client_stream, client_transport_addr) = loopback_pair(0).await;
    let server_identity = identity(1000, 7743);
    let client_identity = identity(1000, 0);

    let server_task = tokio::spawn(async move {
        handshake(server_stream, client_transport_addr, false, &server_identity, 1 << 20)
            .await
            .unwrap()
    });
    let client_peer_addr = client_stream.peer_addr().unwrap();
    let mut client_established = handshake(client_stream, client_peer_addr, true, &client_identity, 1 << 20)
        .await
        .unwrap();
    let mut server_established = server_task.await.unwrap();

    write_frame(
        &mut client_established.writer,
        &mut client_established.write_cipher,
        &Command::Spread,
    )
    .await
    .unwrap();

    let received = read_frame(
        &mut server_established.reader,
        &mut server_established.read_cipher,
        1 << 20,
        70 << 20,
    )
    .await
    .unwrap();

    assert_eq!(received, Command::Spread);
}

fn sample_file_key(hash_byte: u8, name: &str) -> FileKey {
    FileKey {
        node: NodeAddr::new(Ipv4Addr::new(203, 0, 113, 1), 7743),
        bbs_node: NodeAddr::new(Ipv4Addr::UNSPECIFIED, 0),
        size: 1024,
        hash: [hash_byte; 16],
        file_name: name.to_string(),
        trip: [0u8; 11],
        bbs_trip: Vec::new(),
        ttl: 7,
        ref_cnt: 1,
        timestamp: 0,
        is_ignored: false,
        key_ver: 1,
    }
}

#[tokio::test]
async fn servent_pair_gossips_query_results_to_a_live_search_subscription() {
    let mut server_cfg = Config::default();
    server_cfg.servent.speed = 1000;
    // Bind to an ephemeral port picked up front so the client can dial
    // it directly; Servent::bind itself wants a nonzero, already-chosen
    // port rather than asking the OS for one.
    let probe = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let server_port = probe.local_addr().unwrap().port();
    drop(probe);
    server_cfg.servent.port = server_port;

    let server = winny_net::Servent::bind(server_cfg).await.unwrap();

    let mut subscription = server.search("anime".to_string()).await;

    let query = QueryCmd {
        is_reply: false,
        is_spread: false,
        is_downstream: false,
        is_bbs: false,
        id: 1,
        keyword: "anime".to_string(),
        trip: [0u8; 11],
        nodes: Vec::new(),
        keys: vec![sample_file_key(0xAB, "anime_ep01.mkv")],
    };

    let client_stream = TcpStream::connect(("127.0.0.1", server_port)).await.unwrap();
    let client_identity = identity(1000, 0);
    let peer_addr = client_stream.peer_addr().unwrap();
    let mut established = handshake(client_stream, peer_addr, true, &client_identity, 1 << 20)
        .await
        .unwrap();

    write_frame(
        &mut established.writer,
        &mut established.write_cipher,
        &Command::Query(query),
    )
    .await
    .unwrap();

    let delivered = tokio::time::timeout(Duration::from_secs(2), subscription.results.recv())
        .await
        .expect("query result should arrive before the timeout")
        .expect("subscription channel should stay open");

    assert_eq!(delivered.file_name, "anime_ep01.mkv");

    subscription.unsubscribe().await;
    drop(server);
}
