//! End-to-end coverage driving the real client and server modules against
//! each other over loopback sockets — no protocol helpers duplicated here.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;

use drop_tftp::client;
use drop_tftp::codec::{self, BLOCK_SIZE, ErrorCode, MAX_PACKET, Packet};
use drop_tftp::server;

async fn start_server(dir: std::path::PathBuf) -> (SocketAddr, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let probe = UdpSocket::bind("[::1]:0").await.unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    tokio::spawn(server::run(addr, false, dir, shutdown_rx));
    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, shutdown_tx)
}

#[tokio::test]
async fn uploads_small_file_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let (server_addr, shutdown) = start_server(dir.path().to_path_buf()).await;

    let client_sock = UdpSocket::bind("[::1]:0").await.unwrap();
    client_sock.connect(server_addr).await.unwrap();

    let content = b"Hello, TFTP world! This is an upload test.".to_vec();
    let sent = client::upload(&client_sock, &content[..], "test.txt", "octet", |_, _| {})
        .await
        .unwrap();
    assert_eq!(sent, content.len() as u64);

    let written = tokio::fs::read(dir.path().join("test.txt")).await.unwrap();
    assert_eq!(written, content);

    let _ = shutdown.send(true);
}

#[tokio::test]
async fn uploads_into_a_new_subdirectory() {
    let dir = tempfile::tempdir().unwrap();
    let (server_addr, shutdown) = start_server(dir.path().to_path_buf()).await;

    let client_sock = UdpSocket::bind("[::1]:0").await.unwrap();
    client_sock.connect(server_addr).await.unwrap();

    let content = b"uploaded into a new subdirectory".to_vec();
    client::upload(&client_sock, &content[..], "new_dir/sub/uploaded.txt", "octet", |_, _| {})
        .await
        .unwrap();

    let written = tokio::fs::read(dir.path().join("new_dir/sub/uploaded.txt"))
        .await
        .unwrap();
    assert_eq!(written, content);

    let _ = shutdown.send(true);
}

#[tokio::test]
async fn uploads_empty_file() {
    let dir = tempfile::tempdir().unwrap();
    let (server_addr, shutdown) = start_server(dir.path().to_path_buf()).await;

    let client_sock = UdpSocket::bind("[::1]:0").await.unwrap();
    client_sock.connect(server_addr).await.unwrap();

    let sent = client::upload(&client_sock, &b""[..], "empty.bin", "octet", |_, _| {})
        .await
        .unwrap();
    assert_eq!(sent, 0);

    let written = tokio::fs::read(dir.path().join("empty.bin")).await.unwrap();
    assert!(written.is_empty());

    let _ = shutdown.send(true);
}

#[tokio::test]
async fn uploads_file_exactly_one_block_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let (server_addr, shutdown) = start_server(dir.path().to_path_buf()).await;

    let client_sock = UdpSocket::bind("[::1]:0").await.unwrap();
    client_sock.connect(server_addr).await.unwrap();

    let content = vec![42u8; BLOCK_SIZE];
    client::upload(&client_sock, &content[..], "exact.bin", "octet", |_, _| {})
        .await
        .unwrap();

    let written = tokio::fs::read(dir.path().join("exact.bin")).await.unwrap();
    assert_eq!(written, content);

    let _ = shutdown.send(true);
}

#[tokio::test]
async fn uploads_file_one_byte_past_block_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let (server_addr, shutdown) = start_server(dir.path().to_path_buf()).await;

    let client_sock = UdpSocket::bind("[::1]:0").await.unwrap();
    client_sock.connect(server_addr).await.unwrap();

    let mut content = vec![7u8; BLOCK_SIZE];
    content.push(0xFF);
    client::upload(&client_sock, &content[..], "over.bin", "octet", |_, _| {})
        .await
        .unwrap();

    let written = tokio::fs::read(dir.path().join("over.bin")).await.unwrap();
    assert_eq!(written, content);

    let _ = shutdown.send(true);
}

#[tokio::test]
async fn two_concurrent_uploads_do_not_interfere() {
    let dir = tempfile::tempdir().unwrap();
    let (server_addr, shutdown) = start_server(dir.path().to_path_buf()).await;

    let a_content = vec![1u8; BLOCK_SIZE * 2 + 17];
    let b_content = vec![2u8; BLOCK_SIZE * 3 + 5];

    let a = {
        let content = a_content.clone();
        tokio::spawn(async move {
            let sock = UdpSocket::bind("[::1]:0").await.unwrap();
            sock.connect(server_addr).await.unwrap();
            client::upload(&sock, &content[..], "a.bin", "octet", |_, _| {})
                .await
                .unwrap();
        })
    };
    let b = {
        let content = b_content.clone();
        tokio::spawn(async move {
            let sock = UdpSocket::bind("[::1]:0").await.unwrap();
            sock.connect(server_addr).await.unwrap();
            client::upload(&sock, &content[..], "b.bin", "octet", |_, _| {})
                .await
                .unwrap();
        })
    };

    a.await.unwrap();
    b.await.unwrap();

    assert_eq!(tokio::fs::read(dir.path().join("a.bin")).await.unwrap(), a_content);
    assert_eq!(tokio::fs::read(dir.path().join("b.bin")).await.unwrap(), b_content);

    let _ = shutdown.send(true);
}

#[tokio::test]
async fn duplicate_data_after_ack_is_re_acked_without_rewriting() {
    let dir = tempfile::tempdir().unwrap();
    let (server_addr, shutdown) = start_server(dir.path().to_path_buf()).await;

    let client_sock = UdpSocket::bind("[::1]:0").await.unwrap();
    client_sock.connect(server_addr).await.unwrap();

    let mut out = [0u8; MAX_PACKET];
    let n = codec::encode_wrq(&mut out, "dup.txt", "octet").unwrap();
    client_sock.send(&out[..n]).await.unwrap();

    let mut in_buf = [0u8; MAX_PACKET];
    let n = tokio::time::timeout(Duration::from_secs(2), client_sock.recv(&mut in_buf))
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(codec::decode(&in_buf[..n]).unwrap(), Packet::ACK { block: 0 }));

    let payload = b"final block";
    let n = codec::encode_data(&mut out, 1, payload).unwrap();

    // Send the same DATA block twice; each must be ACKed.
    for _ in 0..2 {
        client_sock.send(&out[..n]).await.unwrap();
        let n = tokio::time::timeout(Duration::from_secs(2), client_sock.recv(&mut in_buf))
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(codec::decode(&in_buf[..n]).unwrap(), Packet::ACK { block: 1 }));
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    let written = tokio::fs::read(dir.path().join("dup.txt")).await.unwrap();
    assert_eq!(written, payload);

    let _ = shutdown.send(true);
}

#[tokio::test]
async fn out_of_sequence_data_block_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (server_addr, shutdown) = start_server(dir.path().to_path_buf()).await;

    let client_sock = UdpSocket::bind("[::1]:0").await.unwrap();
    client_sock.connect(server_addr).await.unwrap();

    let mut out = [0u8; MAX_PACKET];
    let n = codec::encode_wrq(&mut out, "gap.txt", "octet").unwrap();
    client_sock.send(&out[..n]).await.unwrap();

    let mut in_buf = [0u8; MAX_PACKET];
    let n = tokio::time::timeout(Duration::from_secs(2), client_sock.recv(&mut in_buf))
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(codec::decode(&in_buf[..n]).unwrap(), Packet::ACK { block: 0 }));

    // Skip straight to block 2 instead of sending block 1.
    let n = codec::encode_data(&mut out, 2, b"oops").unwrap();
    client_sock.send(&out[..n]).await.unwrap();

    let n = tokio::time::timeout(Duration::from_secs(2), client_sock.recv(&mut in_buf))
        .await
        .unwrap()
        .unwrap();
    match codec::decode(&in_buf[..n]).unwrap() {
        Packet::ERROR { code, .. } => assert_eq!(code, ErrorCode::IllegalOperation as u16),
        other => panic!("expected ERROR, got {other:?}"),
    }

    let _ = shutdown.send(true);
}

#[tokio::test]
async fn malformed_wrq_is_silently_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let (server_addr, shutdown) = start_server(dir.path().to_path_buf()).await;

    let client_sock = UdpSocket::bind("[::1]:0").await.unwrap();
    client_sock.connect(server_addr).await.unwrap();

    // Opcode 2 (WRQ) with no NUL-terminated filename/mode at all.
    client_sock.send(&[0x00, 0x02, 0xFF, 0xFF]).await.unwrap();

    let mut in_buf = [0u8; MAX_PACKET];
    let result = tokio::time::timeout(Duration::from_millis(300), client_sock.recv(&mut in_buf)).await;
    assert!(result.is_err(), "server must not reply to an undecodable datagram");

    let _ = shutdown.send(true);
}

#[tokio::test]
async fn path_traversal_attempt_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (server_addr, shutdown) = start_server(dir.path().to_path_buf()).await;

    let client_sock = UdpSocket::bind("[::1]:0").await.unwrap();
    client_sock.connect(server_addr).await.unwrap();

    let mut out = [0u8; MAX_PACKET];
    let n = codec::encode_wrq(&mut out, "../escape.txt", "octet").unwrap();
    client_sock.send(&out[..n]).await.unwrap();

    let mut in_buf = [0u8; MAX_PACKET];
    let n = tokio::time::timeout(Duration::from_secs(2), client_sock.recv(&mut in_buf))
        .await
        .unwrap()
        .unwrap();
    match codec::decode(&in_buf[..n]).unwrap() {
        Packet::ERROR { .. } => {}
        other => panic!("expected ERROR, got {other:?}"),
    }

    assert!(!dir.path().parent().unwrap().join("escape.txt").exists());

    let _ = shutdown.send(true);
}
