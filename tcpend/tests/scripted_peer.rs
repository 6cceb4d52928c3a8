//! Integration tests that drive one real endpoint against a scripted peer.
//!
//! The peer is a bare [`Socket`] that encodes and decodes segments by hand,
//! so each test controls exactly which segments the endpoint under test
//! sees and can assert on every segment it emits.

use std::io::Cursor;
use std::net::SocketAddr;
use std::time::Duration;

use tcpend::{
    config::{EndpointConfig, Tuning},
    packet::{flags, Segment},
    receiver::Receiver,
    sender::Sender,
    socket::Socket,
    stats::TransferStats,
    timer::TeardownLinger,
    Error,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn ephemeral() -> Socket {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    Socket::bind(addr).await.expect("bind failed")
}

fn config(window: usize, tuning: Tuning) -> EndpointConfig {
    EndpointConfig::new(4, window)
        .unwrap()
        .with_trace(false)
        .with_tuning(tuning)
}

fn quick_linger() -> Tuning {
    Tuning {
        linger: TeardownLinger { multiplier: 2 },
        ..Tuning::default()
    }
}

/// Next checksum-valid segment, with the address it came from.
async fn next_segment(peer: &Socket) -> (Segment, SocketAddr) {
    loop {
        let (bytes, from) = tokio::time::timeout(Duration::from_secs(5), peer.recv_from())
            .await
            .expect("no segment within 5s")
            .expect("recv failed");
        let decoded = Segment::decode(&bytes).expect("malformed segment");
        if decoded.checksum_valid {
            return (decoded.segment, from);
        }
    }
}

/// Skip segments until one satisfies `pred`.
async fn wait_for(peer: &Socket, pred: impl Fn(&Segment) -> bool) -> (Segment, SocketAddr) {
    loop {
        let (seg, from) = next_segment(peer).await;
        if pred(&seg) {
            return (seg, from);
        }
    }
}

fn is_data(s: &Segment) -> bool {
    !s.payload.is_empty()
}

fn is_pure_ack(s: &Segment) -> bool {
    s.payload.is_empty() && s.header.is_ack() && !s.header.is_syn() && !s.header.is_fin()
}

/// Fail if a data segment arrives within `window`; control segments are
/// skipped.
async fn assert_no_data_within(peer: &Socket, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(received) = tokio::time::timeout_at(deadline, peer.recv_from()).await {
        let (bytes, _) = received.expect("recv failed");
        let seg = Segment::decode(&bytes).expect("malformed segment").segment;
        assert!(
            seg.payload.is_empty(),
            "unexpected data segment seq={}",
            seg.header.seq
        );
    }
}

async fn send(peer: &Socket, to: SocketAddr, seq: u32, ack: u32, flags: u8, payload: &[u8], ts: u64) {
    let seg = Segment::new(seq, ack, flags, payload.to_vec(), ts);
    peer.send_to(&seg.encode(), to).await.expect("send failed");
}

fn spawn_sender(
    peer: SocketAddr,
    data: &[u8],
    window: usize,
    tuning: Tuning,
) -> tokio::task::JoinHandle<tcpend::Result<TransferStats>> {
    let data = data.to_vec();
    tokio::spawn(async move {
        let socket = ephemeral().await;
        let len = data.len() as u64;
        let mut sender = Sender::new(socket, peer, Cursor::new(data), len, config(window, tuning))?;
        sender.run().await
    })
}

/// Answer the sender's FIN at `fin_seq` and check its final ACK.
async fn finish_sender(peer: &Socket, fin_seq: u32) {
    let (fin, to) = wait_for(peer, |s| s.header.is_fin()).await;
    assert_eq!(fin.header.seq, fin_seq);
    send(peer, to, 1, fin_seq + 1, flags::FIN | flags::ACK, &[], fin.header.timestamp).await;
    let (last, _) = wait_for(peer, is_pure_ack).await;
    assert_eq!((last.header.seq, last.header.ack), (fin_seq + 1, 2));
}

async fn join_sender(
    sender: tokio::task::JoinHandle<tcpend::Result<TransferStats>>,
) -> tcpend::Result<TransferStats> {
    tokio::time::timeout(Duration::from_secs(10), sender)
        .await
        .expect("sender did not finish")
        .expect("sender task panicked")
}

// ---------------------------------------------------------------------------
// Sender under test
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sender_sequence_numbers_follow_byte_offsets() {
    let peer = ephemeral().await;
    let sender = spawn_sender(peer.local_addr, b"ABCDEFGHIJKL", 3, quick_linger());

    let (syn, to) = wait_for(&peer, |s| s.header.is_syn()).await;
    assert_eq!((syn.header.seq, syn.header.payload_len), (0, 0));
    send(&peer, to, 0, 1, flags::SYN | flags::ACK, &[], syn.header.timestamp).await;

    let mut seen: Vec<(u32, Vec<u8>)> = Vec::new();
    while seen.len() < 3 {
        let (seg, _) = wait_for(&peer, is_data).await;
        assert_eq!(seg.header.ack, 1);
        if !seen.iter().any(|(seq, _)| *seq == seg.header.seq) {
            seen.push((seg.header.seq, seg.payload));
        }
    }
    seen.sort();
    assert_eq!(
        seen,
        vec![
            (1, b"ABCD".to_vec()),
            (5, b"EFGH".to_vec()),
            (9, b"IJKL".to_vec()),
        ]
    );

    for ack in [5, 9, 13] {
        send(&peer, to, 1, ack, flags::ACK, &[], 0).await;
    }
    finish_sender(&peer, 13).await;

    let stats = join_sender(sender).await.expect("sender failed");
    assert_eq!(stats.bytes, 12);
    assert_eq!(stats.duplicate_acks, 0);
}

#[tokio::test]
async fn sender_fast_retransmits_on_third_duplicate_ack() {
    let peer = ephemeral().await;
    let tuning = Tuning {
        initial_timeout: Duration::from_secs(10),
        ..quick_linger()
    };
    // Room for the SYN plus three data segments.
    let sender = spawn_sender(peer.local_addr, b"ABCDEFGHIJKL", 4, tuning);

    // SYN without ACK: the connection opens but no RTT sample is taken, so
    // every data timer is armed with the 10 s initial timeout.
    let (_, to) = wait_for(&peer, |s| s.header.is_syn()).await;
    send(&peer, to, 0, 1, flags::SYN, &[], 0).await;

    let mut seqs = Vec::new();
    while seqs.len() < 3 {
        seqs.push(wait_for(&peer, is_data).await.0.header.seq);
    }
    seqs.sort();
    assert_eq!(seqs, vec![1, 5, 9]);

    // One advancing ACK, then two duplicates: not enough.
    for _ in 0..3 {
        send(&peer, to, 1, 5, flags::ACK, &[], 0).await;
    }
    assert_no_data_within(&peer, Duration::from_millis(200)).await;

    send(&peer, to, 1, 5, flags::ACK, &[], 0).await;
    let (retx, _) = wait_for(&peer, is_data).await;
    assert_eq!(retx.header.seq, 5);
    assert_eq!(retx.payload, b"EFGH");

    send(&peer, to, 1, 13, flags::ACK, &[], 0).await;
    finish_sender(&peer, 13).await;

    let stats = join_sender(sender).await.expect("sender failed");
    assert_eq!(stats.duplicate_acks, 3);
    assert!(stats.retransmissions >= 1);
}

#[tokio::test]
async fn empty_source_sends_fin_right_after_handshake() {
    let peer = ephemeral().await;
    let sender = spawn_sender(peer.local_addr, b"", 3, quick_linger());

    let (syn, to) = wait_for(&peer, |s| s.header.is_syn()).await;
    send(&peer, to, 0, 1, flags::SYN | flags::ACK, &[], syn.header.timestamp).await;
    finish_sender(&peer, 1).await;

    let stats = join_sender(sender).await.expect("sender failed");
    assert_eq!(stats.bytes, 0);
}

#[tokio::test]
async fn silent_peer_exhausts_retransmissions() {
    let peer = ephemeral().await;
    let tuning = Tuning {
        initial_timeout: Duration::from_millis(10),
        min_timeout: Duration::from_millis(1),
        ..Tuning::default()
    };
    let sender = spawn_sender(peer.local_addr, b"ABCD", 3, tuning);

    match join_sender(sender).await {
        Err(Error::RetransmitLimit { seq, attempts }) => {
            assert_eq!(seq, 0);
            assert_eq!(attempts, 17);
        }
        other => panic!("expected retransmit limit, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Receiver under test
// ---------------------------------------------------------------------------

#[tokio::test]
async fn receiver_acks_gaps_and_completes_teardown() {
    let rx_sock = ephemeral().await;
    let rx_addr = rx_sock.local_addr;
    let receiver = tokio::spawn(async move {
        let mut receiver = Receiver::new(rx_sock, Vec::new(), config(3, Tuning::default()));
        let stats = receiver.run().await?;
        Ok::<_, Error>((stats, receiver.into_sink()))
    });

    let peer = ephemeral().await;
    send(&peer, rx_addr, 0, 0, flags::SYN, &[], 11).await;
    let (syn_ack, _) = next_segment(&peer).await;
    assert!(syn_ack.header.is_syn() && syn_ack.header.is_ack());
    assert_eq!(
        (syn_ack.header.seq, syn_ack.header.ack, syn_ack.header.timestamp),
        (0, 1, 11)
    );

    // A corrupt segment gets no reply at all.
    let mut bad = Segment::new(1, 1, flags::ACK, b"ABCD".to_vec(), 0).encode();
    bad[25] ^= 0x40;
    peer.send_to(&bad, rx_addr).await.unwrap();
    let quiet = tokio::time::timeout(Duration::from_millis(200), peer.recv_from()).await;
    assert!(quiet.is_err(), "receiver answered a corrupt segment");

    for (seq, payload, expected_ack) in [(1, b"ABCD", 5), (9, b"IJKL", 5), (5, b"EFGH", 13)] {
        send(&peer, rx_addr, seq, 1, flags::ACK, payload, u64::from(seq) * 100).await;
        let (ack, _) = next_segment(&peer).await;
        assert!(is_pure_ack(&ack));
        assert_eq!(ack.header.ack, expected_ack);
        assert_eq!(ack.header.timestamp, u64::from(seq) * 100);
    }

    send(&peer, rx_addr, 13, 1, flags::FIN, &[], 0).await;
    let (fin_ack, _) = next_segment(&peer).await;
    assert!(fin_ack.header.is_fin() && fin_ack.header.is_ack());
    assert_eq!((fin_ack.header.seq, fin_ack.header.ack), (1, 14));

    // Ignore the first FIN+ACK: it is re-sent until acknowledged.
    let (again, _) = next_segment(&peer).await;
    assert!(again.header.is_fin());
    send(&peer, rx_addr, 14, 2, flags::ACK, &[], 0).await;

    let (stats, written) = tokio::time::timeout(Duration::from_secs(5), receiver)
        .await
        .expect("receiver did not finish")
        .unwrap()
        .expect("receiver failed");
    assert_eq!(written, b"ABCDEFGHIJKL");
    assert_eq!(stats.bytes, 12);
    assert_eq!(stats.out_of_sequence, 1);
    assert_eq!(stats.checksum_failures, 1);
}
