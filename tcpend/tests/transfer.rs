//! End-to-end transfers between a real sender and a real receiver.
//!
//! Each test binds two sockets on loopback, runs the receiver in a
//! background task and the sender in another, and checks that the bytes the
//! receiver wrote are exactly the bytes the sender read.  Lossy runs attach
//! a seeded [`Simulator`](tcpend::simulator::Simulator) to one or both
//! sockets.

use std::io::Cursor;
use std::net::SocketAddr;
use std::time::Duration;

use tcpend::{
    config::{EndpointConfig, Tuning},
    receiver::Receiver,
    sender::Sender,
    simulator::SimulatorConfig,
    socket::Socket,
    stats::TransferStats,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn ephemeral() -> Socket {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    Socket::bind(addr).await.expect("bind failed")
}

fn config(mtu: usize, window: usize) -> EndpointConfig {
    EndpointConfig::new(mtu, window)
        .unwrap()
        .with_trace(false)
        .with_tuning(Tuning {
            initial_timeout: Duration::from_millis(200),
            fin_resend_interval: Duration::from_millis(50),
            ..Tuning::default()
        })
}

struct Outcome {
    sender: TransferStats,
    receiver: TransferStats,
    written: Vec<u8>,
}

async fn transfer(
    data: Vec<u8>,
    mtu: usize,
    window: usize,
    sender_faults: Option<SimulatorConfig>,
    receiver_faults: Option<SimulatorConfig>,
) -> Outcome {
    let mut rx_sock = ephemeral().await;
    if let Some(faults) = receiver_faults {
        rx_sock = rx_sock.with_faults(faults);
    }
    let rx_addr = rx_sock.local_addr;
    let mut tx_sock = ephemeral().await;
    if let Some(faults) = sender_faults {
        tx_sock = tx_sock.with_faults(faults);
    }

    let rx_config = config(mtu, window);
    let receiver = tokio::spawn(async move {
        let mut receiver = Receiver::new(rx_sock, Vec::new(), rx_config);
        let stats = receiver.run().await?;
        Ok::<_, tcpend::Error>((stats, receiver.into_sink()))
    });

    let len = data.len() as u64;
    let tx_config = config(mtu, window);
    let sender = tokio::spawn(async move {
        let mut sender = Sender::new(tx_sock, rx_addr, Cursor::new(data), len, tx_config)?;
        sender.run().await
    });

    let sender = tokio::time::timeout(Duration::from_secs(30), sender)
        .await
        .expect("sender timed out")
        .expect("sender task panicked")
        .expect("sender failed");
    let (receiver, written) = tokio::time::timeout(Duration::from_secs(30), receiver)
        .await
        .expect("receiver timed out")
        .expect("receiver task panicked")
        .expect("receiver failed");

    Outcome {
        sender,
        receiver,
        written,
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Twelve bytes, four per segment, three segments in flight.
#[tokio::test]
async fn small_file_arrives_intact() {
    let out = transfer(b"ABCDEFGHIJKL".to_vec(), 4, 3, None, None).await;

    assert_eq!(out.written, b"ABCDEFGHIJKL");
    assert_eq!(out.sender.bytes, 12);
    assert_eq!(out.receiver.bytes, 12);
    assert_eq!(out.receiver.checksum_failures, 0);
}

#[tokio::test]
async fn empty_file_completes_handshake_and_teardown() {
    let out = transfer(Vec::new(), 4, 3, None, None).await;

    assert!(out.written.is_empty());
    assert_eq!(out.sender.bytes, 0);
    assert_eq!(out.receiver.bytes, 0);
}

#[tokio::test]
async fn window_of_one_degenerates_to_stop_and_wait() {
    let data = pattern(1000);
    let out = transfer(data.clone(), 100, 1, None, None).await;
    assert_eq!(out.written, data);
}

/// The segment at sequence 5 is lost on its first transmission; the
/// transfer still completes with identical output.
#[tokio::test]
async fn recovers_from_single_lost_segment() {
    let faults = SimulatorConfig {
        drop_once: vec![5],
        ..SimulatorConfig::default()
    };
    let out = transfer(b"ABCDEFGHIJKL".to_vec(), 4, 3, Some(faults), None).await;

    assert_eq!(out.written, b"ABCDEFGHIJKL");
    assert!(out.sender.retransmissions >= 1);
}

#[tokio::test]
async fn survives_lossy_reordering_network() {
    let data = pattern(20 * 1024);
    let sender_faults = SimulatorConfig {
        loss_rate: 0.1,
        duplicate_rate: 0.05,
        corrupt_rate: 0.05,
        reorder_rate: 0.1,
        seed: 1,
        ..SimulatorConfig::default()
    };
    let receiver_faults = SimulatorConfig {
        loss_rate: 0.1,
        corrupt_rate: 0.05,
        seed: 2,
        ..SimulatorConfig::default()
    };
    let out = transfer(data.clone(), 256, 8, Some(sender_faults), Some(receiver_faults)).await;

    assert_eq!(out.written.len(), data.len());
    assert_eq!(out.written, data);
    assert!(out.sender.retransmissions > 0);
}

#[tokio::test]
async fn large_window_large_payload() {
    let data = pattern(256 * 1024);
    let out = transfer(data.clone(), 1400, 32, None, None).await;
    assert_eq!(out.written, data);
    assert_eq!(out.receiver.bytes, data.len() as u64);
}
