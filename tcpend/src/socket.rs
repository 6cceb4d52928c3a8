//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that moves
//! encoded segments as raw datagrams.  Decoding happens in the endpoints,
//! which need to see checksum failures rather than have them filtered here.
//!
//! A socket can optionally carry a [`Simulator`]; every outbound datagram is
//! then passed through its fault model before it reaches the wire.

use std::net::SocketAddr;

use parking_lot::Mutex;
use tokio::net::UdpSocket;

use crate::error::Result;
use crate::simulator::{Simulator, SimulatorConfig};

/// Maximum UDP payload size (theoretical limit; in practice kept much smaller).
const MAX_DATAGRAM: usize = 65_535;

/// An async, datagram-oriented UDP socket.
///
/// All methods are `&self` so the socket can be shared across tasks.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
    faults: Option<Mutex<Simulator>>,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self {
            local_addr,
            inner,
            faults: None,
        })
    }

    /// Route every outbound datagram through a fault simulator.
    pub fn with_faults(mut self, config: SimulatorConfig) -> Self {
        self.faults = Some(Mutex::new(Simulator::new(config)));
        self
    }

    /// Send `bytes` as a single UDP datagram to `dest`.
    ///
    /// With a simulator attached this may send nothing, a corrupted copy,
    /// two copies, or a previously held datagram as well.
    pub async fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> Result<()> {
        let Some(faults) = &self.faults else {
            self.inner.send_to(bytes, dest).await?;
            return Ok(());
        };
        let outgoing = faults.lock().process(bytes);
        for datagram in outgoing {
            self.inner.send_to(&datagram, dest).await?;
        }
        Ok(())
    }

    /// Receive the next datagram.
    ///
    /// Returns `(bytes, sender_address)`.
    pub async fn recv_from(&self) -> Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok((buf, addr))
    }
}
