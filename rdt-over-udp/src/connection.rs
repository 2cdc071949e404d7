//! Per-connection lifecycle manager.
//!
//! A [`Connection`] owns the complete state for one peer pair.  Its
//! responsibilities are:
//! - Owning the unreliable channel ([`crate::simulator::Simulator`]).
//! - Driving [`crate::sender`] and [`crate::receiver`] with inbound packets.
//! - Running the retransmission loop with [`crate::timer`] deadlines.
//! - Teardown: a TIME-WAIT style quiescence window in [`Connection::close`].
//!
//! Every operation takes `&mut self`: one caller owns the endpoint and
//! sends and receives strictly in sequence, so no locking is needed.
//!
//! ```ignore
//! rdt_over_udp::init(0.1, 0.1)?;
//! let mut conn = Connection::open()?;
//! conn.bind(10100)?;
//! conn.set_peer("127.0.0.1".parse()?, 10200);
//! conn.send(b"hello").await?;
//! let reply = conn.recv(MAX_PAYLOAD).await?;
//! conn.close().await?;
//! ```

use std::net::{IpAddr, SocketAddr};

use thiserror::Error;

use crate::packet::{Packet, PacketError, HEADER_LEN, MAX_PAYLOAD};
use crate::receiver::{RecvAction, Receiver};
use crate::sender::{SendEvent, Sender};
use crate::simulator::{network_config, FaultConfig, FaultHandle, Simulator};
use crate::socket::{Socket, SocketError};
use crate::state::{SenderState, SeqBit};
use crate::timer::{within, TimerConfig};

/// Errors surfaced to the application.
///
/// Corrupted, lost or out-of-sequence packets never appear here; they are
/// recovered by retransmission and re-acknowledgement.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error("cannot encode packet: {0}")]
    Packet(#[from] PacketError),
}

/// Traffic counters for one connection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// DATA packets handed to the channel for the first time.
    pub data_sent: u64,
    /// DATA packets resent after a timeout.
    pub retransmissions: u64,
    /// ACK packets handed to the channel, re-ACKs included.
    pub acks_sent: u64,
    /// Inbound datagrams that delivered nothing (corrupt, stale, duplicate).
    pub discarded: u64,
    /// Messages returned by `recv`.
    pub delivered: u64,
}

/// A handle to a single reliable connection over UDP.
#[derive(Debug)]
pub struct Connection {
    channel: Simulator,
    sender: Sender,
    receiver: Receiver,
    timer: TimerConfig,
    stats: Stats,
}

impl Connection {
    // -----------------------------------------------------------------------
    // Setup
    // -----------------------------------------------------------------------

    /// Create an unbound connection using the rates set by [`crate::init`].
    pub fn open() -> Result<Self, ConnError> {
        Self::open_with(network_config(), TimerConfig::default())
    }

    /// Create an unbound connection with explicit fault rates and timing.
    pub fn open_with(faults: FaultConfig, timer: TimerConfig) -> Result<Self, ConnError> {
        Self::open_with_faults(FaultHandle::new(faults), timer)
    }

    /// Create an unbound connection driven by an existing fault model.
    pub fn open_with_faults(faults: FaultHandle, timer: TimerConfig) -> Result<Self, ConnError> {
        let socket = Socket::open()?;
        Ok(Self {
            channel: Simulator::new(socket, faults),
            sender: Sender::new(),
            receiver: Receiver::new(),
            timer,
            stats: Stats::default(),
        })
    }

    /// Bind to `port` on every local interface.
    pub fn bind(&mut self, port: u16) -> Result<SocketAddr, ConnError> {
        let local = self.channel.socket_mut().bind(port)?;
        log::debug!("[rdt] bound to {local}");
        Ok(local)
    }

    /// Bind to an explicit local address (port 0 picks an ephemeral one).
    pub fn bind_addr(&mut self, addr: SocketAddr) -> Result<SocketAddr, ConnError> {
        let local = self.channel.socket_mut().bind_addr(addr)?;
        log::debug!("[rdt] bound to {local}");
        Ok(local)
    }

    /// Pair with the remote peer.  Required before `send`.
    pub fn set_peer(&mut self, ip: IpAddr, port: u16) {
        self.set_peer_addr(SocketAddr::new(ip, port));
    }

    pub fn set_peer_addr(&mut self, peer: SocketAddr) {
        log::debug!("[rdt] peer set to {peer}");
        self.channel.set_peer(peer);
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn local_addr(&self) -> Result<SocketAddr, ConnError> {
        Ok(self.channel.socket().local_addr()?)
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.channel.peer()
    }

    /// Sequence bit the next `send` will use.
    pub fn send_seq(&self) -> SeqBit {
        self.sender.next_seq()
    }

    /// Sequence bit the next delivered message must carry.
    pub fn recv_seq(&self) -> SeqBit {
        self.receiver.expected()
    }

    pub fn sender_state(&self) -> SenderState {
        self.sender.state()
    }

    /// Messages acknowledged ahead of `recv` and not yet returned.
    pub fn early_data_len(&self) -> usize {
        self.receiver.early_len()
    }

    /// Shared handle onto this connection's fault model.
    pub fn faults(&self) -> FaultHandle {
        self.channel.faults().clone()
    }

    pub fn timer(&self) -> TimerConfig {
        self.timer
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    // -----------------------------------------------------------------------
    // Data transfer
    // -----------------------------------------------------------------------

    /// Reliably deliver one message to the peer.
    ///
    /// Messages longer than [`MAX_PAYLOAD`] are truncated.  Returns the number
    /// of payload bytes delivered.  Retransmits without limit: under total
    /// loss this never returns.
    pub async fn send(&mut self, message: &[u8]) -> Result<usize, ConnError> {
        let result = self.send_and_wait(message).await;
        if result.is_err() {
            self.sender.abandon();
        }
        result
    }

    async fn send_and_wait(&mut self, message: &[u8]) -> Result<usize, ConnError> {
        if self.channel.peer().is_none() {
            return Err(SocketError::PeerNotSet.into());
        }

        let pkt = self.sender.build_data_packet(message);
        let seq = pkt.header.seq;
        if pkt.payload.len() < message.len() {
            log::debug!("[rdt] truncating {}-byte message to {MAX_PAYLOAD}", message.len());
        }

        let wire = self.sender.record_sent(&pkt)?;
        self.channel.send(wire).await?;
        self.stats.data_sent += 1;
        log::debug!("[rdt] → DATA seq={seq} len={}", pkt.payload.len());

        loop {
            let inbound = within(
                self.timer.timeout,
                self.channel.recv(MAX_PAYLOAD + HEADER_LEN),
            )
            .await;

            let bytes = match inbound {
                Some(result) => result?,
                None => {
                    if let Some(wire) = self.sender.on_retransmit() {
                        self.channel.send(wire).await?;
                    }
                    self.stats.retransmissions += 1;
                    log::debug!(
                        "[rdt] timeout; → DATA seq={seq} (tx #{})",
                        self.sender.retransmit_count()
                    );
                    continue;
                }
            };

            match self.sender.on_packet(Packet::decode(&bytes)) {
                SendEvent::Acked(sent) => {
                    log::debug!("[rdt] ← ACK seq={seq}");
                    return Ok(sent);
                }
                SendEvent::ImplicitAck { sent, data } => {
                    let theirs = data.header.seq;
                    log::debug!(
                        "[rdt] ← DATA seq={theirs} while awaiting ACK {seq}; assuming ACK {seq} received"
                    );
                    // Buffer before acknowledging: the bit has already flipped,
                    // so the peer's DATA must survive a failed ACK.
                    self.receiver.buffer_early(data);
                    if let Err(e) = self.send_ack(theirs).await {
                        log::warn!("[rdt] ACK seq={theirs} not sent: {e}; peer will retransmit");
                    }
                    return Ok(sent);
                }
                SendEvent::Discarded(reason) => {
                    self.stats.discarded += 1;
                    log::debug!("[rdt] ← {reason:?} while awaiting ACK {seq}; keep waiting");
                }
            }
        }
    }

    /// Block until the next in-sequence message arrives and return it.
    ///
    /// Reads at most `max_len` payload bytes per datagram; pass at least
    /// [`MAX_PAYLOAD`] to receive any message the peer may send.  There is no
    /// time limit.
    ///
    /// Fails with `PeerNotSet` before touching any state when unpaired, since
    /// an accepted message could not be acknowledged.
    pub async fn recv(&mut self, max_len: usize) -> Result<Vec<u8>, ConnError> {
        if self.channel.peer().is_none() {
            return Err(SocketError::PeerNotSet.into());
        }
        let read_len = max_len.min(MAX_PAYLOAD) + HEADER_LEN;

        if let Some(payload) = self.receiver.take_early() {
            self.stats.delivered += 1;
            log::debug!("[rdt] delivering buffered DATA len={}", payload.len());
            return Ok(payload);
        }

        loop {
            let bytes = self.channel.recv(read_len).await?;

            match self.receiver.on_packet(Packet::decode(&bytes)) {
                RecvAction::Deliver { ack, payload } => {
                    log::debug!("[rdt] ← DATA seq={ack} len={}", payload.len());
                    // The message is accepted either way; a lost ACK is
                    // recovered when the peer retransmits.
                    if let Err(e) = self.send_ack(ack).await {
                        log::warn!("[rdt] ACK seq={ack} not sent: {e}; peer will retransmit");
                    }
                    self.stats.delivered += 1;
                    return Ok(payload);
                }
                RecvAction::Reack(bit) => {
                    self.stats.discarded += 1;
                    log::debug!(
                        "[rdt] ← corrupt or duplicate; still expecting seq={}",
                        self.receiver.expected()
                    );
                    self.send_ack(bit).await?;
                }
                RecvAction::Ignore => {
                    self.stats.discarded += 1;
                    log::debug!("[rdt] ← stray ACK ignored");
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Wait out the quiescence window, then release the socket.
    ///
    /// Any inbound datagram restarts the window; a retransmission of the last
    /// acknowledged message is acknowledged again so the peer can finish.
    pub async fn close(mut self) -> Result<(), ConnError> {
        if !self.channel.socket().is_bound() {
            return Ok(());
        }

        log::debug!("[rdt] TIME_WAIT for {:?}", self.timer.twait);
        loop {
            let inbound = within(
                self.timer.twait,
                self.channel.recv(MAX_PAYLOAD + HEADER_LEN),
            )
            .await;
            let Some(result) = inbound else { break };

            let bytes = result?;
            match self.receiver.straggler_ack(&Packet::decode(&bytes)) {
                Some(bit) => {
                    log::debug!("[rdt] ← straggler DATA seq={bit}; re-ACK");
                    self.send_ack(bit).await?;
                }
                None => log::debug!("[rdt] ← ignored during TIME_WAIT"),
            }
        }

        log::debug!("[rdt] closed after {:?}", self.stats);
        Ok(())
    }

    async fn send_ack(&mut self, seq: SeqBit) -> Result<(), ConnError> {
        let wire = Packet::ack(seq).encode()?;
        self.channel.send(&wire).await?;
        self.stats.acks_sent += 1;
        log::debug!("[rdt] → ACK seq={seq}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fast() -> TimerConfig {
        TimerConfig::new(Duration::from_millis(20))
    }

    fn loopback_conn() -> Connection {
        let mut conn = Connection::open_with(FaultConfig::RELIABLE, fast()).unwrap();
        conn.bind_addr("127.0.0.1:0".parse().unwrap()).unwrap();
        conn
    }

    #[tokio::test]
    async fn fresh_connection_starts_on_zero() {
        let conn = loopback_conn();
        assert_eq!(conn.send_seq(), SeqBit::Zero);
        assert_eq!(conn.recv_seq(), SeqBit::Zero);
        assert_eq!(conn.sender_state(), SenderState::Idle);
        assert_eq!(conn.stats(), Stats::default());
        assert!(conn.peer().is_none());
    }

    #[tokio::test]
    async fn send_before_pairing_fails_without_side_effects() {
        let mut conn = loopback_conn();
        let err = conn.send(b"nobody").await.unwrap_err();
        assert!(matches!(err, ConnError::Socket(SocketError::PeerNotSet)));
        assert_eq!(conn.send_seq(), SeqBit::Zero);
        assert_eq!(conn.sender_state(), SenderState::Idle);
        assert_eq!(conn.stats().data_sent, 0);
    }

    #[tokio::test]
    async fn recv_before_pairing_fails_without_side_effects() {
        let mut conn = loopback_conn();
        let err = within(Duration::from_millis(200), conn.recv(MAX_PAYLOAD))
            .await
            .expect("recv blocked on an unpaired connection")
            .unwrap_err();
        assert!(matches!(err, ConnError::Socket(SocketError::PeerNotSet)));
        assert_eq!(conn.recv_seq(), SeqBit::Zero);
        assert_eq!(conn.stats(), Stats::default());
    }

    #[tokio::test]
    async fn unbound_connection_reports_not_bound() {
        let mut conn = Connection::open_with(FaultConfig::RELIABLE, fast()).unwrap();
        conn.set_peer("127.0.0.1".parse().unwrap(), 9);
        let err = conn.send(b"x").await.unwrap_err();
        assert!(matches!(err, ConnError::Socket(SocketError::NotBound)));
        assert_eq!(conn.sender_state(), SenderState::Idle);
        assert!(matches!(
            conn.recv(MAX_PAYLOAD).await,
            Err(ConnError::Socket(SocketError::NotBound))
        ));
    }

    #[tokio::test]
    async fn closing_unbound_connection_is_immediate() {
        let conn = Connection::open_with(FaultConfig::RELIABLE, TimerConfig::default()).unwrap();
        within(Duration::from_millis(50), conn.close())
            .await
            .expect("close waited on an unbound socket")
            .unwrap();
    }

    #[tokio::test]
    async fn close_waits_for_quiet_window() {
        let conn = loopback_conn();
        let started = std::time::Instant::now();
        conn.close().await.unwrap();
        assert!(started.elapsed() >= fast().twait);
    }

    #[tokio::test]
    async fn faults_handle_reaches_the_channel() {
        let conn = loopback_conn();
        conn.faults().set_drop_rate(1.0).unwrap();
        assert_eq!(conn.faults().config().drop_rate(), 1.0);
    }
}
