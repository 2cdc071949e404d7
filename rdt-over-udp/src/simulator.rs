//! Fault-injecting unreliable channel.
//!
//! To exercise the reliability mechanisms without depending on actual network
//! conditions, every outbound datagram passes through a [`Simulator`] that
//! applies a configurable fault model:
//!
//! | Fault       | Description                                               |
//! |-------------|-----------------------------------------------------------|
//! | Loss        | Dropped with probability `drop_rate`; the send still      |
//! |             | reports success.                                          |
//! | Corruption  | One random byte altered with probability `corrupt_rate`.  |
//!
//! Inbound datagrams are passed through untouched.
//!
//! The process-wide default rates are set once with [`init`]; each connection
//! snapshots them when it is opened and can be steered afterwards through its
//! [`FaultHandle`].

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::socket::{Socket, SocketError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Errors in the fault-model configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be within 0.0..=1.0, got {value}")]
    InvalidProbability { name: &'static str, value: f64 },
}

/// Probabilities of the fault model, both in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultConfig {
    drop_rate: f64,
    corrupt_rate: f64,
}

impl FaultConfig {
    /// A channel that never drops nor corrupts.
    pub const RELIABLE: FaultConfig = FaultConfig {
        drop_rate: 0.0,
        corrupt_rate: 0.0,
    };

    pub fn new(drop_rate: f64, corrupt_rate: f64) -> Result<Self, ConfigError> {
        Ok(Self {
            drop_rate: check_probability("drop rate", drop_rate)?,
            corrupt_rate: check_probability("corruption rate", corrupt_rate)?,
        })
    }

    pub fn drop_rate(&self) -> f64 {
        self.drop_rate
    }

    pub fn corrupt_rate(&self) -> f64 {
        self.corrupt_rate
    }
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self::RELIABLE
    }
}

fn check_probability(name: &'static str, value: f64) -> Result<f64, ConfigError> {
    // NaN fails the range check as well.
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::InvalidProbability { name, value })
    }
}

static NETWORK: RwLock<FaultConfig> = RwLock::new(FaultConfig::RELIABLE);

/// Set the process-wide drop and corruption probabilities.
///
/// Call before opening connections; already-open connections keep the rates
/// they were opened with.
pub fn init(drop_rate: f64, corrupt_rate: f64) -> Result<(), ConfigError> {
    let config = FaultConfig::new(drop_rate, corrupt_rate)?;
    *NETWORK.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = config;
    log::info!("Drop rate: {drop_rate}\tError rate: {corrupt_rate}");
    Ok(())
}

/// The rates most recently set by [`init`] ([`FaultConfig::RELIABLE`] if never called).
pub fn network_config() -> FaultConfig {
    *NETWORK.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Fault model
// ---------------------------------------------------------------------------

/// A fault forced onto an upcoming outbound datagram, bypassing the dice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Drop,
    Corrupt,
}

/// What the fault model decided for one outbound datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Deliver,
    Drop,
    /// Deliver after altering the byte at this index.
    Corrupt(usize),
}

#[derive(Debug)]
struct FaultState {
    config: FaultConfig,
    forced: VecDeque<Fault>,
    rng: StdRng,
}

impl FaultState {
    fn judge(&mut self, len: usize) -> Verdict {
        let fault = match self.forced.pop_front() {
            Some(forced) => Some(forced),
            None if self.rng.gen::<f64>() < self.config.drop_rate => Some(Fault::Drop),
            None if self.rng.gen::<f64>() < self.config.corrupt_rate => Some(Fault::Corrupt),
            None => None,
        };
        match fault {
            Some(Fault::Drop) => Verdict::Drop,
            Some(Fault::Corrupt) if len > 0 => Verdict::Corrupt(self.rng.gen_range(0..len)),
            _ => Verdict::Deliver,
        }
    }
}

/// Shared handle onto one channel's fault model.
///
/// Cloning is cheap; a test harness keeps a clone to change the rates or
/// force faults while the owning connection is blocked in `send`/`recv`.
#[derive(Debug, Clone)]
pub struct FaultHandle {
    state: Arc<Mutex<FaultState>>,
}

impl FaultHandle {
    pub fn new(config: FaultConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// A fault model whose random draws are reproducible.
    pub fn seeded(config: FaultConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: FaultConfig, rng: StdRng) -> Self {
        Self {
            state: Arc::new(Mutex::new(FaultState {
                config,
                forced: VecDeque::new(),
                rng,
            })),
        }
    }

    pub fn config(&self) -> FaultConfig {
        self.lock().config
    }

    pub fn set_config(&self, config: FaultConfig) {
        self.lock().config = config;
    }

    pub fn set_drop_rate(&self, rate: f64) -> Result<(), ConfigError> {
        let mut state = self.lock();
        state.config = FaultConfig::new(rate, state.config.corrupt_rate)?;
        Ok(())
    }

    pub fn set_corrupt_rate(&self, rate: f64) -> Result<(), ConfigError> {
        let mut state = self.lock();
        state.config = FaultConfig::new(state.config.drop_rate, rate)?;
        Ok(())
    }

    /// Restart the random sequence from `seed`.
    pub fn reseed(&self, seed: u64) {
        self.lock().rng = StdRng::seed_from_u64(seed);
    }

    /// Drop the next `n` outbound datagrams regardless of the rates.
    pub fn drop_next(&self, n: usize) {
        self.force(Fault::Drop, n);
    }

    /// Corrupt the next `n` outbound datagrams regardless of the rates.
    pub fn corrupt_next(&self, n: usize) {
        self.force(Fault::Corrupt, n);
    }

    /// Number of forced faults not yet consumed.
    pub fn pending_forced(&self) -> usize {
        self.lock().forced.len()
    }

    fn force(&self, fault: Fault, n: usize) {
        self.lock().forced.extend(std::iter::repeat(fault).take(n));
    }

    /// Decide the fate of an outbound datagram of `len` bytes.
    pub fn judge(&self, len: usize) -> Verdict {
        self.lock().judge(len)
    }

    fn lock(&self) -> MutexGuard<'_, FaultState> {
        // The state is plain data; a panic elsewhere cannot leave it torn.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Alter the byte at `pos` so that it is guaranteed to differ.
pub fn corrupt_byte(buf: &mut [u8], pos: usize) {
    let b = &mut buf[pos];
    if *b > 1 {
        *b -= 2;
    } else {
        *b = 254;
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// The unreliable channel: a [`Socket`], the peer it talks to, and the fault
/// model applied to everything it sends.
#[derive(Debug)]
pub struct Simulator {
    socket: Socket,
    peer: Option<SocketAddr>,
    faults: FaultHandle,
}

impl Simulator {
    pub fn new(socket: Socket, faults: FaultHandle) -> Self {
        Self {
            socket,
            peer: None,
            faults,
        }
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    pub fn socket_mut(&mut self) -> &mut Socket {
        &mut self.socket
    }

    pub fn faults(&self) -> &FaultHandle {
        &self.faults
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn set_peer(&mut self, peer: SocketAddr) {
        self.peer = Some(peer);
    }

    /// Send a datagram to the peer through the fault model.
    ///
    /// A dropped datagram still reports `bytes.len()`: a lost send looks
    /// exactly like one lost in flight.
    pub async fn send(&self, bytes: &[u8]) -> Result<usize, SocketError> {
        let peer = self.peer.ok_or(SocketError::PeerNotSet)?;

        match self.faults.judge(bytes.len()) {
            Verdict::Deliver => self.socket.send_to(bytes, peer).await,
            Verdict::Drop => {
                log::warn!("[sim] packet lost in unreliable layer ({} bytes)", bytes.len());
                Ok(bytes.len())
            }
            Verdict::Corrupt(pos) => {
                let mut damaged = bytes.to_vec();
                corrupt_byte(&mut damaged, pos);
                log::warn!("[sim] packet corrupted in unreliable layer (byte {pos})");
                self.socket.send_to(&damaged, peer).await
            }
        }
    }

    /// Receive the next datagram of at most `max_len` bytes, unmodified.
    pub async fn recv(&self, max_len: usize) -> Result<Vec<u8>, SocketError> {
        let (bytes, _from) = self.socket.recv(max_len).await?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn rates(drop: f64, corrupt: f64) -> FaultConfig {
        FaultConfig::new(drop, corrupt).unwrap()
    }

    async fn bound_pair(faults: FaultHandle) -> (Simulator, Socket) {
        let mut tx = Socket::open().unwrap();
        tx.bind_addr("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut rx = Socket::open().unwrap();
        let rx_addr = rx.bind_addr("127.0.0.1:0".parse().unwrap()).unwrap();

        let mut sim = Simulator::new(tx, faults);
        sim.set_peer(rx_addr);
        (sim, rx)
    }

    #[test]
    fn probabilities_outside_unit_interval_are_rejected() {
        assert!(FaultConfig::new(0.0, 1.0).is_ok());
        assert_eq!(
            FaultConfig::new(1.5, 0.0),
            Err(ConfigError::InvalidProbability {
                name: "drop rate",
                value: 1.5
            })
        );
        assert!(FaultConfig::new(0.0, -0.1).is_err());
        assert!(FaultConfig::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn corrupt_byte_always_changes_value() {
        for v in 0..=255u8 {
            let mut buf = [v];
            corrupt_byte(&mut buf, 0);
            assert_ne!(buf[0], v);
        }
        let mut buf = [0u8, 1, 2, 200];
        corrupt_byte(&mut buf, 0);
        corrupt_byte(&mut buf, 1);
        corrupt_byte(&mut buf, 2);
        corrupt_byte(&mut buf, 3);
        assert_eq!(buf, [254, 254, 0, 198]);
    }

    #[test]
    fn extreme_rates_are_deterministic() {
        let never = FaultHandle::new(FaultConfig::RELIABLE);
        let always_drop = FaultHandle::new(rates(1.0, 0.0));
        let always_corrupt = FaultHandle::new(rates(0.0, 1.0));
        for _ in 0..100 {
            assert_eq!(never.judge(10), Verdict::Deliver);
            assert_eq!(always_drop.judge(10), Verdict::Drop);
            assert!(matches!(always_corrupt.judge(10), Verdict::Corrupt(p) if p < 10));
        }
    }

    #[test]
    fn forced_faults_run_before_the_dice() {
        let faults = FaultHandle::new(FaultConfig::RELIABLE);
        faults.corrupt_next(1);
        faults.drop_next(2);
        assert_eq!(faults.pending_forced(), 3);

        assert!(matches!(faults.judge(6), Verdict::Corrupt(_)));
        assert_eq!(faults.judge(6), Verdict::Drop);
        assert_eq!(faults.judge(6), Verdict::Drop);
        assert_eq!(faults.judge(6), Verdict::Deliver);
        assert_eq!(faults.pending_forced(), 0);
    }

    #[test]
    fn seeded_models_repeat() {
        let a = FaultHandle::seeded(rates(0.3, 0.3), 7);
        let b = FaultHandle::seeded(rates(0.3, 0.3), 7);
        let run = |h: &FaultHandle| (0..50).map(|_| h.judge(100)).collect::<Vec<_>>();
        assert_eq!(run(&a), run(&b));
    }

    #[test]
    fn reseeding_replays_the_sequence() {
        let faults = FaultHandle::seeded(rates(0.5, 0.5), 3);
        let run = |h: &FaultHandle| (0..50).map(|_| h.judge(100)).collect::<Vec<_>>();
        let first = run(&faults);
        faults.reseed(3);
        assert_eq!(run(&faults), first);
    }

    #[test]
    fn set_config_replaces_both_rates() {
        let faults = FaultHandle::new(rates(1.0, 0.0));
        faults.set_config(rates(0.0, 1.0));
        assert_eq!(faults.config(), rates(0.0, 1.0));
        assert!(matches!(faults.judge(4), Verdict::Corrupt(_)));
        faults.set_config(FaultConfig::RELIABLE);
        assert_eq!(faults.judge(4), Verdict::Deliver);
    }

    #[test]
    fn drop_rate_is_roughly_honoured() {
        let faults = FaultHandle::seeded(rates(0.25, 0.0), 42);
        let dropped = (0..4000).filter(|_| faults.judge(8) == Verdict::Drop).count();
        assert!((800..1200).contains(&dropped), "dropped {dropped} of 4000");
    }

    #[test]
    fn clones_share_one_model() {
        let faults = FaultHandle::new(FaultConfig::RELIABLE);
        let harness = faults.clone();
        harness.set_drop_rate(1.0).unwrap();
        assert_eq!(faults.judge(4), Verdict::Drop);
        harness.set_drop_rate(0.0).unwrap();
        assert_eq!(faults.judge(4), Verdict::Deliver);
        assert!(harness.set_corrupt_rate(2.0).is_err());
    }

    #[tokio::test]
    async fn send_without_peer_is_an_error() {
        let mut tx = Socket::open().unwrap();
        tx.bind_addr("127.0.0.1:0".parse().unwrap()).unwrap();
        let sim = Simulator::new(tx, FaultHandle::new(FaultConfig::RELIABLE));
        assert!(matches!(sim.send(b"x").await, Err(SocketError::PeerNotSet)));
    }

    #[tokio::test]
    async fn dropped_send_reports_success_but_never_arrives() {
        let (sim, rx) = bound_pair(FaultHandle::new(rates(1.0, 0.0))).await;
        assert_eq!(sim.send(b"lost").await.unwrap(), 4);
        let got = tokio::time::timeout(Duration::from_millis(100), rx.recv(64)).await;
        assert!(got.is_err(), "dropped datagram was delivered");
    }

    #[tokio::test]
    async fn corrupted_send_differs_in_exactly_one_byte() {
        let (sim, rx) = bound_pair(FaultHandle::new(rates(0.0, 1.0))).await;
        let original = b"abcdefgh";
        sim.send(original).await.unwrap();

        let (got, _) = rx.recv(64).await.unwrap();
        assert_eq!(got.len(), original.len());
        let diffs = got.iter().zip(original).filter(|(a, b)| a != b).count();
        assert_eq!(diffs, 1);
    }

    #[tokio::test]
    async fn inbound_passes_through_untouched() {
        let (sim, rx) = bound_pair(FaultHandle::new(rates(0.0, 1.0))).await;
        let sim_addr = sim.socket().local_addr().unwrap();
        rx.send_to(b"clean", sim_addr).await.unwrap();
        assert_eq!(sim.recv(64).await.unwrap(), b"clean");
    }

    #[test]
    fn init_validates_and_publishes() {
        assert!(init(3.0, 0.0).is_err());
        init(0.0, 0.0).unwrap();
        assert_eq!(network_config(), FaultConfig::RELIABLE);
    }
}
