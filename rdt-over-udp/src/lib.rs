//! `rdt-over-udp`: alternating-bit (RDT 3.0) reliable messaging over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐  DATA(seq)   ┌──────────┐
//!  │  Sender  │─────────────▶│ Receiver │   (peer)
//!  └────┬─────┘              └─────┬────┘
//!       │        ACK(seq)          │
//!       │◀─────────────────────────┘
//!       │
//!  ┌────▼──────────────────────────────┐
//!  │           Connection              │
//!  │ (owns both FSMs, timer, teardown) │
//!  └────┬──────────────────────────────┘
//!       │ encoded packets
//!  ┌────▼──────┐
//!  │ Simulator │  (drops / corrupts outbound datagrams)
//!  └────┬──────┘
//!  ┌────▼──────┐
//!  │  Socket   │  (thin async wrapper around tokio UdpSocket)
//!  └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`checksum`]   : 16-bit one's-complement Internet checksum
//! - [`packet`]     : wire format (serialise / deserialise)
//! - [`state`]      : sequence bit and sender FSM types
//! - [`socket`]     : async UDP socket, opened then bound
//! - [`simulator`]  : fault-injecting unreliable channel, process-wide rates
//! - [`timer`]      : retransmission timeout and TIME-WAIT window
//! - [`sender`]     : stop-and-wait outbound state
//! - [`receiver`]   : in-sequence delivery and the early-data buffer
//! - [`connection`] : per-endpoint send / recv / close
//! - [`transfer`]   : file transfer client and server on top of a connection

pub mod checksum;
pub mod connection;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;
pub mod transfer;

pub use connection::{ConnError, Connection, Stats};
pub use packet::{HEADER_LEN, MAX_PAYLOAD};
pub use simulator::{init, ConfigError, FaultConfig, FaultHandle};
pub use state::SeqBit;
pub use timer::TimerConfig;
