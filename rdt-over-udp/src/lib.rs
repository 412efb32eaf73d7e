//! `rdt-over-udp` — reliable, ordered, exactly-once delivery over UDP using
//! stop-and-wait ARQ with adaptive timeouts.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐   DATA (one in flight)  ┌──────────┐
//!  │  Sender  │────────────────────────▶│ Receiver │
//!  └────┬─────┘                         └─────┬────┘
//!       │          ACK(seq)                   │
//!       │◀────────────────────────────────────┘
//!       │
//!  ┌────▼──────────────────────────────────────────┐
//!  │                 Connection                    │
//!  │  handshake · round trip + RTT · teardown      │
//!  └────┬──────────────────────────────────────────┘
//!       │ raw datagrams
//!  ┌────▼──────┐
//!  │ Transport │  (tokio UdpSocket, or the in-memory simulator)
//!  └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]      — wire format (serialise / deserialise)
//! - [`state`]       — finite-state-machine types
//! - [`timer`]       — RTT estimation and retransmit backoff
//! - [`sender`]      — outbound sequence number and ACK matching
//! - [`receiver`]    — inbound sequence number and duplicate suppression
//! - [`socket`]      — transport trait and UDP implementation
//! - [`connection`]  — connection state, round trip primitive, send / receive
//! - [`handshake`]   — three-way open
//! - [`teardown`]    — four-message close
//! - [`simulator`]   — lossy/duplicating/reordering link for testing
//!
//! # Example
//!
//! ```ignore
//! let mut conn = Connection::connect("127.0.0.1", 9000).await?;
//! conn.send(b"hello").await?;
//! conn.close().await?;
//! ```

pub mod connection;
pub mod handshake;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod teardown;
pub mod timer;

pub use connection::{ConnError, Connection, ConnectionStats};
pub use packet::{Segment, SegmentType, MAX_PAYLOAD, MAX_SEGMENT_SIZE};
pub use socket::{Transport, UdpTransport};
pub use state::ConnectionState;
pub use timer::TimerConfig;
