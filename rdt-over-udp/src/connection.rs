//! Per-connection state and the stop-and-wait data path.
//!
//! A [`Connection`] owns the complete state for one logical peer-to-peer
//! session.  Its responsibilities are:
//! - Driving the finite-state machine (see [`crate::state`]).
//! - Coordinating [`crate::sender`] and [`crate::receiver`].
//! - Running the reliable round trip every lossy exchange is built on: send a
//!   segment, wait up to the current timeout for any reply, on timeout double
//!   the wait and resend.
//! - Exposing `send` / `receive` to application code.
//!
//! Connection establishment lives in [`crate::handshake`] and teardown in
//! [`crate::teardown`]; both are further `impl` blocks on [`Connection`].
//!
//! Every operation takes `&mut self`: one caller at a time, start to finish.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::packet::{PacketError, Segment, SegmentType, MAX_PAYLOAD};
use crate::receiver::{Delivery, Receiver};
use crate::sender::Sender;
use crate::socket::Transport;
use crate::state::ConnectionState;
use crate::timer::{Backoff, RttEstimator, TimerConfig};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures surfaced to the caller.
///
/// Timeouts, duplicates, stale replies and malformed datagrams are absorbed
/// by the retry loops and never appear here.
#[derive(Debug, Error)]
pub enum ConnError {
    /// The transport failed below the protocol.  The connection is closed.
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
    /// A segment arrived for which the state machine has no transition.
    #[error("protocol violation: unexpected {0} segment")]
    ProtocolViolation(SegmentType),
    #[error("connection not established (state {0})")]
    NotEstablished(ConnectionState),
    #[error("connection is closed")]
    Closed,
    /// The peer closed before acknowledging a payload, which was therefore
    /// not delivered.  The connection is left in [`ConnectionState::Fin`].
    #[error("peer closed the connection; payload not delivered")]
    PeerClosed,
    #[error("payload of {len} bytes exceeds the {max}-byte segment capacity")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("illegal state transition {from} -> {to}")]
    IllegalTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
    #[error(transparent)]
    Packet(#[from] PacketError),
}

/// Counters for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Every datagram handed to the transport.
    pub segments_sent: u64,
    /// Transmissions that repeated a segment already sent in the same
    /// exchange.
    pub retransmissions: u64,
    /// Waits that expired without any reply.
    pub timeouts: u64,
    /// Completed round trips folded into the RTT estimate.
    pub rtt_samples: u64,
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A reliable, ordered, exactly-once connection over an unreliable
/// [`Transport`].
pub struct Connection<T: Transport> {
    pub(crate) state: ConnectionState,
    pub(crate) transport: T,
    pub(crate) sender: Sender,
    pub(crate) receiver: Receiver,
    pub(crate) rtt: RttEstimator,
    pub(crate) config: TimerConfig,
    /// A segment that arrived while the handshake was finishing and belongs
    /// to the data phase.
    pub(crate) pending: Option<Segment>,
    pub(crate) stats: ConnectionStats,
    released: bool,
}

impl<T: Transport> Connection<T> {
    /// Wrap `transport` in a fresh connection in [`ConnectionState::Init`].
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, TimerConfig::default())
    }

    pub fn with_config(transport: T, config: TimerConfig) -> Self {
        Self {
            state: ConnectionState::Init,
            transport,
            sender: Sender::new(),
            receiver: Receiver::new(),
            rtt: RttEstimator::new(&config),
            config,
            pending: None,
            stats: ConnectionStats::default(),
            released: false,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current RTT estimate in whole milliseconds.
    pub fn estimated_rtt(&self) -> u32 {
        self.rtt.estimated_ms().round() as u32
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    /// Sequence number the next `send` will use.
    pub fn send_sequence_number(&self) -> u32 {
        self.sender.next_seq
    }

    /// Sequence number the next delivered DATA segment must carry.
    pub fn receive_sequence_number(&self) -> u32 {
        self.receiver.expected_seq
    }

    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    pub fn config(&self) -> &TimerConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    // -----------------------------------------------------------------------
    // Data transfer
    // -----------------------------------------------------------------------

    /// Deliver `data` to the peer as one DATA segment.
    ///
    /// Returns once the peer has acknowledged this exact sequence number.
    /// Replies of any other type, and ACKs for other sequence numbers, are
    /// discarded and the segment is resent.
    ///
    /// If the peer's CLOSE arrives instead, the payload was not delivered:
    /// the CLOSE is acknowledged, the connection moves to
    /// [`ConnectionState::Fin`] and [`ConnError::PeerClosed`] is returned.
    pub async fn send(&mut self, data: &[u8]) -> Result<(), ConnError> {
        self.ensure_established()?;
        if data.len() > MAX_PAYLOAD {
            return Err(ConnError::PayloadTooLarge {
                len: data.len(),
                max: MAX_PAYLOAD,
            });
        }
        if self.pending.as_ref().is_some_and(|s| s.kind() == SegmentType::Close) {
            self.pending = None;
            self.on_peer_close().await?;
            return Err(ConnError::PeerClosed);
        }

        let segment = self.sender.build_data_segment(data);
        let mut resend = false;
        loop {
            let reply = self.round_trip(&segment, resend).await?;
            if self.sender.is_acked_by(&reply) {
                break;
            }
            if reply.kind() == SegmentType::Close {
                log::warn!(
                    "[rdt] peer closed with DATA seq={} unacknowledged",
                    self.sender.next_seq
                );
                self.on_peer_close().await?;
                return Err(ConnError::PeerClosed);
            }
            log::debug!(
                "[rdt] discarding {} ack={} while waiting for ACK {}",
                reply.kind(),
                reply.header.ack,
                self.sender.next_seq
            );
            resend = true;
        }

        self.sender.on_acked();
        Ok(())
    }

    /// Receive the next in-order payload from the peer.
    ///
    /// Blocks until one arrives.  Returns `Ok(None)` once the peer has asked
    /// to close; the connection is then in [`ConnectionState::Fin`] and every
    /// later call returns `Ok(None)` as well.
    pub async fn receive(&mut self) -> Result<Option<Vec<u8>>, ConnError> {
        match self.state {
            ConnectionState::Established => {}
            ConnectionState::Fin => return Ok(None),
            ConnectionState::Closed => return Err(ConnError::Closed),
            ConnectionState::Init => return Err(ConnError::NotEstablished(self.state)),
        }

        loop {
            let segment = match self.pending.take() {
                Some(segment) => segment,
                None => match self.wait_for_segment(None).await? {
                    Some(segment) => segment,
                    None => continue,
                },
            };

            match segment.kind() {
                SegmentType::Data => {
                    let seq = segment.header.seq;
                    // Duplicates are acknowledged too, so the sender's retry
                    // loop can terminate.
                    self.transmit(&Segment::ack_for(seq)).await?;
                    match self.receiver.on_data(seq) {
                        Delivery::InOrder => return Ok(Some(segment.payload)),
                        Delivery::Duplicate => {
                            log::debug!("[rdt] duplicate DATA seq={seq} re-acked, not delivered");
                        }
                    }
                }
                SegmentType::Close => {
                    self.on_peer_close().await?;
                    return Ok(None);
                }
                SegmentType::SynAck => {
                    // The listener never saw our final handshake ACK.
                    self.stats.retransmissions += 1;
                    self.transmit(&Segment::control(SegmentType::Ack, 0, 0)).await?;
                }
                SegmentType::Ack | SegmentType::Syn => {
                    log::debug!("[rdt] ignoring stale {}", segment.kind());
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reliable round trip
    // -----------------------------------------------------------------------

    /// Send `segment` and return the first well-formed reply.
    ///
    /// Each attempt waits for the current timeout; an expiry doubles it and
    /// resends.  The loop never gives up on its own; only a transport error
    /// ends it.  The RTT estimate is updated from the attempt that got a
    /// reply.  `resend` marks the first transmission as a repeat of one the
    /// caller already sent.
    ///
    /// The reply is not interpreted here: callers loop around this to filter
    /// for the type and sequence number they want.
    pub(crate) async fn round_trip(
        &mut self,
        segment: &Segment,
        resend: bool,
    ) -> Result<Segment, ConnError> {
        let mut backoff = Backoff::new(self.rtt.timeout());
        let mut repeat = resend;

        loop {
            if repeat {
                self.stats.retransmissions += 1;
            }
            self.transmit(segment).await?;
            let sent_at = Instant::now();

            match self.wait_for_segment(Some(backoff.current())).await? {
                Some(reply) => {
                    self.rtt.record_sample(sent_at.elapsed());
                    self.stats.rtt_samples += 1;
                    log::debug!(
                        "[rdt] rtt sample={:.1}ms estimated={:.1}ms deviation={:.1}ms timeout={:?}",
                        self.rtt.current_ms(),
                        self.rtt.estimated_ms(),
                        self.rtt.deviation_ms(),
                        self.rtt.timeout()
                    );
                    return Ok(reply);
                }
                None => {
                    self.stats.timeouts += 1;
                    let next = backoff.back_off();
                    log::debug!("[rdt] timeout on {}; next wait {next:?}", segment.kind());
                    repeat = true;
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Encode and send one segment.  A transport error aborts the connection.
    pub(crate) async fn transmit(&mut self, segment: &Segment) -> Result<(), ConnError> {
        let bytes = segment.encode()?;
        if let Err(e) = self.transport.send(&bytes).await {
            return Err(self.abort(e));
        }
        self.stats.segments_sent += 1;
        log::debug!(
            "[rdt] → {} seq={} ack={} len={}",
            segment.kind(),
            segment.header.seq,
            segment.header.ack,
            segment.payload.len()
        );
        Ok(())
    }

    /// Wait up to `timeout` (`None` = forever) for the next well-formed
    /// segment.
    ///
    /// Malformed datagrams are dropped and the wait continues against the
    /// same deadline.  `Ok(None)` means the deadline passed.
    pub(crate) async fn wait_for_segment(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<Option<Segment>, ConnError> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        loop {
            let remaining = match deadline {
                Some(at) => {
                    let now = Instant::now();
                    if now >= at {
                        return Ok(None);
                    }
                    Some(at - now)
                }
                None => None,
            };
            self.transport.set_receive_timeout(remaining);

            let datagram = match self.transport.recv().await {
                Ok(Some(datagram)) => datagram,
                Ok(None) => return Ok(None),
                Err(e) => return Err(self.abort(e)),
            };

            match Segment::decode(&datagram) {
                Ok(segment) => {
                    log::debug!(
                        "[rdt] ← {} seq={} ack={} len={}",
                        segment.kind(),
                        segment.header.seq,
                        segment.header.ack,
                        segment.payload.len()
                    );
                    return Ok(Some(segment));
                }
                Err(e) => {
                    log::warn!("[rdt] dropping malformed datagram ({} bytes): {e}", datagram.len());
                }
            }
        }
    }

    /// Acknowledge the peer's CLOSE and enter [`ConnectionState::Fin`].
    pub(crate) async fn on_peer_close(&mut self) -> Result<(), ConnError> {
        self.transmit(&Segment::control(SegmentType::Ack, 0, 0)).await?;
        self.set_state(ConnectionState::Fin)
    }

    pub(crate) fn ensure_established(&self) -> Result<(), ConnError> {
        match self.state {
            ConnectionState::Established => Ok(()),
            ConnectionState::Closed => Err(ConnError::Closed),
            other => Err(ConnError::NotEstablished(other)),
        }
    }

    pub(crate) fn set_state(&mut self, next: ConnectionState) -> Result<(), ConnError> {
        if !self.state.can_transition_to(next) {
            return Err(ConnError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        log::info!("[rdt] {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// Release the transport (at most once) and enter
    /// [`ConnectionState::Closed`].
    pub(crate) fn shutdown(&mut self) {
        self.pending = None;
        if !self.released {
            self.released = true;
            if let Err(e) = self.transport.close() {
                log::warn!("[rdt] error releasing transport: {e}");
            }
        }
        if self.state != ConnectionState::Closed {
            log::info!("[rdt] {} -> {}", self.state, ConnectionState::Closed);
            self.state = ConnectionState::Closed;
        }
    }

    /// Fatal transport failure: tear everything down and hand back the error.
    pub(crate) fn abort(&mut self, err: io::Error) -> ConnError {
        log::error!("[rdt] transport failure, aborting connection: {err}");
        self.shutdown();
        ConnError::Io(err)
    }
}
