//! Connection teardown: each side sends its own CLOSE and has it
//! acknowledged.
//!
//! ```text
//!  active closer                     passive closer
//!     │ ── CLOSE ───────────────────▶ │   receive() returns end-of-stream
//!     │ ◀──────────────────────── ACK │   state FIN
//!     │ ◀────────────────────── CLOSE │   close()
//!     │ ── ACK ─────────────────────▶ │   CLOSED
//!     │   silence for `close_wait`    │
//!  CLOSED
//! ```
//!
//! The final ACK has nobody to acknowledge it, so the active closer lingers
//! for [`crate::timer::TimerConfig::close_wait`] and re-acknowledges any
//! CLOSE that shows up in that window.  A CLOSE arriving where an ACK was
//! expected is a simultaneous close: both sides then skip straight to the
//! linger.
//!
//! A CLOSE that is delayed past the linger reaches a released transport and
//! the passive side keeps retransmitting into silence; the linger length is
//! the only bound on that race.

use crate::connection::{ConnError, Connection};
use crate::packet::{Segment, SegmentType};
use crate::socket::Transport;
use crate::state::ConnectionState;
use crate::timer::Backoff;

impl<T: Transport> Connection<T> {
    /// Tear the connection down and release the transport.
    ///
    /// Performs the passive close if the peer's CLOSE has already been seen
    /// (state [`ConnectionState::Fin`]), otherwise the active close.  Always
    /// leaves the connection [`ConnectionState::Closed`], even when a
    /// transport error cuts the exchange short.  Calling it again is a no-op.
    pub async fn close(&mut self) -> Result<(), ConnError> {
        let result = match self.state {
            ConnectionState::Closed => return Ok(()),
            ConnectionState::Init => Ok(()),
            ConnectionState::Established => self.close_established().await,
            ConnectionState::Fin => self.passive_close().await,
        };
        self.shutdown();
        result
    }

    async fn close_established(&mut self) -> Result<(), ConnError> {
        let peer_closing = self
            .pending
            .as_ref()
            .is_some_and(|s| s.kind() == SegmentType::Close);
        if peer_closing {
            // The peer asked to close during the handshake; answer it the way
            // receive() would have.
            self.pending = None;
            self.on_peer_close().await?;
            return self.passive_close().await;
        }
        self.active_close().await
    }

    /// CLOSE until acknowledged (or crossed by the peer's CLOSE), wait for
    /// the peer's CLOSE, acknowledge it, then linger.
    async fn active_close(&mut self) -> Result<(), ConnError> {
        let close = Segment::control(SegmentType::Close, 0, 0);
        let mut resend = false;

        let acked = loop {
            let reply = self.round_trip(&close, resend).await?;
            match reply.kind() {
                SegmentType::Ack => break true,
                SegmentType::Close => {
                    log::debug!("[rdt] simultaneous close");
                    break false;
                }
                // Left unacknowledged: our resent CLOSE ends the peer's send
                // with an error instead.
                SegmentType::Data => log::warn!(
                    "[rdt] not accepting DATA seq={} while closing",
                    reply.header.seq
                ),
                other => log::debug!("[rdt] close: ignoring {other} while awaiting ACK"),
            }
            resend = true;
        };

        if acked {
            self.await_peer_close(&close).await?;
        }
        self.linger(&close, acked).await
    }

    /// Our CLOSE is acknowledged; wait for the peer's own.
    ///
    /// Each per-attempt timeout resends our CLOSE with backoff, since a peer
    /// that saw our CLOSE crossed with its own only answers a CLOSE.
    async fn await_peer_close(&mut self, close: &Segment) -> Result<(), ConnError> {
        let mut backoff = Backoff::new(self.rtt.timeout());
        loop {
            match self.wait_for_segment(Some(backoff.current())).await? {
                Some(seg) if seg.kind() == SegmentType::Close => return Ok(()),
                Some(seg) => log::debug!("[rdt] close: ignoring {} while awaiting CLOSE", seg.kind()),
                None => {
                    self.stats.timeouts += 1;
                    self.stats.retransmissions += 1;
                    backoff.back_off();
                    self.transmit(close).await?;
                }
            }
        }
    }

    /// Acknowledge the peer's CLOSE, then stay until `close_wait` passes in
    /// silence, re-acknowledging every CLOSE that arrives meanwhile.
    async fn linger(&mut self, close: &Segment, mut acked: bool) -> Result<(), ConnError> {
        let ack = Segment::control(SegmentType::Ack, 0, 0);
        self.transmit(&ack).await?;

        let wait = self.config.close_wait;
        while let Some(seg) = self.wait_for_segment(Some(wait)).await? {
            match seg.kind() {
                SegmentType::Close => {
                    self.stats.retransmissions += 1;
                    self.transmit(&ack).await?;
                    if !acked {
                        // Our own CLOSE may never have been seen.
                        self.transmit(close).await?;
                    }
                }
                SegmentType::Ack if !acked => acked = true,
                other => log::debug!("[rdt] linger: ignoring {other}"),
            }
        }
        log::debug!("[rdt] linger elapsed after {wait:?} of silence");
        Ok(())
    }

    /// Passive close: CLOSE until the peer acknowledges it.
    async fn passive_close(&mut self) -> Result<(), ConnError> {
        let close = Segment::control(SegmentType::Close, 0, 0);
        let mut resend = false;
        loop {
            let reply = self.round_trip(&close, resend).await?;
            if reply.kind() == SegmentType::Ack {
                return Ok(());
            }
            log::debug!("[rdt] close: ignoring {} while awaiting final ACK", reply.kind());
            resend = true;
        }
    }
}
