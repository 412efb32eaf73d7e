//! Connection establishment: the three-way SYN / SYN_ACK / ACK exchange.
//!
//! ```text
//!  initiator                         listener
//!     │ ── SYN ─────────────────────▶ │   (resent until SYN_ACK)
//!     │ ◀──────────────────── SYN_ACK │   (resent until ACK, DATA or CLOSE)
//!     │ ── ACK ─────────────────────▶ │
//!     │    silence for one timeout    │
//!  ESTABLISHED                    ESTABLISHED
//! ```
//!
//! The initiator has nobody to acknowledge its final ACK, so it treats a
//! full timeout of silence as confirmation; a repeated SYN_ACK means the ACK
//! was lost and it is sent again.  The listener accepts a DATA or CLOSE
//! segment in place of the ACK, since that means the initiator has already
//! moved on; the segment is kept for the data phase.
//!
//! The listener commits to a peer only after decoding its SYN: anything
//! malformed that arrives first, from whoever, is dropped without claiming
//! the connection.

use crate::connection::{ConnError, Connection};
use crate::packet::{Segment, SegmentType};
use crate::socket::{Transport, UdpTransport};
use crate::state::ConnectionState;

impl Connection<UdpTransport> {
    /// Listen on UDP `port` and block until a peer completes the handshake.
    pub async fn listen(port: u16) -> Result<Self, ConnError> {
        let mut conn = Connection::new(UdpTransport::bind(port).await?);
        conn.accept().await?;
        Ok(conn)
    }

    /// Connect to `host:port` over UDP and complete the handshake.
    pub async fn connect(host: &str, port: u16) -> Result<Self, ConnError> {
        let mut conn = Connection::new(UdpTransport::connect(host, port).await?);
        conn.open().await?;
        Ok(conn)
    }
}

impl<T: Transport> Connection<T> {
    /// Passive open: wait for a SYN, then answer it until confirmed.
    ///
    /// The first well-formed segment must be a SYN; anything else is a
    /// [`ConnError::ProtocolViolation`] and the transport is released.
    pub async fn accept(&mut self) -> Result<(), ConnError> {
        self.ensure_init()?;

        let first = loop {
            if let Some(segment) = self.wait_for_segment(None).await? {
                break segment;
            }
        };
        if first.kind() != SegmentType::Syn {
            log::warn!("[rdt] listener expected SYN, got {}", first.kind());
            self.shutdown();
            return Err(ConnError::ProtocolViolation(first.kind()));
        }
        // Only now is the sender known to be our peer.
        if let Err(e) = self.transport.lock_peer().await {
            return Err(self.abort(e));
        }

        let syn_ack = Segment::control(SegmentType::SynAck, 0, 0);
        let mut resend = false;
        loop {
            let reply = self.round_trip(&syn_ack, resend).await?;
            match reply.kind() {
                SegmentType::Ack => break,
                SegmentType::Data | SegmentType::Close => {
                    // Our peer's ACK was lost but it has already moved on.
                    self.pending = Some(reply);
                    break;
                }
                other => log::debug!("[rdt] handshake: ignoring {other} while awaiting ACK"),
            }
            resend = true;
        }

        self.set_state(ConnectionState::Established)
    }

    /// Active open: SYN until a SYN_ACK arrives, then confirm with an ACK.
    pub async fn open(&mut self) -> Result<(), ConnError> {
        self.ensure_init()?;

        let syn = Segment::control(SegmentType::Syn, 0, 0);
        let mut resend = false;
        loop {
            let reply = self.round_trip(&syn, resend).await?;
            if reply.kind() == SegmentType::SynAck {
                break;
            }
            log::debug!("[rdt] handshake: ignoring {} while awaiting SYN_ACK", reply.kind());
            resend = true;
        }

        self.confirm_handshake().await?;
        self.set_state(ConnectionState::Established)
    }

    /// Send the final ACK and linger one timeout for evidence it was lost.
    async fn confirm_handshake(&mut self) -> Result<(), ConnError> {
        let ack = Segment::control(SegmentType::Ack, 0, 0);
        self.transmit(&ack).await?;

        loop {
            let timeout = self.rtt.timeout();
            let Some(reply) = self.wait_for_segment(Some(timeout)).await? else {
                return Ok(());
            };
            match reply.kind() {
                SegmentType::SynAck => {
                    self.stats.retransmissions += 1;
                    self.transmit(&ack).await?;
                }
                SegmentType::Data | SegmentType::Close => {
                    // The listener is past the handshake; keep what it sent.
                    self.pending = Some(reply);
                    return Ok(());
                }
                SegmentType::Syn | SegmentType::Ack => {
                    log::debug!("[rdt] handshake: ignoring stray {}", reply.kind());
                }
            }
        }
    }

    fn ensure_init(&self) -> Result<(), ConnError> {
        match self.state {
            ConnectionState::Init => Ok(()),
            ConnectionState::Closed => Err(ConnError::Closed),
            other => Err(ConnError::IllegalTransition {
                from: other,
                to: ConnectionState::Established,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::SimulatedTransport;

    #[tokio::test(start_paused = true)]
    async fn non_syn_first_segment_is_fatal() {
        let (a, mut b) = SimulatedTransport::pair_default();
        let closes = a.close_count();
        let mut listener = Connection::new(a);

        let data = Segment::data(0, b"hi".to_vec()).encode().unwrap();
        b.send(&data).await.unwrap();

        let err = listener.accept().await.unwrap_err();
        assert!(matches!(err, ConnError::ProtocolViolation(SegmentType::Data)));
        assert_eq!(listener.state(), ConnectionState::Closed);
        assert_eq!(closes.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_first_datagram_is_skipped() {
        let (a, mut b) = SimulatedTransport::pair_default();
        let mut listener = Connection::new(a);

        b.send(&[0xff; 3]).await.unwrap();
        b.send(&Segment::control(SegmentType::Syn, 0, 0).encode().unwrap())
            .await
            .unwrap();

        let initiator = tokio::spawn(async move {
            b.set_receive_timeout(None);
            let syn_ack = Segment::decode(&b.recv().await.unwrap().unwrap()).unwrap();
            assert_eq!(syn_ack.kind(), SegmentType::SynAck);
            b.send(&Segment::control(SegmentType::Ack, 0, 0).encode().unwrap())
                .await
                .unwrap();
            b
        });

        listener.accept().await.unwrap();
        assert_eq!(listener.state(), ConnectionState::Established);
        initiator.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn listener_keeps_data_sent_in_place_of_ack() {
        let (a, mut b) = SimulatedTransport::pair_default();
        let mut listener = Connection::new(a);

        let initiator = tokio::spawn(async move {
            b.send(&Segment::control(SegmentType::Syn, 0, 0).encode().unwrap())
                .await
                .unwrap();
            b.set_receive_timeout(None);
            b.recv().await.unwrap().unwrap(); // SYN_ACK
            b.send(&Segment::data(0, b"first".to_vec()).encode().unwrap())
                .await
                .unwrap();
            let ack = Segment::decode(&b.recv().await.unwrap().unwrap()).unwrap();
            assert_eq!(ack, Segment::ack_for(0));
        });

        listener.accept().await.unwrap();
        assert_eq!(listener.receive().await.unwrap().as_deref(), Some(&b"first"[..]));
        initiator.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn close_in_place_of_ack_ends_the_stream() {
        let (a, mut b) = SimulatedTransport::pair_default();
        let mut listener = Connection::new(a);

        let initiator = tokio::spawn(async move {
            b.send(&Segment::control(SegmentType::Syn, 0, 0).encode().unwrap())
                .await
                .unwrap();
            b.set_receive_timeout(None);
            b.recv().await.unwrap().unwrap(); // SYN_ACK
            b.send(&Segment::control(SegmentType::Close, 0, 0).encode().unwrap())
                .await
                .unwrap();
            let ack = Segment::decode(&b.recv().await.unwrap().unwrap()).unwrap();
            assert_eq!(ack.kind(), SegmentType::Ack);
        });

        listener.accept().await.unwrap();
        assert_eq!(listener.receive().await.unwrap(), None);
        assert_eq!(listener.state(), ConnectionState::Fin);
        initiator.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn accept_twice_is_rejected() {
        let (a, _b) = SimulatedTransport::pair_default();
        let mut conn = Connection::new(a);
        conn.state = ConnectionState::Established;
        assert!(matches!(
            conn.accept().await,
            Err(ConnError::IllegalTransition {
                from: ConnectionState::Established,
                ..
            })
        ));
    }
}
