//! Integration tests for connection teardown.

use rdt_over_udp::{
    simulator::{CloseCounter, SimulatedTransport},
    ConnError, Connection, ConnectionState, SegmentType,
};
use tokio::time::Instant;

type Conn = Connection<SimulatedTransport>;

/// Establish a pair and keep handles on each side's release counter.
async fn establish() -> (Conn, CloseCounter, Conn, CloseCounter) {
    let (a, b) = SimulatedTransport::pair_default();
    let (a_closes, b_closes) = (a.close_count(), b.close_count());
    let mut initiator = Connection::new(a);
    let mut listener = Connection::new(b);
    let (i, l) = tokio::join!(initiator.open(), listener.accept());
    i.expect("initiator handshake");
    l.expect("listener handshake");
    (initiator, a_closes, listener, b_closes)
}

#[tokio::test(start_paused = true)]
async fn active_then_passive_close() {
    let (mut a, a_closes, mut b, b_closes) = establish().await;

    let started = Instant::now();
    let active = async {
        a.close().await.unwrap();
        started.elapsed()
    };
    let passive = async {
        assert_eq!(b.receive().await.unwrap(), None);
        assert_eq!(b.state(), ConnectionState::Fin);
        // End-of-stream is sticky and sending is no longer allowed.
        assert_eq!(b.receive().await.unwrap(), None);
        assert!(matches!(
            b.send(b"too late").await,
            Err(ConnError::NotEstablished(ConnectionState::Fin))
        ));
        b.close().await.unwrap();
    };
    let (active_took, ()) = tokio::join!(active, passive);

    assert_eq!(a.state(), ConnectionState::Closed);
    assert_eq!(b.state(), ConnectionState::Closed);
    assert_eq!(a_closes.get(), 1);
    assert_eq!(b_closes.get(), 1);
    assert!(active_took >= a.config().close_wait);
}

#[tokio::test(start_paused = true)]
async fn listener_can_close_first() {
    let (mut a, a_closes, mut b, b_closes) = establish().await;

    let passive = async {
        assert_eq!(a.receive().await.unwrap(), None);
        a.close().await.unwrap();
    };
    let ((), res) = tokio::join!(passive, b.close());
    res.unwrap();

    assert_eq!(a.state(), ConnectionState::Closed);
    assert_eq!(b.state(), ConnectionState::Closed);
    assert_eq!((a_closes.get(), b_closes.get()), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn simultaneous_close() {
    let (mut a, a_closes, mut b, b_closes) = establish().await;

    let (ra, rb) = tokio::join!(a.close(), b.close());
    ra.unwrap();
    rb.unwrap();

    assert_eq!(a.state(), ConnectionState::Closed);
    assert_eq!(b.state(), ConnectionState::Closed);
    assert_eq!((a_closes.get(), b_closes.get()), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn simultaneous_close_with_one_close_lost() {
    let (mut a, a_closes, mut b, b_closes) = establish().await;
    a.transport_mut().drop_next(SegmentType::Close, 1);

    let (ra, rb) = tokio::join!(a.close(), b.close());
    ra.unwrap();
    rb.unwrap();

    assert_eq!(a.state(), ConnectionState::Closed);
    assert_eq!(b.state(), ConnectionState::Closed);
    assert_eq!((a_closes.get(), b_closes.get()), (1, 1));
    assert!(b.stats().retransmissions >= 1);
}

#[tokio::test(start_paused = true)]
async fn lost_final_ack_is_resent_during_linger() {
    let (mut a, _, mut b, _) = establish().await;
    a.transport_mut().drop_next(SegmentType::Ack, 1);

    let passive = async {
        assert_eq!(b.receive().await.unwrap(), None);
        b.close().await.unwrap();
    };
    let (ra, ()) = tokio::join!(a.close(), passive);
    ra.unwrap();

    assert_eq!(a.state(), ConnectionState::Closed);
    assert_eq!(b.state(), ConnectionState::Closed);
    // The passive side had to repeat its CLOSE, the active side its ACK.
    assert!(b.stats().retransmissions >= 1);
    assert!(a.stats().retransmissions >= 1);
}

#[tokio::test(start_paused = true)]
async fn data_racing_close_is_reported_to_sender() {
    let (mut a, _, mut b, _) = establish().await;

    let late_sender = async {
        // The closer never accepts this payload, so send must not claim it
        // was delivered.
        assert!(matches!(a.send(b"late").await, Err(ConnError::PeerClosed)));
        assert_eq!(a.state(), ConnectionState::Fin);
        assert_eq!(a.receive().await.unwrap(), None);
        a.close().await.unwrap();
    };
    let ((), rb) = tokio::join!(late_sender, b.close());
    rb.unwrap();

    assert_eq!(a.state(), ConnectionState::Closed);
    assert_eq!(b.state(), ConnectionState::Closed);
    assert_eq!(a.send_sequence_number(), 0);
    assert_eq!(b.receive_sequence_number(), 0);
}

#[tokio::test(start_paused = true)]
async fn operations_after_close() {
    let (mut a, a_closes, mut b, _) = establish().await;
    let (ra, rb) = tokio::join!(a.close(), b.close());
    ra.unwrap();
    rb.unwrap();

    assert!(matches!(a.send(b"x").await, Err(ConnError::Closed)));
    assert!(matches!(a.receive().await, Err(ConnError::Closed)));
    a.close().await.unwrap();
    assert_eq!(a_closes.get(), 1);
}
