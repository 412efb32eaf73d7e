//! In-memory lossy network for deterministic testing.
//!
//! Real networks drop, reorder, and duplicate packets.  To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! this module provides [`SimulatedTransport`]: one end of an in-memory
//! datagram link that implements [`Transport`] and applies a configurable
//! fault model to everything it sends:
//!
//! | Fault            | Description                                      |
//! |------------------|--------------------------------------------------|
//! | Packet loss      | Drop a datagram with probability `loss_rate`.    |
//! | Reordering       | Delay a datagram by `reorder_delay`, letting     |
//! |                  | later ones overtake it.                          |
//! | Duplication      | Deliver a datagram twice.                        |
//! | Scripted drops   | Drop the next *n* segments of a given type.      |
//! | Hard failure     | Fail every call with an injected I/O error.      |
//!
//! Randomness comes from a seeded `StdRng`, so a failing run can be replayed
//! from its seed.  Timeouts use `tokio::time`, so tests can run on a paused
//! clock.  As with UDP, sending to a peer that has gone away silently loses
//! the datagram.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

use crate::packet::{Segment, SegmentType};
use crate::socket::Transport;

/// Configuration for the fault-injection model of one direction.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram is delivered twice.
    pub duplicate_rate: f64,
    /// Probability that a datagram is held back by `reorder_delay`.
    pub reorder_rate: f64,
    pub reorder_delay: Duration,
    /// Seed for the fault RNG.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default: the link is a transparent pass-through.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            reorder_delay: Duration::ZERO,
            seed: 0,
        }
    }
}

/// What happened to the datagrams an endpoint sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub sent: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub reordered: u64,
}

/// Shared view of how many times an endpoint was closed.
#[derive(Debug, Clone, Default)]
pub struct CloseCounter(Arc<AtomicUsize>);

impl CloseCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// One end of an in-memory datagram link.
#[derive(Debug)]
pub struct SimulatedTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    /// Datagrams waiting in the peer's inbox.
    peer_queued: Arc<AtomicUsize>,
    /// Datagrams waiting in ours.
    queued: Arc<AtomicUsize>,
    config: SimulatorConfig,
    rng: StdRng,
    timeout: Option<Duration>,
    scripted_drops: HashMap<SegmentType, u32>,
    failure: Option<io::ErrorKind>,
    closes: CloseCounter,
    closed: bool,
    stats: LinkStats,
}

impl SimulatedTransport {
    /// Build a connected pair.  `a_to_b` governs what the first endpoint
    /// sends, `b_to_a` what the second sends.
    pub fn pair(a_to_b: SimulatorConfig, b_to_a: SimulatorConfig) -> (Self, Self) {
        let (tx_ab, rx_ab) = mpsc::unbounded_channel();
        let (tx_ba, rx_ba) = mpsc::unbounded_channel();
        let queued_a = Arc::new(AtomicUsize::new(0));
        let queued_b = Arc::new(AtomicUsize::new(0));

        let a = Self::endpoint(tx_ab, rx_ba, queued_b.clone(), queued_a.clone(), a_to_b);
        let b = Self::endpoint(tx_ba, rx_ab, queued_a, queued_b, b_to_a);
        (a, b)
    }

    /// A fault-free pair.
    pub fn pair_default() -> (Self, Self) {
        Self::pair(SimulatorConfig::default(), SimulatorConfig::default())
    }

    fn endpoint(
        tx: mpsc::UnboundedSender<Vec<u8>>,
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
        peer_queued: Arc<AtomicUsize>,
        queued: Arc<AtomicUsize>,
        config: SimulatorConfig,
    ) -> Self {
        Self {
            tx,
            rx,
            peer_queued,
            queued,
            rng: StdRng::seed_from_u64(config.seed),
            config,
            timeout: None,
            scripted_drops: HashMap::new(),
            failure: None,
            closes: CloseCounter::default(),
            closed: false,
            stats: LinkStats::default(),
        }
    }

    /// Drop the next `count` outgoing segments of type `kind`.
    pub fn drop_next(&mut self, kind: SegmentType, count: u32) {
        *self.scripted_drops.entry(kind).or_insert(0) += count;
    }

    /// Make every subsequent `send` and `recv` fail with `kind`.
    pub fn inject_failure(&mut self, kind: io::ErrorKind) {
        self.failure = Some(kind);
    }

    /// Datagrams delivered to this endpoint and not yet received.
    pub fn pending_datagrams(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> CloseCounter {
        self.closes.clone()
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    fn check_usable(&self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport closed"));
        }
        match self.failure {
            Some(kind) => Err(io::Error::new(kind, "injected transport failure")),
            None => Ok(()),
        }
    }

    fn take_scripted_drop(&mut self, datagram: &[u8]) -> bool {
        let Ok(segment) = Segment::decode(datagram) else {
            return false;
        };
        match self.scripted_drops.get_mut(&segment.kind()) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn deliver(&mut self, datagram: Vec<u8>) {
        if self.config.reorder_rate > 0.0 && self.rng.random_bool(self.config.reorder_rate) {
            self.stats.reordered += 1;
            let tx = self.tx.clone();
            let queued = self.peer_queued.clone();
            let delay = self.config.reorder_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if tx.send(datagram).is_ok() {
                    queued.fetch_add(1, Ordering::SeqCst);
                }
            });
        } else if self.tx.send(datagram).is_ok() {
            self.peer_queued.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Transport for SimulatedTransport {
    async fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        self.check_usable()?;
        self.stats.sent += 1;

        if self.take_scripted_drop(datagram) || self.rng.random_bool(self.config.loss_rate) {
            self.stats.dropped += 1;
            log::trace!("[sim] dropped {} byte datagram", datagram.len());
            return Ok(());
        }

        if self.rng.random_bool(self.config.duplicate_rate) {
            self.stats.duplicated += 1;
            self.deliver(datagram.to_vec());
        }
        self.deliver(datagram.to_vec());
        Ok(())
    }

    fn set_receive_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    async fn recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        self.check_usable()?;

        let rx = &mut self.rx;
        let next = async move {
            match rx.recv().await {
                Some(datagram) => datagram,
                // Peer gone: like UDP, nothing ever arrives again.
                None => std::future::pending().await,
            }
        };
        let received = match self.timeout {
            Some(t) => match tokio::time::timeout(t, next).await {
                Ok(datagram) => datagram,
                Err(_elapsed) => return Ok(None),
            },
            None => next.await,
        };
        self.queued.fetch_sub(1, Ordering::SeqCst);
        Ok(Some(received))
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        self.closes.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
