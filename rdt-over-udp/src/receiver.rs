//! Inbound sequence state and duplicate suppression.
//!
//! With only one segment ever outstanding, the next DATA segment is either
//! the one we expect or a retransmission of the one we just delivered (our
//! ACK for it was lost).  A single equality check against
//! [`Receiver::expected_seq`] therefore gives exactly-once, in-order
//! delivery.
//!
//! The [`Receiver`] does **not** send ACKs itself; both outcomes must be
//! acknowledged by [`crate::connection::Connection`] so the peer's retry loop
//! can finish.

/// What to do with an inbound DATA segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Next in sequence: acknowledge and hand the payload to the caller.
    InOrder,
    /// Already delivered: acknowledge but drop the payload.
    Duplicate,
}

/// Receive-side state for one connection.
#[derive(Debug, Default)]
pub struct Receiver {
    /// Sequence number of the next DATA segment to deliver.  Starts at 0.
    pub expected_seq: u32,
}

impl Receiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify an inbound DATA segment by its sequence number, advancing
    /// `expected_seq` when it is the next in order.
    pub fn on_data(&mut self, seq: u32) -> Delivery {
        if seq == self.expected_seq {
            self.expected_seq = self.expected_seq.wrapping_add(1);
            Delivery::InOrder
        } else {
            Delivery::Duplicate
        }
    }
}
