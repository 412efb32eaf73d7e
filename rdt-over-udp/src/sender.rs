//! Outbound sequence state for stop-and-wait reliability.
//!
//! [`Sender`] tracks the sequence number of the single DATA segment that may
//! be in flight.  It does **not** touch the transport;
//! [`crate::connection::Connection`] calls these methods and owns the actual
//! send/receive loop.
//!
//! # Stop-and-Wait contract
//! - At most **one** segment is in flight at any moment.
//! - The segment is resent unchanged until an ACK naming its sequence number
//!   arrives.
//! - On that ACK `next_seq` advances by exactly one.

use crate::packet::{Segment, SegmentType};

/// Stop-and-wait send-side state for one connection.
#[derive(Debug, Default)]
pub struct Sender {
    /// Sequence number carried by the next (or currently in-flight) DATA
    /// segment.  Starts at 0.
    pub next_seq: u32,
}

impl Sender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the DATA segment for `payload` under the current sequence number.
    pub fn build_data_segment(&self, payload: &[u8]) -> Segment {
        Segment::data(self.next_seq, payload.to_vec())
    }

    /// Whether `reply` acknowledges the in-flight segment.
    ///
    /// Anything else (another type, or an ACK left over from an earlier
    /// exchange) is stale.
    pub fn is_acked_by(&self, reply: &Segment) -> bool {
        reply.kind() == SegmentType::Ack && reply.header.ack == self.next_seq
    }

    /// Record that the in-flight segment was acknowledged.
    pub fn on_acked(&mut self) {
        self.next_seq = self.next_seq.wrapping_add(1);
    }
}
