//! Connection finite-state machine (FSM) types.
//!
//! A [`crate::connection::Connection`] moves through four states.  The
//! protocol work that causes each transition lives in [`crate::handshake`],
//! [`crate::connection`] and [`crate::teardown`]; this module only decides
//! which transitions are legal.
//!
//! ```text
//!   INIT ──handshake──▶ ESTABLISHED ──peer CLOSE──▶ FIN
//!    │                       │                       │
//!    │                  local close             local close
//!    │                       ▼                       │
//!    └──────close──────▶  CLOSED  ◀──────────────────┘
//! ```

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Created, no handshake yet.
    #[default]
    Init,
    /// Handshake complete; data may flow in both directions.
    Established,
    /// The peer's CLOSE has been received and acknowledged; our own close
    /// is still pending.
    Fin,
    /// Torn down; the transport has been released.
    Closed,
}

impl ConnectionState {
    /// Whether the FSM permits moving from `self` to `next`.
    ///
    /// Any state may drop to `Closed` (teardown or a fatal transport error).
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Init, Established) | (Established, Fin) | (Init | Established | Fin, Closed)
        )
    }

    /// `send` and `receive` are only meaningful once established.
    pub fn is_established(self) -> bool {
        self == ConnectionState::Established
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::Established => "ESTABLISHED",
            Self::Fin => "FIN",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}
