//! Pairing handshake state published by
//! [`PairingCoordinator`](crate::PairingCoordinator).

use std::fmt;

/// ```text
///  NotPaired ──► InProgress ──► Paired
///      ▲             │
///      │             ├──► Failed
///      │             └──► Timeout
///      └── cancel_pairing()
/// ```
///
/// `Failed` and `Timeout` are not retried automatically; a new
/// `start_pairing` call begins a fresh attempt set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PairingState {
    #[default]
    NotPaired,
    InProgress,
    Paired,
    Failed,
    Timeout,
}

impl PairingState {
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::InProgress)
    }

    /// Returns `true` once an attempt set has produced an outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Paired | Self::Failed | Self::Timeout)
    }
}

impl fmt::Display for PairingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotPaired => write!(f, "NotPaired"),
            Self::InProgress => write!(f, "InProgress"),
            Self::Paired => write!(f, "Paired"),
            Self::Failed => write!(f, "Failed"),
            Self::Timeout => write!(f, "Timeout"),
        }
    }
}
