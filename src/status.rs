//! Connection status indicator.
//!
//! A pure projection of the most recent remote call: `Polling` while a call is
//! outstanding, then `Connected` or `Error` depending on how it ended. Every
//! setter reports whether the visible status changed so callers only emit UI
//! updates on transitions.

use crate::types::ConnectionStatus;

#[derive(Debug, Default)]
pub struct ConnectionTracker {
    status: ConnectionStatus,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// A remote call is about to start
    pub fn begin(&mut self) -> Option<ConnectionStatus> {
        self.set(ConnectionStatus::Polling)
    }

    pub fn succeeded(&mut self) -> Option<ConnectionStatus> {
        self.set(ConnectionStatus::Connected)
    }

    pub fn failed(&mut self) -> Option<ConnectionStatus> {
        self.set(ConnectionStatus::Error)
    }

    fn set(&mut self, status: ConnectionStatus) -> Option<ConnectionStatus> {
        if self.status == status {
            return None;
        }
        tracing::debug!("Connection status {:?} -> {:?}", self.status, status);
        self.status = status;
        Some(status)
    }
}
