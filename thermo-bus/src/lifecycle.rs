/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Connection lifecycle notifications.
//!
//! Broker back-ends report what happens to the underlying connection through
//! a [`ConnectionHandler`].  Neither program reacts beyond logging: there is
//! no reconnect and no backoff.

use std::sync::Arc;

use tracing::{error, info};

/// Something that happened to a broker connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Transport established.
    Connected,
    /// Protocol handshake finished; channels may be opened.
    Ready,
    /// Connection closed on request.
    Closed,
    /// Connection is no longer usable by this process.
    Detached,
    /// Asynchronous connection failure reported by the client library.
    Error(String),
}

/// Receives [`ConnectionEvent`]s.  Called from the client library's own
/// context, so implementations must not block.
pub trait ConnectionHandler: Send + Sync {
    fn on_event(&self, event: ConnectionEvent);
}

pub type SharedHandler = Arc<dyn ConnectionHandler>;

/// Logs every event, tagged with the program role.
#[derive(Debug, Clone)]
pub struct LoggingHandler {
    role: &'static str,
}

impl LoggingHandler {
    pub fn new(role: &'static str) -> Self {
        Self { role }
    }

    pub fn shared(role: &'static str) -> SharedHandler {
        Arc::new(Self::new(role))
    }
}

impl ConnectionHandler for LoggingHandler {
    fn on_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => info!(role = self.role, "connected"),
            ConnectionEvent::Ready => info!(role = self.role, "ready"),
            ConnectionEvent::Closed => info!(role = self.role, "closed"),
            ConnectionEvent::Detached => info!(role = self.role, "detached"),
            ConnectionEvent::Error(message) => {
                error!(role = self.role, %message, "connection error")
            }
        }
    }
}

/// Keeps every event in order for lifecycle assertions.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingHandler {
    events: parking_lot::Mutex<Vec<ConnectionEvent>>,
}

#[cfg(test)]
impl RecordingHandler {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn events(&self) -> Vec<ConnectionEvent> {
        self.events.lock().clone()
    }
}

#[cfg(test)]
impl ConnectionHandler for RecordingHandler {
    fn on_event(&self, event: ConnectionEvent) {
        self.events.lock().push(event);
    }
}
