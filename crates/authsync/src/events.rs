// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Application-layer session notifications.
//!
//! The UI layer subscribes here to learn that the user signed in, that the
//! credential rotated, or that the session ended (locally or in another
//! context of the same origin).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Where a logout was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutOrigin {
    /// This context called `terminate()`.
    Local,
    /// Another context of the same origin did.
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The login collaborator stored an initial credential.
    SignedIn { subject: String },
    /// A renewal committed a fresh credential.
    Renewed { subject: String, expires_at_ms: u64 },
    /// A renewal failed; the user must sign in again.
    RenewalFailed { error: String },
    /// The session ended.
    LoggedOut { origin: LogoutOrigin },
}

/// Fans out [`SessionEvent`]s to every subscriber in one context.
#[derive(Clone)]
pub struct EventHub {
    event_tx: broadcast::Sender<SessionEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self { event_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Emit an event. Having no subscribers is not an error.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
