// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-context "session ended" signaling.
//!
//! Two interchangeable [`Broadcaster`] strategies exist: a named broadcast
//! channel shared by every context of an [`Origin`], and a fallback that
//! writes a timestamp sentinel into [`SharedStorage`] and relies on change
//! notifications. [`select_broadcaster`] picks one from the origin's
//! capabilities at startup.

pub mod session;
pub mod storage;

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::Stream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::credential::store::epoch_ms;
use crate::error::SessionError;

use self::storage::SharedStorage;

/// Default channel name.
pub const DEFAULT_CHANNEL: &str = "auth";
/// Default storage sentinel key.
pub const DEFAULT_STORAGE_KEY: &str = "logout-event";

/// The only message carried between contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionMessage {
    Logout,
}

pub type SessionMessageStream = Pin<Box<dyn Stream<Item = SessionMessage> + Send>>;

/// Identity of one execution context within an origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Notifies the other contexts of the origin.
///
/// A publisher never receives its own messages.
pub trait Broadcaster: Send + Sync {
    fn publish(&self, message: &SessionMessage) -> Result<(), SessionError>;
    fn subscribe(&self) -> SessionMessageStream;
    fn kind(&self) -> &'static str;
}

// -- Origin ------------------------------------------------------------------

/// Frame on a named channel: the sender and the JSON-encoded message.
#[derive(Debug, Clone)]
pub struct ChannelFrame {
    sender: ContextId,
    payload: String,
}

/// Everything shared by the contexts of one origin.
pub struct Origin {
    channels_supported: bool,
    channels: Mutex<HashMap<String, broadcast::Sender<ChannelFrame>>>,
    storage: Arc<SharedStorage>,
}

impl Origin {
    pub fn new(channels_supported: bool, storage: Arc<SharedStorage>) -> Arc<Self> {
        Arc::new(Self { channels_supported, channels: Mutex::new(HashMap::new()), storage })
    }

    /// Origin with broadcast channels and in-memory storage.
    pub fn in_memory() -> Arc<Self> {
        Self::new(true, SharedStorage::in_memory())
    }

    pub fn channels_supported(&self) -> bool {
        self.channels_supported
    }

    /// The channel registered under `name`, created on first use.
    /// `None` when the runtime has no broadcast channels.
    pub fn channel(&self, name: &str) -> Option<broadcast::Sender<ChannelFrame>> {
        if !self.channels_supported {
            return None;
        }
        let mut channels = self.channels.lock();
        let sender = channels.entry(name.to_owned()).or_insert_with(|| broadcast::channel(64).0);
        Some(sender.clone())
    }

    pub fn storage(&self) -> &Arc<SharedStorage> {
        &self.storage
    }
}

// -- Channel strategy --------------------------------------------------------

pub struct ChannelBroadcaster {
    context: ContextId,
    name: String,
    sender: broadcast::Sender<ChannelFrame>,
}

impl ChannelBroadcaster {
    pub fn new(origin: &Origin, name: &str, context: ContextId) -> Result<Self, SessionError> {
        let sender = origin
            .channel(name)
            .ok_or_else(|| SessionError::Transport("broadcast channels unavailable".into()))?;
        Ok(Self { context, name: name.to_owned(), sender })
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn publish(&self, message: &SessionMessage) -> Result<(), SessionError> {
        let payload = serde_json::to_string(message).map_err(|e| SessionError::Transport(e.to_string()))?;
        // No listeners is fine.
        let receivers = self.sender.send(ChannelFrame { sender: self.context, payload }).unwrap_or(0);
        debug!(channel = %self.name, receivers, "published session message");
        Ok(())
    }

    fn subscribe(&self) -> SessionMessageStream {
        let me = self.context;
        let name = self.name.clone();
        let stream = BroadcastStream::new(self.sender.subscribe()).filter_map(move |frame| {
            let frame = match frame {
                Ok(frame) => frame,
                // Logout is the only message, so anything missed was one.
                Err(e) => {
                    warn!(channel = %name, err = %e, "session channel lagged, treating as logout");
                    return Some(SessionMessage::Logout);
                }
            };
            if frame.sender == me {
                return None;
            }
            match serde_json::from_str(&frame.payload) {
                Ok(message) => Some(message),
                Err(e) => {
                    debug!(channel = %name, err = %e, "ignoring unknown channel message");
                    None
                }
            }
        });
        Box::pin(stream)
    }

    fn kind(&self) -> &'static str {
        "channel"
    }
}

// -- Storage strategy --------------------------------------------------------

pub struct StorageBroadcaster {
    context: ContextId,
    key: String,
    storage: Arc<SharedStorage>,
}

impl StorageBroadcaster {
    pub fn new(storage: Arc<SharedStorage>, key: &str, context: ContextId) -> Self {
        Self { context, key: key.to_owned(), storage }
    }
}

impl Broadcaster for StorageBroadcaster {
    fn publish(&self, message: &SessionMessage) -> Result<(), SessionError> {
        match message {
            SessionMessage::Logout => {
                let stamp = epoch_ms().to_string();
                self.storage.set(&self.key, &stamp, self.context)?;
                debug!(key = %self.key, stamp = %stamp, "wrote logout sentinel");
            }
        }
        Ok(())
    }

    fn subscribe(&self) -> SessionMessageStream {
        let me = self.context;
        let key = self.key.clone();
        let stream = BroadcastStream::new(self.storage.subscribe()).filter_map(move |change| {
            let change = match change {
                Ok(change) => change,
                Err(e) => {
                    warn!(key = %key, err = %e, "storage notifications lagged, treating as logout");
                    return Some(SessionMessage::Logout);
                }
            };
            (change.key == key && change.writer != me && change.new_value.is_some())
                .then_some(SessionMessage::Logout)
        });
        Box::pin(stream)
    }

    fn kind(&self) -> &'static str {
        "storage"
    }
}

/// Pick the channel strategy when the origin supports it, otherwise the
/// storage fallback.
pub fn select_broadcaster(
    origin: &Origin,
    channel_name: &str,
    storage_key: &str,
    context: ContextId,
) -> Arc<dyn Broadcaster> {
    match ChannelBroadcaster::new(origin, channel_name, context) {
        Ok(channel) => Arc::new(channel),
        Err(_) => Arc::new(StorageBroadcaster::new(Arc::clone(origin.storage()), storage_key, context)),
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
