// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session termination, local and remote.
//!
//! `terminate()` publishes a logout to the other contexts and then applies
//! the same reaction every context applies on receipt: clear the store,
//! reject queued admissions with [`SessionError::SessionTerminated`], and
//! tell the application layer the user is logged out.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_stream::StreamExt as _;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::broadcast::{Broadcaster, SessionMessage};
use crate::credential::store::CredentialStore;
use crate::error::SessionError;
use crate::events::{EventHub, LogoutOrigin, SessionEvent};
use crate::pipeline::admission::AdmissionQueue;

pub struct SessionBroadcaster {
    broadcaster: Arc<dyn Broadcaster>,
    store: Arc<CredentialStore>,
    admission: Arc<AdmissionQueue>,
    events: EventHub,
}

impl SessionBroadcaster {
    pub fn new(
        broadcaster: Arc<dyn Broadcaster>,
        store: Arc<CredentialStore>,
        admission: Arc<AdmissionQueue>,
        events: EventHub,
    ) -> Arc<Self> {
        Arc::new(Self { broadcaster, store, admission, events })
    }

    pub fn kind(&self) -> &'static str {
        self.broadcaster.kind()
    }

    /// End the session in every context of the origin.
    ///
    /// A publish failure is returned after the local reaction has still been
    /// applied: this context is logged out either way.
    pub fn terminate(&self) -> Result<(), SessionError> {
        let published = self.broadcaster.publish(&SessionMessage::Logout);
        self.react(LogoutOrigin::Local);
        published
    }

    /// Apply the logout reaction. Returns false when there was nothing to
    /// clear and nothing to cancel.
    pub fn react(&self, origin: LogoutOrigin) -> bool {
        let cleared = self.store.clear();
        let cancelled = self.admission.cancel_all(SessionError::SessionTerminated);
        if !cleared && cancelled == 0 {
            debug!(?origin, "already logged out");
            return false;
        }
        info!(?origin, cancelled, kind = self.kind(), "session terminated");
        self.events.emit(SessionEvent::LoggedOut { origin });
        true
    }

    /// React to messages from other contexts until `shutdown` fires.
    pub fn spawn_listener(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let session = Arc::clone(self);
        let mut messages = self.broadcaster.subscribe();
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    message = messages.next() => message,
                };
                match message {
                    Some(SessionMessage::Logout) => {
                        session.react(LogoutOrigin::Remote);
                    }
                    None => break,
                }
            }
            debug!("session listener stopped");
        })
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
