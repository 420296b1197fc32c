// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Admission of calls that need a valid credential.
//!
//! While the credential is fresh and no renewal is in flight, a call is
//! admitted immediately with the current bearer. Otherwise it is queued; the
//! first queued entry spawns a single release task which waits for the shared
//! renewal and then releases every queued entry, in arrival order, with the
//! same outcome.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::credential::refresh::RefreshCoordinator;
use crate::credential::store::CredentialStore;
use crate::error::SessionError;

type Admission = Result<Option<String>, SessionError>;

#[derive(Default)]
struct QueueState {
    entries: VecDeque<oneshot::Sender<Admission>>,
    releasing: bool,
}

pub struct AdmissionQueue {
    store: Arc<CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    state: Mutex<QueueState>,
}

impl AdmissionQueue {
    pub fn new(store: Arc<CredentialStore>, coordinator: Arc<RefreshCoordinator>) -> Arc<Self> {
        Arc::new(Self { store, coordinator, state: Mutex::new(QueueState::default()) })
    }

    /// Wait until the call may be dispatched.
    ///
    /// Returns the bearer to attach, `None` when the call needs no
    /// credential, or the renewal failure when the credential could not be
    /// made valid.
    pub async fn admit(self: &Arc<Self>, requires_credential: bool) -> Admission {
        if !requires_credential {
            return Ok(None);
        }

        let rx = {
            let mut state = self.state.lock();
            let idle = state.entries.is_empty() && !state.releasing;
            if idle && !self.coordinator.is_renewing() && !self.store.should_renew() {
                if let Some(bearer) = self.store.bearer() {
                    return Ok(Some(bearer));
                }
            }

            let (tx, rx) = oneshot::channel();
            state.entries.push_back(tx);
            debug!(queued = state.entries.len(), "call queued behind renewal");

            if !state.releasing {
                state.releasing = true;
                let queue = Arc::clone(self);
                tokio::spawn(async move {
                    queue.release().await;
                });
            }
            rx
        };

        rx.await.unwrap_or(Err(SessionError::SessionTerminated))
    }

    async fn release(&self) {
        // The renewal that caused the queueing may have settled before this
        // task first ran.
        let current = if self.coordinator.is_renewing() || self.store.should_renew() {
            None
        } else {
            self.store.bearer()
        };
        let outcome = match current {
            Some(bearer) => {
                debug!("credential already fresh, releasing without renewal");
                Ok(Some(bearer))
            }
            None => self.coordinator.refresh().await.map(|c| Some(c.raw().to_owned())),
        };

        let entries = {
            let mut state = self.state.lock();
            state.releasing = false;
            std::mem::take(&mut state.entries)
        };
        debug!(released = entries.len(), ok = outcome.is_ok(), "releasing queued calls");
        for entry in entries {
            let _ = entry.send(outcome.clone());
        }
    }

    /// Reject every queued entry with `error`. Returns how many were rejected.
    pub fn cancel_all(&self, error: SessionError) -> usize {
        let entries = std::mem::take(&mut self.state.lock().entries);
        let count = entries.len();
        for entry in entries {
            let _ = entry.send(Err(error.clone()));
        }
        if count > 0 {
            info!(count, err = %error, "queued calls cancelled");
        }
        count
    }

    /// Entries currently waiting for admission.
    pub fn pending(&self) -> usize {
        self.state.lock().entries.len()
    }
}

#[cfg(test)]
#[path = "admission_tests.rs"]
mod tests;
