// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight credential renewal.
//!
//! State machine: `Idle -> Renewing -> Idle`. The first caller to find the
//! coordinator idle becomes the driver and is the only one to contact the
//! renewal endpoint; everyone arriving while `Renewing` registers a waiter.
//! When the endpoint settles, the outcome is committed to the store, every
//! waiter receives the same outcome, and the waiter list is reset.
//!
//! A renewal that settles after the store was cleared (the session ended
//! while it was in flight) commits nothing and resolves every waiter with
//! [`SessionError::SessionTerminated`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::credential::store::CredentialStore;
use crate::credential::Credential;
use crate::endpoint::RenewalEndpoint;
use crate::error::SessionError;
use crate::events::{EventHub, SessionEvent};

type Waiter = oneshot::Sender<Result<Credential, SessionError>>;

enum RenewalState {
    Idle,
    Renewing { waiters: Vec<Waiter> },
}

pub struct RefreshCoordinator {
    store: Arc<CredentialStore>,
    renewal: Arc<dyn RenewalEndpoint>,
    events: EventHub,
    state: Mutex<RenewalState>,
    renewals: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        renewal: Arc<dyn RenewalEndpoint>,
        events: EventHub,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            renewal,
            events,
            state: Mutex::new(RenewalState::Idle),
            renewals: AtomicU64::new(0),
        })
    }

    /// Renew the credential, joining an in-flight renewal if there is one.
    ///
    /// N concurrent callers produce exactly one endpoint call and all observe
    /// the same credential or the same error. There is no automatic retry.
    pub async fn refresh(self: &Arc<Self>) -> Result<Credential, SessionError> {
        let (tx, rx) = oneshot::channel();
        let is_driver = {
            let mut state = self.state.lock();
            match &mut *state {
                RenewalState::Renewing { waiters } => {
                    waiters.push(tx);
                    debug!(waiters = waiters.len(), "joined in-flight renewal");
                    false
                }
                RenewalState::Idle => {
                    *state = RenewalState::Renewing { waiters: vec![tx] };
                    true
                }
            }
        };

        if is_driver {
            // The endpoint call runs detached so a cancelled driver future
            // cannot strand the other waiters.
            let coordinator = Arc::clone(self);
            tokio::spawn(async move {
                coordinator.drive().await;
            });
        }

        rx.await
            .unwrap_or_else(|_| Err(SessionError::RenewalFailure("renewal abandoned".into())))
    }

    async fn drive(&self) {
        let attempt = self.renewals.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(attempt, "renewal started");

        let epoch = self.store.epoch();
        let outcome = match self.renewal.renew().await {
            Ok(raw) => self.commit(&raw, epoch),
            Err(_) if self.store.epoch() != epoch => Err(SessionError::SessionTerminated),
            Err(e) => Err(renewal_failure(e)),
        };

        match outcome {
            Ok(ref credential) => {
                info!(subject = %credential.subject(), attempt, "credential renewed");
                self.events.emit(SessionEvent::Renewed {
                    subject: credential.subject().to_owned(),
                    expires_at_ms: credential.expires_at_ms(),
                });
            }
            Err(SessionError::SessionTerminated) => {
                info!(attempt, "session ended during renewal, outcome discarded");
            }
            Err(ref e) => {
                self.store.clear();
                warn!(attempt, err = %e, "renewal failed, session cleared");
                self.events.emit(SessionEvent::RenewalFailed { error: e.to_string() });
            }
        }

        let waiters = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, RenewalState::Idle) {
                RenewalState::Renewing { waiters } => waiters,
                RenewalState::Idle => Vec::new(),
            }
        };
        debug!(waiters = waiters.len(), "renewal settled, releasing waiters");
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    /// Store the renewed credential before any waiter is resolved, unless
    /// the session epoch moved since the renewal started.
    fn commit(&self, raw: &str, epoch: u64) -> Result<Credential, SessionError> {
        if !self.store.set_if_epoch(raw, epoch).map_err(renewal_failure)? {
            return Err(SessionError::SessionTerminated);
        }
        self.store
            .credential()
            .ok_or_else(|| SessionError::RenewalFailure("credential cleared during renewal".into()))
    }

    pub fn is_renewing(&self) -> bool {
        matches!(*self.state.lock(), RenewalState::Renewing { .. })
    }

    /// Callers currently waiting on the in-flight renewal.
    pub fn waiter_count(&self) -> usize {
        match &*self.state.lock() {
            RenewalState::Renewing { waiters } => waiters.len(),
            RenewalState::Idle => 0,
        }
    }

    /// Total renewal endpoint calls made by this coordinator.
    pub fn renewal_count(&self) -> u64 {
        self.renewals.load(Ordering::SeqCst)
    }
}

fn renewal_failure(e: SessionError) -> SessionError {
    match e {
        SessionError::RenewalFailure(_) => e,
        other => SessionError::RenewalFailure(other.to_string()),
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
