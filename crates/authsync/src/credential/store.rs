// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential store: the single source of truth for "am I authenticated,
//! as whom, until when" within one execution context.
//!
//! Every mutation happens under one synchronous lock with no suspension
//! point between reading the old state and committing the new one.
//!
//! [`clear`](CredentialStore::clear) also ends the current session epoch. A
//! writer that started work under an earlier epoch commits through
//! [`set_if_epoch`](CredentialStore::set_if_epoch) and loses to the clear.

use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::credential::{decode, Credential};
use crate::error::SessionError;

/// Default early-renewal margin (10 minutes).
pub const DEFAULT_RENEW_MARGIN: Duration = Duration::from_secs(600);

/// Notification for each committed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialChange {
    Set { subject: String, expires_at_ms: u64 },
    Cleared,
}

/// Point-in-time copy of the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialSnapshot {
    pub credential: Option<Credential>,
    pub expiry_ms: Option<u64>,
    pub is_authenticated: bool,
}

#[derive(Default)]
struct Inner {
    credential: Option<Credential>,
    expiry_ms: Option<u64>,
    is_authenticated: bool,
    generation: u64,
    epoch: u64,
}

pub struct CredentialStore {
    inner: Mutex<Inner>,
    renew_margin: Duration,
    change_tx: broadcast::Sender<CredentialChange>,
}

impl CredentialStore {
    pub fn new(renew_margin: Duration) -> Self {
        let (change_tx, _) = broadcast::channel(64);
        Self { inner: Mutex::new(Inner::default()), renew_margin, change_tx }
    }

    /// Replace the stored credential, or clear it when `raw` is `None`.
    ///
    /// Setting the currently stored raw value again is a no-op: no decode and
    /// no change notification. A credential that fails to decode clears the
    /// store and is reported as [`SessionError::InvalidCredential`].
    pub fn set(&self, raw: Option<&str>) -> Result<(), SessionError> {
        let Some(raw) = raw else {
            self.clear();
            return Ok(());
        };

        self.commit(self.inner.lock(), raw)
    }

    /// Like [`set`](Self::set), but only while the session epoch is still
    /// `epoch`. Returns false, leaving the store untouched, when a clear
    /// happened in between.
    pub fn set_if_epoch(&self, raw: &str, epoch: u64) -> Result<bool, SessionError> {
        let inner = self.inner.lock();
        if inner.epoch != epoch {
            debug!(expected = epoch, current = inner.epoch, "session epoch moved, credential discarded");
            return Ok(false);
        }
        self.commit(inner, raw).map(|()| true)
    }

    fn commit(&self, mut inner: MutexGuard<'_, Inner>, raw: &str) -> Result<(), SessionError> {
        if inner.credential.as_ref().is_some_and(|c| c.raw() == raw) {
            return Ok(());
        }

        match decode(raw) {
            Ok(credential) => {
                let subject = credential.subject().to_owned();
                let expires_at_ms = credential.expires_at_ms();
                inner.expiry_ms = Some(expires_at_ms);
                inner.credential = Some(credential);
                inner.is_authenticated = true;
                inner.generation += 1;
                drop(inner);

                debug!(subject = %subject, expires_at_ms, "credential stored");
                let _ = self.change_tx.send(CredentialChange::Set { subject, expires_at_ms });
                Ok(())
            }
            Err(e) => {
                let had_state = reset(&mut inner);
                drop(inner);

                warn!(err = %e, "rejected credential, store cleared");
                if had_state {
                    let _ = self.change_tx.send(CredentialChange::Cleared);
                }
                Err(SessionError::InvalidCredential(Box::new(e)))
            }
        }
    }

    /// Clear all state and start a new session epoch. Returns whether
    /// anything was stored.
    pub fn clear(&self) -> bool {
        let cleared = {
            let mut inner = self.inner.lock();
            inner.epoch += 1;
            reset(&mut inner)
        };
        if cleared {
            debug!("credential cleared");
            let _ = self.change_tx.send(CredentialChange::Cleared);
        }
        cleared
    }

    /// Whether the credential should be renewed before use.
    pub fn should_renew(&self) -> bool {
        self.should_renew_at(epoch_ms())
    }

    /// True when no expiry is known or `now_ms >= expiry - margin`.
    pub fn should_renew_at(&self, now_ms: u64) -> bool {
        let margin_ms = self.renew_margin.as_millis() as u64;
        match self.inner.lock().expiry_ms {
            None => true,
            Some(expiry) => now_ms >= expiry.saturating_sub(margin_ms),
        }
    }

    /// Re-evaluate expiry and report whether the context is authenticated.
    pub fn is_authenticated(&self) -> bool {
        let now = epoch_ms();
        let mut inner = self.inner.lock();
        let live = inner.credential.is_some() && inner.expiry_ms.is_some_and(|e| e > now);
        inner.is_authenticated = live;
        live
    }

    /// Raw bearer string currently stored.
    pub fn bearer(&self) -> Option<String> {
        self.inner.lock().credential.as_ref().map(|c| c.raw().to_owned())
    }

    pub fn credential(&self) -> Option<Credential> {
        self.inner.lock().credential.clone()
    }

    pub fn snapshot(&self) -> CredentialSnapshot {
        let inner = self.inner.lock();
        CredentialSnapshot {
            credential: inner.credential.clone(),
            expiry_ms: inner.expiry_ms,
            is_authenticated: inner.is_authenticated,
        }
    }

    /// Number of committed credential replacements.
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Current session epoch, bumped by every clear.
    pub fn epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CredentialChange> {
        self.change_tx.subscribe()
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new(DEFAULT_RENEW_MARGIN)
    }
}

fn reset(inner: &mut Inner) -> bool {
    let had_state = inner.credential.is_some() || inner.is_authenticated;
    inner.credential = None;
    inner.expiry_ms = None;
    inner.is_authenticated = false;
    had_state
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
