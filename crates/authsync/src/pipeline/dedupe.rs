// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Collapse concurrent identical calls into one round trip.
//!
//! A call is identified by its [`CallSignature`]. While a record for a
//! signature is pending, new callers await the same shared outcome instead of
//! dispatching. Records are removed when the call settles, or once they are
//! older than the staleness window so that a hung call stops absorbing new
//! callers. A stale call is not cancelled.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::endpoint::{ApiRequest, ApiResponse, Method};
use crate::error::SessionError;

/// Default staleness window for pending records.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(30);

pub type CallOutcome = Result<Arc<ApiResponse>, SessionError>;

/// Identity of "the same call" for collapsing purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSignature {
    pub method: Method,
    pub path: String,
    pub with_credential: bool,
}

impl CallSignature {
    pub fn of(request: &ApiRequest) -> Self {
        Self {
            method: request.method,
            path: request.path.clone(),
            with_credential: request.requires_credential,
        }
    }
}

impl fmt::Display for CallSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let auth = if self.with_credential { "auth" } else { "anon" };
        write!(f, "{} {} [{auth}]", self.method, self.path)
    }
}

struct PendingCall {
    id: u64,
    started: Instant,
    call: Shared<BoxFuture<'static, CallOutcome>>,
}

pub struct CallDeduplicator {
    stale_after: Duration,
    records: Mutex<HashMap<CallSignature, PendingCall>>,
    next_id: AtomicU64,
}

impl CallDeduplicator {
    pub fn new(stale_after: Duration) -> Arc<Self> {
        Arc::new(Self {
            stale_after,
            records: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Join the pending call for `signature`, or start one with `produce`.
    ///
    /// `produce` is only invoked when no live record exists. The produced
    /// future runs on its own task, so it completes (and removes its record)
    /// even if every caller stops waiting.
    pub async fn dedupe<F, Fut>(self: &Arc<Self>, signature: CallSignature, produce: F) -> CallOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CallOutcome> + Send + 'static,
    {
        let call = {
            let mut records = self.records.lock();
            let now = Instant::now();
            let live = records
                .get(&signature)
                .filter(|pending| now.duration_since(pending.started) < self.stale_after)
                .map(|pending| pending.call.clone());
            match live {
                Some(call) => {
                    debug!(signature = %signature, "joined pending call");
                    call
                }
                None => {
                    if records.contains_key(&signature) {
                        debug!(signature = %signature, "evicted stale pending call");
                    }
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let call = self.start(signature.clone(), id, produce());
                    records.insert(signature, PendingCall { id, started: now, call: call.clone() });
                    call
                }
            }
        };
        call.await
    }

    // Called with the records lock held: the spawned task's `settle` cannot
    // observe the map before the new record is inserted.
    fn start<Fut>(self: &Arc<Self>, signature: CallSignature, id: u64, fut: Fut) -> Shared<BoxFuture<'static, CallOutcome>>
    where
        Fut: Future<Output = CallOutcome> + Send + 'static,
    {
        let dedup = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let outcome = fut.await;
            dedup.settle(&signature, id);
            outcome
        });
        async move {
            handle
                .await
                .unwrap_or_else(|e| Err(SessionError::Transport(format!("call aborted: {e}"))))
        }
        .boxed()
        .shared()
    }

    /// Remove the record for `signature` if it is still the one we created.
    fn settle(&self, signature: &CallSignature, id: u64) {
        let mut records = self.records.lock();
        if records.get(signature).is_some_and(|p| p.id == id) {
            records.remove(signature);
            debug!(signature = %signature, "pending call settled");
        }
    }

    /// Evict every record older than the staleness window.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, p| now.duration_since(p.started) < self.stale_after);
        let swept = before - records.len();
        if swept > 0 {
            info!(swept, remaining = records.len(), "swept stale pending calls");
        }
        swept
    }

    /// Run [`sweep`](Self::sweep) every `interval` until `shutdown` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let dedup = Arc::clone(self);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = timer.tick() => {}
                }
                dedup.sweep();
            }
        })
    }

    /// Records currently pending.
    pub fn in_flight(&self) -> usize {
        self.records.lock().len()
    }
}

#[cfg(test)]
#[path = "dedupe_tests.rs"]
mod tests;
