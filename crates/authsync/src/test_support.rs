// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: credential minting and scripted endpoints.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::endpoint::{ApiRequest, ApiResponse, RenewalEndpoint, ResourceEndpoint};
use crate::error::SessionError;

/// Current epoch seconds.
pub fn now_secs() -> u64 {
    crate::credential::store::epoch_ms() / 1000
}

/// Mint an unsigned credential for `sub` expiring `ttl_secs` from now.
pub fn mint(sub: &str, ttl_secs: i64) -> String {
    mint_versioned(sub, 1, ttl_secs)
}

/// Mint an unsigned credential with an explicit `tokenVersion`.
pub fn mint_versioned(sub: &str, version: u64, ttl_secs: i64) -> String {
    let exp = (now_secs() as i64 + ttl_secs).max(0);
    mint_payload(&serde_json::json!({
        "sub": sub,
        "role": "member",
        "tokenVersion": version,
        "keepLoggedIn": true,
        "iat": now_secs(),
        "exp": exp,
    }))
}

/// Wrap an arbitrary JSON payload in a three-segment token.
pub fn mint_payload(payload: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{body}.c2lnbmF0dXJl")
}

// -- Renewal endpoint -----------------------------------------------------------

/// Renewal endpoint that answers from a script and counts calls.
///
/// When gated, each call parks until [`ScriptedRenewal::release`] is called,
/// which lets tests pile up concurrent waiters behind one renewal.
pub struct ScriptedRenewal {
    outcomes: Mutex<VecDeque<Result<String, SessionError>>>,
    calls: AtomicU32,
    gate: Option<Arc<Notify>>,
}

impl ScriptedRenewal {
    pub fn new(outcomes: Vec<Result<String, SessionError>>) -> Arc<Self> {
        Arc::new(Self { outcomes: Mutex::new(outcomes.into()), calls: AtomicU32::new(0), gate: None })
    }

    pub fn gated(outcomes: Vec<Result<String, SessionError>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: AtomicU32::new(0),
            gate: Some(Arc::new(Notify::new())),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn release(&self) {
        if let Some(ref gate) = self.gate {
            gate.notify_one();
        }
    }
}

impl RenewalEndpoint for ScriptedRenewal {
    fn renew(&self) -> Pin<Box<dyn Future<Output = Result<String, SessionError>> + Send + '_>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(ref gate) = self.gate {
                gate.notified().await;
            }
            self.outcomes
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(SessionError::RenewalFailure("script exhausted".into())))
        })
    }
}

// -- Resource endpoint ----------------------------------------------------------

/// One recorded dispatch.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub path: String,
    pub bearer: Option<String>,
}

type Responder = Box<dyn Fn(&ApiRequest, Option<&str>) -> ApiResponse + Send + Sync>;

/// Resource endpoint backed by a closure, recording every dispatch.
pub struct FakeResource {
    responder: Responder,
    dispatches: Mutex<Vec<Dispatch>>,
    delay: Duration,
    hang: bool,
}

impl FakeResource {
    pub fn new(
        responder: impl Fn(&ApiRequest, Option<&str>) -> ApiResponse + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            dispatches: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            hang: false,
        })
    }

    /// Always answer 200 with the path echoed back.
    pub fn ok() -> Arc<Self> {
        Self::new(|req, _| ApiResponse::new(200, serde_json::json!({ "path": req.path })))
    }

    /// Answer after `delay` so concurrent callers overlap.
    pub fn delayed(
        delay: Duration,
        responder: impl Fn(&ApiRequest, Option<&str>) -> ApiResponse + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            dispatches: Mutex::new(Vec::new()),
            delay,
            hang: false,
        })
    }

    /// Never answer.
    pub fn hanging() -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(|_, _| ApiResponse::new(200, serde_json::Value::Null)),
            dispatches: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            hang: true,
        })
    }

    pub fn dispatches(&self) -> Vec<Dispatch> {
        self.dispatches.lock().clone()
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatches.lock().len()
    }
}

impl ResourceEndpoint for FakeResource {
    fn send<'a>(
        &'a self,
        request: &'a ApiRequest,
        bearer: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse, SessionError>> + Send + 'a>> {
        Box::pin(async move {
            self.dispatches.lock().push(Dispatch {
                path: request.path.clone(),
                bearer: bearer.map(str::to_owned),
            });
            if self.hang {
                std::future::pending::<()>().await;
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok((self.responder)(request, bearer))
        })
    }
}

/// Yield to the scheduler until `condition` holds (bounded).
pub async fn yield_until(condition: impl Fn() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    assert!(condition(), "condition not reached");
}
