// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::endpoint::ResourceEndpoint as _;
use crate::test_support::{yield_until, FakeResource};

fn dispatch(
    resource: &Arc<FakeResource>,
    request: ApiRequest,
) -> impl Future<Output = CallOutcome> + Send + 'static {
    let resource = Arc::clone(resource);
    async move { resource.send(&request, None).await.map(Arc::new) }
}

fn gated(gate: &Arc<Notify>, status: u16) -> impl Future<Output = CallOutcome> + Send + 'static {
    let gate = Arc::clone(gate);
    async move {
        gate.notified().await;
        Ok(Arc::new(ApiResponse::new(status, serde_json::Value::Null)))
    }
}

#[yare::parameterized(
    get = { Method::Get, "/me", true, "GET /me [auth]" },
    anonymous_post = { Method::Post, "/auth/login", false, "POST /auth/login [anon]" },
)]
fn signature_display(method: Method, path: &str, with_credential: bool, expected: &str) {
    let sig = CallSignature { method, path: path.to_owned(), with_credential };
    assert_eq!(sig.to_string(), expected);
}

#[test]
fn signature_of_request() {
    let sig = CallSignature::of(&ApiRequest::delete("/items/3").anonymous());
    assert_eq!(sig, CallSignature { method: Method::Delete, path: "/items/3".into(), with_credential: false });
}

#[tokio::test(start_paused = true)]
async fn identical_calls_share_one_dispatch() -> anyhow::Result<()> {
    let resource = FakeResource::delayed(Duration::from_millis(50), |req, _| {
        ApiResponse::new(200, serde_json::json!({ "path": req.path }))
    });
    let dedup = CallDeduplicator::new(DEFAULT_STALE_AFTER);
    let sig = CallSignature::of(&ApiRequest::get("/me"));

    let mut handles = Vec::new();
    for _ in 0..3 {
        let d = Arc::clone(&dedup);
        let s = sig.clone();
        let produce = dispatch(&resource, ApiRequest::get("/me"));
        handles.push(tokio::spawn(async move { d.dedupe(s, || produce).await }));
    }

    let mut results = Vec::new();
    for h in handles {
        results.push(h.await??);
    }
    assert_eq!(resource.dispatch_count(), 1);
    assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(dedup.in_flight(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn distinct_signatures_dispatch_separately() -> anyhow::Result<()> {
    let others = [
        ApiRequest::post("/me", serde_json::Value::Null),
        ApiRequest::get("/you"),
        ApiRequest::get("/me").anonymous(),
    ];
    for other in others {
        let resource = FakeResource::delayed(Duration::from_millis(50), |_, _| {
            ApiResponse::new(200, serde_json::Value::Null)
        });
        let dedup = CallDeduplicator::new(DEFAULT_STALE_AFTER);

        let first = ApiRequest::get("/me");
        let a = dedup.dedupe(CallSignature::of(&first), || dispatch(&resource, first.clone()));
        let b = dedup.dedupe(CallSignature::of(&other), || dispatch(&resource, other.clone()));
        let (a, b) = tokio::join!(a, b);

        a?;
        b?;
        assert_eq!(resource.dispatch_count(), 2, "{other:?}");
    }
    Ok(())
}

#[tokio::test]
async fn settled_record_is_removed() -> anyhow::Result<()> {
    let resource = FakeResource::ok();
    let dedup = CallDeduplicator::new(DEFAULT_STALE_AFTER);
    let req = ApiRequest::get("/me");

    dedup.dedupe(CallSignature::of(&req), || dispatch(&resource, req.clone())).await?;
    assert_eq!(dedup.in_flight(), 0);
    dedup.dedupe(CallSignature::of(&req), || dispatch(&resource, req.clone())).await?;
    assert_eq!(resource.dispatch_count(), 2);
    Ok(())
}

#[tokio::test]
async fn failures_are_shared() -> anyhow::Result<()> {
    let gate = Arc::new(Notify::new());
    let dedup = CallDeduplicator::new(DEFAULT_STALE_AFTER);
    let sig = CallSignature::of(&ApiRequest::get("/me"));

    let g = Arc::clone(&gate);
    let d = Arc::clone(&dedup);
    let s = sig.clone();
    let first = tokio::spawn(async move {
        d.dedupe(s, || async move {
            g.notified().await;
            Err(SessionError::Transport("reset".into()))
        })
        .await
    });
    yield_until(|| dedup.in_flight() == 1).await;

    let d = Arc::clone(&dedup);
    let second = tokio::spawn(async move { d.dedupe(sig, || gated(&Arc::new(Notify::new()), 200)).await });
    tokio::task::yield_now().await;
    gate.notify_one();

    let expected = Some(SessionError::Transport("reset".into()));
    assert_eq!(first.await?.err(), expected);
    assert_eq!(second.await?.err(), expected);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stale_record_no_longer_absorbs_callers() -> anyhow::Result<()> {
    let resource = FakeResource::hanging();
    let dedup = CallDeduplicator::new(DEFAULT_STALE_AFTER);
    let req = ApiRequest::get("/slow");

    let spawn_call = |dedup: &Arc<CallDeduplicator>| {
        let d = Arc::clone(dedup);
        let produce = dispatch(&resource, req.clone());
        let sig = CallSignature::of(&req);
        tokio::spawn(async move { d.dedupe(sig, || produce).await })
    };

    let _t0 = spawn_call(&dedup);
    yield_until(|| resource.dispatch_count() == 1).await;

    tokio::time::advance(Duration::from_secs(29)).await;
    let _t29 = spawn_call(&dedup);
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(resource.dispatch_count(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    let _t31 = spawn_call(&dedup);
    yield_until(|| resource.dispatch_count() == 2).await;
    assert_eq!(dedup.in_flight(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn old_settlement_keeps_replacement_record() -> anyhow::Result<()> {
    let dedup = CallDeduplicator::new(DEFAULT_STALE_AFTER);
    let sig = CallSignature::of(&ApiRequest::get("/me"));
    let old_gate = Arc::new(Notify::new());
    let new_gate = Arc::new(Notify::new());

    let d = Arc::clone(&dedup);
    let (s, g) = (sig.clone(), Arc::clone(&old_gate));
    let old = tokio::spawn(async move { d.dedupe(s, || gated(&g, 200)).await });
    yield_until(|| dedup.in_flight() == 1).await;

    tokio::time::advance(Duration::from_secs(31)).await;
    let d = Arc::clone(&dedup);
    let (s, g) = (sig.clone(), Arc::clone(&new_gate));
    let replacement = tokio::spawn(async move { d.dedupe(s, || gated(&g, 201)).await });
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    old_gate.notify_one();
    assert_eq!(old.await??.status, 200);
    assert_eq!(dedup.in_flight(), 1);

    // A new caller joins the replacement instead of producing.
    let produced = Arc::new(AtomicBool::new(false));
    let p = Arc::clone(&produced);
    let d = Arc::clone(&dedup);
    let joiner = tokio::spawn(async move {
        d.dedupe(sig, move || {
            p.store(true, Ordering::SeqCst);
            gated(&Arc::new(Notify::new()), 500)
        })
        .await
    });
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    new_gate.notify_one();

    assert_eq!(replacement.await??.status, 201);
    assert_eq!(joiner.await??.status, 201);
    assert!(!produced.load(Ordering::SeqCst));
    assert_eq!(dedup.in_flight(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn sweep_evicts_only_stale_records() -> anyhow::Result<()> {
    let resource = FakeResource::hanging();
    let dedup = CallDeduplicator::new(DEFAULT_STALE_AFTER);

    for path in ["/a", "/b"] {
        let d = Arc::clone(&dedup);
        let req = ApiRequest::get(path);
        let produce = dispatch(&resource, req.clone());
        tokio::spawn(async move { d.dedupe(CallSignature::of(&req), || produce).await });
    }
    yield_until(|| dedup.in_flight() == 2).await;

    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(dedup.sweep(), 0);

    tokio::time::advance(Duration::from_secs(21)).await;
    assert_eq!(dedup.sweep(), 2);
    assert_eq!(dedup.in_flight(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn sweeper_runs_until_shutdown() -> anyhow::Result<()> {
    let resource = FakeResource::hanging();
    let dedup = CallDeduplicator::new(DEFAULT_STALE_AFTER);
    let shutdown = CancellationToken::new();
    let sweeper = dedup.spawn_sweeper(Duration::from_secs(5), shutdown.clone());

    let d = Arc::clone(&dedup);
    let req = ApiRequest::get("/hung");
    let produce = dispatch(&resource, req.clone());
    tokio::spawn(async move { d.dedupe(CallSignature::of(&req), || produce).await });
    yield_until(|| dedup.in_flight() == 1).await;

    tokio::time::advance(Duration::from_secs(36)).await;
    yield_until(|| dedup.in_flight() == 0).await;

    shutdown.cancel();
    sweeper.await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn abandoned_call_still_completes() -> anyhow::Result<()> {
    let resource = FakeResource::delayed(Duration::from_millis(100), |_, _| {
        ApiResponse::new(200, serde_json::Value::Null)
    });
    let dedup = CallDeduplicator::new(DEFAULT_STALE_AFTER);
    let req = ApiRequest::get("/me");

    let d = Arc::clone(&dedup);
    let produce = dispatch(&resource, req.clone());
    let caller = tokio::spawn(async move { d.dedupe(CallSignature::of(&req), || produce).await });
    yield_until(|| resource.dispatch_count() == 1).await;
    caller.abort();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(dedup.in_flight(), 0);
    Ok(())
}
