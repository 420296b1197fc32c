// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Call-dispatch orchestration.
//!
//! Every call goes through: deduplication, admission (skipped for the
//! renewal, login and provider-callback families), dispatch, response
//! classification, and at most one reactive renewal-and-replay when a call
//! that carried a credential is rejected as credential-invalid.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::broadcast::session::SessionBroadcaster;
use crate::config::SessionConfig;
use crate::credential::refresh::RefreshCoordinator;
use crate::credential::store::CredentialStore;
use crate::credential::Credential;
use crate::endpoint::{ApiRequest, ApiResponse, CallFamily, Method, ResourceEndpoint};
use crate::error::SessionError;
use crate::events::{EventHub, SessionEvent};
use crate::pipeline::admission::AdmissionQueue;
use crate::pipeline::dedupe::{CallDeduplicator, CallOutcome, CallSignature};

/// Status a resource endpoint uses to reject the attached credential.
pub const CREDENTIAL_INVALID_STATUS: u16 = 401;

pub struct SessionClient {
    config: Arc<SessionConfig>,
    store: Arc<CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    admission: Arc<AdmissionQueue>,
    dedup: Arc<CallDeduplicator>,
    resource: Arc<dyn ResourceEndpoint>,
    session: Arc<SessionBroadcaster>,
    events: EventHub,
}

/// Collaborators shared with the rest of a context.
pub struct ClientParts {
    pub config: Arc<SessionConfig>,
    pub store: Arc<CredentialStore>,
    pub coordinator: Arc<RefreshCoordinator>,
    pub admission: Arc<AdmissionQueue>,
    pub dedup: Arc<CallDeduplicator>,
    pub resource: Arc<dyn ResourceEndpoint>,
    pub session: Arc<SessionBroadcaster>,
    pub events: EventHub,
}

impl SessionClient {
    pub fn new(parts: ClientParts) -> Arc<Self> {
        Arc::new(Self {
            config: parts.config,
            store: parts.store,
            coordinator: parts.coordinator,
            admission: parts.admission,
            dedup: parts.dedup,
            resource: parts.resource,
            session: parts.session,
            events: parts.events,
        })
    }

    /// Issue `request` and return the shared response.
    ///
    /// A request left in the `Resource` family is reclassified from its path,
    /// so the configured renewal, login and callback paths are always exempt
    /// from admission.
    pub async fn call(self: &Arc<Self>, mut request: ApiRequest) -> CallOutcome {
        if request.family == CallFamily::Resource {
            request.family = self.config.family_for(&request.path);
        }
        let signature = CallSignature::of(&request);
        let client = Arc::clone(self);
        self.dedup.dedupe(signature, move || async move { client.admit_and_dispatch(request).await }).await
    }

    async fn admit_and_dispatch(&self, request: ApiRequest) -> CallOutcome {
        let exempt = request.family.is_auth_exempt();
        let bearer = match (exempt, request.requires_credential) {
            (_, false) => None,
            (true, true) => self.store.bearer(),
            (false, true) => self.admission.admit(true).await?,
        };

        match self.dispatch(&request, bearer.as_deref()).await {
            Err(SessionError::CredentialInvalid { status, .. }) if bearer.is_some() && !exempt => {
                info!(path = %request.path, status, "credential rejected, renewing before replay");
                let renewed = self.coordinator.refresh().await?;
                let replayed = self.dispatch(&request, Some(renewed.raw())).await;
                if let Err(ref e) = replayed {
                    warn!(path = %request.path, err = %e, "replay after renewal failed");
                }
                replayed
            }
            outcome => outcome,
        }
    }

    async fn dispatch(&self, request: &ApiRequest, bearer: Option<&str>) -> CallOutcome {
        debug!(method = %request.method, path = %request.path, family = ?request.family, "dispatch");
        let response = self.resource.send(request, bearer).await?;
        classify(response)
    }

    /// End the session server-side, then in every context of the origin.
    ///
    /// A failed logout call leaves the session intact.
    pub async fn logout(self: &Arc<Self>) -> Result<(), SessionError> {
        let request = ApiRequest::new(Method::Post, self.config.logout_path.clone()).family(CallFamily::Logout);
        self.call(request).await?;
        self.session.terminate()
    }

    /// Store the credential issued by a login flow.
    ///
    /// Signing in again with the stored credential announces nothing.
    pub fn sign_in(&self, raw: &str) -> Result<Credential, SessionError> {
        let generation = self.store.generation();
        self.store.set(Some(raw))?;
        let credential = self.store.credential().ok_or(SessionError::SessionTerminated)?;
        if self.store.generation() != generation {
            info!(subject = %credential.subject(), "signed in");
            self.events.emit(SessionEvent::SignedIn { subject: credential.subject().to_owned() });
        }
        Ok(credential)
    }
}

fn classify(response: ApiResponse) -> CallOutcome {
    if response.is_success() {
        return Ok(Arc::new(response));
    }
    let ApiResponse { status, body } = response;
    if status == CREDENTIAL_INVALID_STATUS {
        Err(SessionError::CredentialInvalid { status, body })
    } else {
        Err(SessionError::Rejected { status, body })
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
