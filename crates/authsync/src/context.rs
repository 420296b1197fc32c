// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wiring for one execution context.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::broadcast::session::SessionBroadcaster;
use crate::broadcast::storage::SharedStorage;
use crate::broadcast::{select_broadcaster, ContextId, Origin};
use crate::config::SessionConfig;
use crate::credential::refresh::RefreshCoordinator;
use crate::credential::store::CredentialStore;
use crate::endpoint::{RenewalEndpoint, ResourceEndpoint};
use crate::error::SessionError;
use crate::events::{EventHub, SessionEvent};
use crate::pipeline::admission::AdmissionQueue;
use crate::pipeline::client::{ClientParts, SessionClient};
use crate::pipeline::dedupe::CallDeduplicator;

/// Build the origin described by `config`: channel capability and, when a
/// storage path is set, file-backed shared storage.
pub fn origin_for(config: &SessionConfig) -> Result<Arc<Origin>, SessionError> {
    let storage = match config.storage_path {
        Some(ref path) => SharedStorage::open(path)?,
        None => SharedStorage::in_memory(),
    };
    Ok(Origin::new(config.broadcast_channels, storage))
}

/// Background tasks owned by a started context.
pub struct ContextTasks {
    pub sweeper: JoinHandle<()>,
    pub listener: JoinHandle<()>,
}

pub struct SessionContext {
    id: ContextId,
    config: Arc<SessionConfig>,
    store: Arc<CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    dedup: Arc<CallDeduplicator>,
    session: Arc<SessionBroadcaster>,
    client: Arc<SessionClient>,
    events: EventHub,
}

impl SessionContext {
    /// Build a context whose renewal and resource calls both go to `backend`.
    pub fn new<B>(config: SessionConfig, origin: &Origin, backend: Arc<B>) -> Self
    where
        B: RenewalEndpoint + ResourceEndpoint + 'static,
    {
        Self::with_endpoints(config, origin, Arc::clone(&backend) as Arc<dyn RenewalEndpoint>, backend)
    }

    pub fn with_endpoints(
        config: SessionConfig,
        origin: &Origin,
        renewal: Arc<dyn RenewalEndpoint>,
        resource: Arc<dyn ResourceEndpoint>,
    ) -> Self {
        let id = ContextId::new();
        let config = Arc::new(config);
        let events = EventHub::new();
        let store = Arc::new(CredentialStore::new(config.renew_margin()));
        let coordinator = RefreshCoordinator::new(Arc::clone(&store), renewal, events.clone());
        let admission = AdmissionQueue::new(Arc::clone(&store), Arc::clone(&coordinator));
        let dedup = CallDeduplicator::new(config.dedupe_stale_after());
        let broadcaster = select_broadcaster(origin, &config.channel_name, &config.storage_key, id);
        let session = SessionBroadcaster::new(
            broadcaster,
            Arc::clone(&store),
            Arc::clone(&admission),
            events.clone(),
        );
        let client = SessionClient::new(ClientParts {
            config: Arc::clone(&config),
            store: Arc::clone(&store),
            coordinator: Arc::clone(&coordinator),
            admission,
            dedup: Arc::clone(&dedup),
            resource,
            session: Arc::clone(&session),
            events: events.clone(),
        });
        Self { id, config, store, coordinator, dedup, session, client, events }
    }

    /// Spawn the stale-call sweeper and the cross-context listener.
    pub fn start(&self, shutdown: CancellationToken) -> ContextTasks {
        info!(context = %self.id, broadcaster = self.session.kind(), "session context started");
        ContextTasks {
            sweeper: self.dedup.spawn_sweeper(self.config.sweep_interval(), shutdown.clone()),
            listener: self.session.spawn_listener(shutdown),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn client(&self) -> &Arc<SessionClient> {
        &self.client
    }

    pub fn session(&self) -> &Arc<SessionBroadcaster> {
        &self.session
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
