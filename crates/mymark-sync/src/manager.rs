//! The domain manager: one sync domain per user, created on demand.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::Mutex;

use mymark_sync_core::{PeerId, TransportId, UserId};
use mymark_sync_protocol::Connection;
use mymark_sync_store::ChunkStoreProvider;

use crate::config::SyncConfig;
use crate::connection::AdapterHandle;
use crate::domain::UserSyncDomain;
use crate::engine::EngineFactory;
use crate::error::{Result, SyncError};

/// Owns every user's [`UserSyncDomain`] and routes connections to them.
///
/// # Concurrency
///
/// Lookups of existing domains take only a shared read lock. Creation is
/// serialized by a separate async lock with a second lookup under it, so
/// concurrent first connections for a user build exactly one domain.
pub struct DomainManager<F: EngineFactory> {
    factory: Arc<F>,
    stores: Arc<dyn ChunkStoreProvider>,
    config: SyncConfig,
    domains: RwLock<HashMap<UserId, Arc<UserSyncDomain>>>,
    create_lock: Mutex<()>,
    next_transport: AtomicU64,
}

impl<F: EngineFactory> DomainManager<F> {
    pub fn new(factory: F, stores: Arc<dyn ChunkStoreProvider>, config: SyncConfig) -> Self {
        Self {
            factory: Arc::new(factory),
            stores,
            config,
            domains: RwLock::new(HashMap::new()),
            create_lock: Mutex::new(()),
            next_transport: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Return the user's domain, constructing it on first use.
    ///
    /// On failure nothing is registered and the next call tries again.
    pub async fn get_or_create_domain(&self, user_id: &UserId) -> Result<Arc<UserSyncDomain>> {
        if let Some(domain) = self.domain(user_id) {
            return Ok(domain);
        }

        let _guard = self.create_lock.lock().await;
        if let Some(domain) = self.domain(user_id) {
            return Ok(domain);
        }

        let peer_id = PeerId::server_for(user_id);
        let storage = self.stores.scoped(user_id)?;
        let engine = self
            .factory
            .create(user_id, &peer_id, Arc::clone(&storage))
            .await?;

        let domain = Arc::new(UserSyncDomain::start(
            user_id.clone(),
            peer_id,
            storage,
            engine,
            self.config.engine_queue_capacity,
        ));

        let inserted = {
            let mut domains = self.write();
            if domains.contains_key(user_id) {
                false
            } else {
                domains.insert(user_id.clone(), Arc::clone(&domain));
                true
            }
        };
        if !inserted {
            tracing::error!(user_id = %user_id, "domain constructed twice");
            domain.stop_engine().await;
            return Err(SyncError::DuplicateDomain(user_id.clone()));
        }

        tracing::info!(user_id = %user_id, peer_id = %domain.peer_id(), "domain created");
        Ok(domain)
    }

    /// Attach a freshly opened connection to the user's domain.
    ///
    /// The engine sees the transport before this returns.
    pub async fn attach_connection<C>(
        &self,
        user_id: &UserId,
        connection: C,
    ) -> Result<AdapterHandle>
    where
        C: Connection + 'static,
    {
        let connection: Arc<dyn Connection> = Arc::new(connection);
        loop {
            let domain = self.get_or_create_domain(user_id).await?;
            let transport_id = TransportId(self.next_transport.fetch_add(1, Ordering::Relaxed));

            match domain
                .attach(transport_id, Arc::clone(&connection), &self.config)
                .await
            {
                Err(SyncError::DomainRetired(_)) => {
                    tracing::debug!(user_id = %user_id, "domain retired during attach");
                    continue;
                }
                result => return result,
            }
        }
    }

    /// Detach a closed connection. The domain stays resident.
    pub async fn detach_connection(&self, user_id: &UserId, handle: &AdapterHandle) -> Result<()> {
        match self.domain(user_id) {
            Some(domain) => domain.detach(handle).await,
            None => handle.disconnect().await,
        }
    }

    pub fn domain(&self, user_id: &UserId) -> Option<Arc<UserSyncDomain>> {
        self.read().get(user_id).cloned()
    }

    pub fn domain_count(&self) -> usize {
        self.read().len()
    }

    pub fn connection_count(&self, user_id: &UserId) -> usize {
        self.domain(user_id)
            .map(|d| d.connection_count())
            .unwrap_or(0)
    }

    /// Retire every domain with no connections and stop its engine.
    ///
    /// Returns how many were retired.
    pub async fn evict_idle(&self) -> usize {
        let snapshot: Vec<Arc<UserSyncDomain>> = self.read().values().cloned().collect();

        let mut retired = Vec::new();
        for domain in snapshot {
            if domain.retire_if_idle() {
                let mut domains = self.write();
                if domains
                    .get(domain.user_id())
                    .is_some_and(|current| Arc::ptr_eq(current, &domain))
                {
                    domains.remove(domain.user_id());
                }
                retired.push(domain);
            }
        }

        for domain in &retired {
            domain.stop_engine().await;
            tracing::info!(user_id = %domain.user_id(), "idle domain evicted");
        }
        retired.len()
    }

    /// Disconnect every connection and stop every engine.
    pub async fn shutdown(&self) {
        let domains: Vec<Arc<UserSyncDomain>> =
            self.write().drain().map(|(_, domain)| domain).collect();

        for domain in domains {
            for handle in domain.retire() {
                if let Err(e) = handle.disconnect().await {
                    tracing::debug!(
                        user_id = %domain.user_id(),
                        transport_id = %handle.id(),
                        error = %e,
                        "disconnect during shutdown failed"
                    );
                }
            }
            domain.stop_engine().await;
        }
        tracing::info!("domain manager shut down");
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<UserId, Arc<UserSyncDomain>>> {
        self.domains.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<UserId, Arc<UserSyncDomain>>> {
        self.domains.write().unwrap_or_else(PoisonError::into_inner)
    }
}
