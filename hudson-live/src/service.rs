//! Service facade wiring the store, locks, hub and managers together.

use std::sync::Arc;
use std::time::Duration;

use hudson_core::{
    Catalog, LiveError, LiveResult, LiveView, Membership, SetId, SharedView, StatePointer,
    TenantId,
};

use crate::broadcast::{Subscription, Topic, TopicHub};
use crate::locks::KeyedLocks;
use crate::navigation::{NavCommand, Navigator};
use crate::positions::PositionManager;
use crate::sets::{committed_owned_set, SetManager};
use crate::share::{ShareSigner, DEFAULT_MAX_AGE};
use crate::storage::{LiveStore, StoreConfig};

/// Service configuration.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Events buffered per subscriber before it starts skipping (default: 256)
    pub broadcast_capacity: usize,
    /// HMAC secret for share tokens
    pub share_secret: Vec<u8>,
    /// Share token lifetime in seconds (default: 90 days)
    pub share_max_age_secs: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        // Per-process secret; tokens do not survive a restart unless one is configured
        let mut secret = uuid::Uuid::new_v4().as_bytes().to_vec();
        secret.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
        Self {
            broadcast_capacity: 256,
            share_secret: secret,
            share_max_age_secs: DEFAULT_MAX_AGE.as_secs(),
        }
    }
}

pub struct LiveService {
    store: Arc<LiveStore>,
    hub: Arc<TopicHub>,
    catalog: Arc<dyn Catalog>,
    navigator: Navigator,
    positions: PositionManager,
    sets: SetManager,
    set_locks: Arc<KeyedLocks<SetId>>,
    signer: ShareSigner,
}

impl LiveService {
    pub fn new(store: Arc<LiveStore>, catalog: Arc<dyn Catalog>, config: LiveConfig) -> LiveResult<Self> {
        let signer = ShareSigner::new(&config.share_secret)?
            .with_max_age(Duration::from_secs(config.share_max_age_secs));
        let hub = Arc::new(TopicHub::new(config.broadcast_capacity));
        let set_locks = Arc::new(KeyedLocks::new());

        Ok(Self {
            navigator: Navigator::new(store.clone(), set_locks.clone(), hub.clone(), catalog.clone()),
            positions: PositionManager::new(store.clone(), set_locks.clone(), hub.clone()),
            sets: SetManager::new(store.clone(), set_locks.clone(), hub.clone()),
            set_locks,
            store,
            hub,
            catalog,
            signer,
        })
    }

    /// Open the store and build the service on top of it.
    pub fn open(store_config: StoreConfig, catalog: Arc<dyn Catalog>, config: LiveConfig) -> LiveResult<Self> {
        let store = Arc::new(LiveStore::open(store_config)?);
        Self::new(store, catalog, config)
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    pub fn positions(&self) -> &PositionManager {
        &self.positions
    }

    pub fn sets(&self) -> &SetManager {
        &self.sets
    }

    pub fn hub(&self) -> &Arc<TopicHub> {
        &self.hub
    }

    pub fn store(&self) -> &Arc<LiveStore> {
        &self.store
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub async fn navigate(
        &self,
        tenant_id: TenantId,
        set_id: SetId,
        command: NavCommand,
    ) -> LiveResult<StatePointer> {
        self.navigator.apply(tenant_id, set_id, command).await
    }

    /// Release set and tenant lock entries with no holder or waiter.
    pub async fn prune_idle_locks(&self) -> usize {
        let pruned = self.set_locks.prune_idle().await + self.sets.prune_idle_locks().await;
        if pruned > 0 {
            log::debug!("Pruned {} idle lock entries", pruned);
        }
        pruned
    }

    /// Set and tenant lock entries currently allocated.
    pub async fn lock_count(&self) -> usize {
        self.set_locks.len().await + self.sets.tenant_lock_count().await
    }

    pub async fn subscribe(&self, topic: Topic) -> Subscription {
        self.hub.subscribe(topic).await
    }

    /// Latest committed pointer, or an empty one if the set was never navigated.
    pub fn pointer_or_empty(&self, tenant_id: TenantId, set_id: SetId) -> LiveResult<StatePointer> {
        Ok(self
            .navigator
            .current(tenant_id, set_id)?
            .unwrap_or_else(|| StatePointer::empty(set_id)))
    }

    pub fn list_memberships(&self, tenant_id: TenantId, set_id: SetId) -> LiveResult<Vec<Membership>> {
        self.positions.list(tenant_id, set_id)
    }

    /// Pointer resolved against the catalog, as the host display shows it.
    pub fn live_view(&self, tenant_id: TenantId, set_id: SetId) -> LiveResult<LiveView> {
        let pointer = self.pointer_or_empty(tenant_id, set_id)?;
        let memberships = self.store.list_memberships(set_id)?;
        let current = pointer
            .current_membership_id
            .and_then(|id| memberships.iter().find(|m| m.id == id).cloned());
        Ok(LiveView::build(
            pointer,
            current,
            memberships.len() as u32,
            self.catalog.as_ref(),
        ))
    }

    pub fn issue_share(&self, tenant_id: TenantId, set_id: SetId) -> LiveResult<String> {
        committed_owned_set(&self.store, tenant_id, set_id)?;
        let token = self.signer.issue(set_id)?;
        log::info!("Issued share token for set {}", set_id);
        Ok(token)
    }

    pub fn verify_share(&self, token: &str) -> LiveResult<SetId> {
        self.signer.verify(token).map_err(|e| {
            log::warn!("Rejected share token: {}", e);
            LiveError::from(e)
        })
    }

    /// Public projection for a share token holder.
    pub fn shared_view(&self, token: &str) -> LiveResult<SharedView> {
        let set_id = self.verify_share(token)?;
        self.shared_view_of(set_id)
    }

    /// Projection of a set already authorised through a token.
    pub(crate) fn shared_view_of(&self, set_id: SetId) -> LiveResult<SharedView> {
        let set = self
            .store
            .load_set(set_id)?
            .ok_or_else(|| LiveError::not_found("set", set_id))?;
        let memberships = self.store.list_memberships(set_id)?;
        let pointer = self
            .store
            .load_pointer(set_id)?
            .unwrap_or_else(|| StatePointer::empty(set_id));
        Ok(SharedView::build(&set, &memberships, pointer, self.catalog.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hudson_core::{CatalogItem, InMemoryCatalog, ItemId, MembershipAttrs, MessageColor};

    fn service() -> (tempfile::TempDir, LiveService, Arc<InMemoryCatalog>) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(InMemoryCatalog::new());
        let service = LiveService::open(
            StoreConfig::for_testing(dir.path().join("db")),
            catalog.clone(),
            LiveConfig::default(),
        )
        .unwrap();
        (dir, service, catalog)
    }

    #[tokio::test]
    async fn test_live_view_follows_pointer() {
        let (_dir, service, catalog) = service();
        let tenant = TenantId::new();
        let set = service.sets().create_set(tenant, "Show", "show", None).await.unwrap();
        let item = catalog.insert(CatalogItem::new("Scarf").with_images(["a.jpg", "b.jpg"]));
        service
            .positions()
            .add(tenant, set.id, item, MembershipAttrs::default(), None)
            .await
            .unwrap();

        let view = service.live_view(tenant, set.id).unwrap();
        assert!(view.membership.is_none());
        assert_eq!(view.total, 1);

        service.navigate(tenant, set.id, NavCommand::Initialize).await.unwrap();
        service.navigate(tenant, set.id, NavCommand::SetImageIndex(1)).await.unwrap();
        let view = service.live_view(tenant, set.id).unwrap();
        assert_eq!(view.item.unwrap().name, "Scarf");
        assert_eq!(view.image.unwrap().url, "b.jpg");
    }

    #[tokio::test]
    async fn test_shared_view_through_token() {
        let (_dir, service, catalog) = service();
        let tenant = TenantId::new();
        let set = service.sets().create_set(tenant, "Show", "show", None).await.unwrap();
        for name in ["Mug", "Tee"] {
            let item = catalog.insert(CatalogItem::new(name));
            service
                .positions()
                .add(tenant, set.id, item, MembershipAttrs::default(), None)
                .await
                .unwrap();
        }
        service
            .navigator()
            .send_message(tenant, set.id, "Going fast", MessageColor::Info)
            .await
            .unwrap();

        let token = service.issue_share(tenant, set.id).unwrap();
        let view = service.shared_view(&token).unwrap();
        assert_eq!(view.set_name, "Show");
        assert_eq!(view.items.len(), 2);
        assert_eq!(view.items[0].name, "Mug");
        assert_eq!(view.message().unwrap().text, "Going fast");
    }

    #[tokio::test]
    async fn test_share_requires_ownership_and_valid_token() {
        let (_dir, service, _) = service();
        let tenant = TenantId::new();
        let set = service.sets().create_set(tenant, "Show", "show", None).await.unwrap();

        assert!(matches!(
            service.issue_share(TenantId::new(), set.id),
            Err(LiveError::NotFound { .. })
        ));
        assert_eq!(service.shared_view("v1.bogus.token").unwrap_err(), LiveError::Invalid);

        let token = service.issue_share(tenant, set.id).unwrap();
        service.sets().delete_set(tenant, set.id).await.unwrap();
        assert!(matches!(service.shared_view(&token), Err(LiveError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_prune_idle_locks_after_navigation() {
        let (_dir, service, _) = service();
        let tenant = TenantId::new();
        let mut sets = Vec::new();
        for slug in ["one", "two", "three"] {
            let set = service.sets().create_set(tenant, slug, slug, None).await.unwrap();
            service
                .positions()
                .add(tenant, set.id, ItemId::new(), MembershipAttrs::default(), None)
                .await
                .unwrap();
            service.navigate(tenant, set.id, NavCommand::Initialize).await.unwrap();
            sets.push(set.id);
        }

        // Three set entries plus the tenant entry
        assert_eq!(service.lock_count().await, 4);
        assert_eq!(service.prune_idle_locks().await, 4);
        assert_eq!(service.lock_count().await, 0);
        assert_eq!(service.prune_idle_locks().await, 0);

        // Entries come back on demand
        let err = service.navigate(tenant, sets[0], NavCommand::Next).await.unwrap_err();
        assert_eq!(err, LiveError::EndOfSet);
        assert_eq!(service.prune_idle_locks().await, 1);
    }

    #[test]
    fn test_live_config_default() {
        let config = LiveConfig::default();
        assert_eq!(config.broadcast_capacity, 256);
        assert_eq!(config.share_max_age_secs, 90 * 24 * 60 * 60);
        assert_eq!(config.share_secret.len(), 32);
    }

    #[test]
    fn test_empty_secret_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = LiveConfig {
            share_secret: Vec::new(),
            ..LiveConfig::default()
        };
        let result = LiveService::open(
            StoreConfig::for_testing(dir.path().join("db")),
            Arc::new(InMemoryCatalog::new()),
            config,
        );
        assert!(matches!(result, Err(LiveError::Invalid)));
    }
}
