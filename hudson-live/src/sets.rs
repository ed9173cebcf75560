//! Set management: create, rename, re-slug, delete.
//!
//! Slug claims are serialized per tenant so two creates racing for the same
//! slug cannot both pass the index check. Lock order is always tenant lock
//! first, then set lock.

use std::sync::Arc;

use hudson_core::{normalize_slug, LiveError, LiveResult, LiveSet, SetId, TenantId};

use crate::broadcast::{ListChange, LiveEvent, TopicHub};
use crate::locks::KeyedLocks;
use crate::storage::{LiveStore, StoreTxn};

/// Set lookup inside a transaction; a set of another tenant is `NotFound`.
pub(crate) fn owned_set(txn: &StoreTxn<'_>, tenant_id: TenantId, set_id: SetId) -> LiveResult<LiveSet> {
    txn.set(set_id)?
        .filter(|set| set.tenant_id == tenant_id)
        .ok_or_else(|| LiveError::not_found("set", set_id))
}

/// Same check against committed state, without a transaction.
pub(crate) fn committed_owned_set(
    store: &LiveStore,
    tenant_id: TenantId,
    set_id: SetId,
) -> LiveResult<LiveSet> {
    store
        .load_set(set_id)?
        .filter(|set| set.tenant_id == tenant_id)
        .ok_or_else(|| LiveError::not_found("set", set_id))
}

/// Field edits for [`SetManager::update_set`]. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct SetUpdate {
    pub name: Option<String>,
    pub slug: Option<String>,
    /// `Some(None)` clears the notes
    pub notes: Option<Option<String>>,
}

pub struct SetManager {
    store: Arc<LiveStore>,
    set_locks: Arc<KeyedLocks<SetId>>,
    tenant_locks: KeyedLocks<TenantId>,
    hub: Arc<TopicHub>,
}

impl SetManager {
    pub fn new(store: Arc<LiveStore>, set_locks: Arc<KeyedLocks<SetId>>, hub: Arc<TopicHub>) -> Self {
        Self {
            store,
            set_locks,
            tenant_locks: KeyedLocks::new(),
            hub,
        }
    }

    /// Drop tenant lock entries nobody holds.
    pub async fn prune_idle_locks(&self) -> usize {
        self.tenant_locks.prune_idle().await
    }

    pub async fn tenant_lock_count(&self) -> usize {
        self.tenant_locks.len().await
    }

    pub async fn create_set(
        &self,
        tenant_id: TenantId,
        name: impl Into<String>,
        slug: &str,
        notes: Option<String>,
    ) -> LiveResult<LiveSet> {
        let mut set = LiveSet::new(tenant_id, name, normalize_slug(slug)?);
        set.notes = notes;

        let _tenant = self.tenant_locks.acquire(tenant_id).await;
        let mut txn = self.store.begin();
        txn.insert_set(&set)?;
        txn.commit()?;

        log::info!("Created set {} ({}) for tenant {}", set.id, set.slug, tenant_id);
        self.hub
            .publish(LiveEvent::list(tenant_id, set.id, ListChange::SetCreated))
            .await;
        Ok(set)
    }

    pub async fn update_set(
        &self,
        tenant_id: TenantId,
        set_id: SetId,
        update: SetUpdate,
    ) -> LiveResult<LiveSet> {
        let slug = update.slug.as_deref().map(normalize_slug).transpose()?;

        let _tenant = self.tenant_locks.acquire(tenant_id).await;
        let _set = self.set_locks.acquire(set_id).await;
        let mut txn = self.store.begin();
        let mut set = owned_set(&txn, tenant_id, set_id)?;
        if let Some(name) = update.name {
            set.name = name;
        }
        if let Some(slug) = slug {
            set.slug = slug;
        }
        if let Some(notes) = update.notes {
            set.notes = notes;
        }
        set.touch();
        txn.update_set(&set)?;
        txn.commit()?;

        log::debug!("Updated set {}", set_id);
        self.hub
            .publish(LiveEvent::list(tenant_id, set_id, ListChange::SetUpdated))
            .await;
        Ok(set)
    }

    /// Delete a set with its memberships and pointer. Returns how many
    /// memberships went with it.
    pub async fn delete_set(&self, tenant_id: TenantId, set_id: SetId) -> LiveResult<usize> {
        let _tenant = self.tenant_locks.acquire(tenant_id).await;
        let removed = {
            let _set = self.set_locks.acquire(set_id).await;
            let mut txn = self.store.begin();
            let set = owned_set(&txn, tenant_id, set_id)?;
            let removed = txn.delete_set_cascade(&set)?;
            txn.commit()?;
            removed
        };
        self.set_locks.forget(&set_id).await;

        log::info!("Deleted set {} with {} memberships", set_id, removed);
        self.hub
            .publish(LiveEvent::list(tenant_id, set_id, ListChange::SetDeleted))
            .await;
        Ok(removed)
    }

    pub fn get_set(&self, tenant_id: TenantId, set_id: SetId) -> LiveResult<LiveSet> {
        committed_owned_set(&self.store, tenant_id, set_id)
    }

    pub fn list_sets(&self, tenant_id: TenantId) -> LiveResult<Vec<LiveSet>> {
        Ok(self.store.list_sets(tenant_id)?)
    }
}
