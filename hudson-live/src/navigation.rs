//! Navigation engine: every operation that moves a set's state pointer.
//!
//! Each operation runs the same protocol:
//! 1. acquire the set lock
//! 2. read the *committed* pointer under that lock
//! 3. compute the next pointer from it
//! 4. stage, commit, publish on the pointer topic
//! 5. release the lock
//!
//! A second command on the same set waits in step 1 and then builds on the
//! first one's committed result. Failures commit nothing and publish nothing.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use hudson_core::{
    Catalog, CycleDirection, LiveError, LiveMessage, LiveResult, Membership, MessageColor,
    Position, SetId, StatePointer, TenantId,
};

use crate::broadcast::{LiveEvent, TopicHub};
use crate::locks::KeyedLocks;
use crate::sets::{committed_owned_set, owned_set};
use crate::storage::{LiveStore, StoreTxn};

/// One producer action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NavCommand {
    Initialize,
    JumpTo(Position),
    Advance,
    Previous,
    CycleImage(CycleDirection),
    SetImageIndex(u32),
    SendMessage { text: String, color: MessageColor },
    ClearMessage,
}

impl NavCommand {
    pub fn name(&self) -> &'static str {
        match self {
            NavCommand::Initialize => "initialize",
            NavCommand::JumpTo(_) => "jump_to",
            NavCommand::Advance => "advance",
            NavCommand::Previous => "previous",
            NavCommand::CycleImage(_) => "cycle_image",
            NavCommand::SetImageIndex(_) => "set_image_index",
            NavCommand::SendMessage { .. } => "send_message",
            NavCommand::ClearMessage => "clear_message",
        }
    }
}

pub struct Navigator {
    store: Arc<LiveStore>,
    locks: Arc<KeyedLocks<SetId>>,
    hub: Arc<TopicHub>,
    catalog: Arc<dyn Catalog>,
}

impl Navigator {
    pub fn new(
        store: Arc<LiveStore>,
        locks: Arc<KeyedLocks<SetId>>,
        hub: Arc<TopicHub>,
        catalog: Arc<dyn Catalog>,
    ) -> Self {
        Self {
            store,
            locks,
            hub,
            catalog,
        }
    }

    pub async fn apply(
        &self,
        tenant_id: TenantId,
        set_id: SetId,
        command: NavCommand,
    ) -> LiveResult<StatePointer> {
        match command {
            NavCommand::Initialize => self.initialize(tenant_id, set_id).await,
            NavCommand::JumpTo(position) => self.jump_to(tenant_id, set_id, position).await,
            NavCommand::Advance => self.advance(tenant_id, set_id).await,
            NavCommand::Previous => self.previous(tenant_id, set_id).await,
            NavCommand::CycleImage(direction) => {
                self.cycle_image(tenant_id, set_id, direction).await
            }
            NavCommand::SetImageIndex(index) => {
                self.set_image_index(tenant_id, set_id, index).await
            }
            NavCommand::SendMessage { text, color } => {
                self.send_message(tenant_id, set_id, text, color).await
            }
            NavCommand::ClearMessage => self.clear_message(tenant_id, set_id).await,
        }
    }

    /// Point at the lowest position. Safe to repeat.
    pub async fn initialize(&self, tenant_id: TenantId, set_id: SetId) -> LiveResult<StatePointer> {
        self.mutate(tenant_id, set_id, "initialize", |txn, current| {
            let first = first_membership(txn, set_id)?;
            Ok(current.pointing_at(Some(first.id)))
        })
        .await
    }

    pub async fn jump_to(
        &self,
        tenant_id: TenantId,
        set_id: SetId,
        position: Position,
    ) -> LiveResult<StatePointer> {
        self.mutate(tenant_id, set_id, "jump_to", |txn, current| {
            let target = txn
                .membership_at(set_id, position)?
                .ok_or(LiveError::InvalidPosition(position))?;
            Ok(current.pointing_at(Some(target.id)))
        })
        .await
    }

    /// Next-greater position. An uninitialised pointer lands on the first item.
    pub async fn advance(&self, tenant_id: TenantId, set_id: SetId) -> LiveResult<StatePointer> {
        self.mutate(tenant_id, set_id, "advance", |txn, current| {
            let Some(at) = current_membership(txn, current)? else {
                let first = first_membership(txn, set_id)?;
                return Ok(current.pointing_at(Some(first.id)));
            };
            let next = txn
                .memberships(set_id)?
                .into_iter()
                .find(|m| m.position > at.position)
                .ok_or(LiveError::EndOfSet)?;
            Ok(current.pointing_at(Some(next.id)))
        })
        .await
    }

    pub async fn previous(&self, tenant_id: TenantId, set_id: SetId) -> LiveResult<StatePointer> {
        self.mutate(tenant_id, set_id, "previous", |txn, current| {
            let at = current_membership(txn, current)?.ok_or(LiveError::StartOfSet)?;
            let prev = txn
                .memberships(set_id)?
                .into_iter()
                .rev()
                .find(|m| m.position < at.position)
                .ok_or(LiveError::StartOfSet)?;
            Ok(current.pointing_at(Some(prev.id)))
        })
        .await
    }

    pub async fn cycle_image(
        &self,
        tenant_id: TenantId,
        set_id: SetId,
        direction: CycleDirection,
    ) -> LiveResult<StatePointer> {
        let catalog = self.catalog.clone();
        self.mutate(tenant_id, set_id, "cycle_image", move |txn, current| {
            let count = current_image_count(txn, current, catalog.as_ref())?;
            Ok(current.with_image_index(direction.step(current.current_image_index, count)))
        })
        .await
    }

    pub async fn set_image_index(
        &self,
        tenant_id: TenantId,
        set_id: SetId,
        index: u32,
    ) -> LiveResult<StatePointer> {
        let catalog = self.catalog.clone();
        self.mutate(tenant_id, set_id, "set_image_index", move |txn, current| {
            let count = current_image_count(txn, current, catalog.as_ref())?;
            if index >= count {
                return Err(LiveError::InvalidIndex { index, count });
            }
            Ok(current.with_image_index(index))
        })
        .await
    }

    /// Stamp a fresh message block (new id and timestamp every send).
    pub async fn send_message(
        &self,
        tenant_id: TenantId,
        set_id: SetId,
        text: impl Into<String>,
        color: MessageColor,
    ) -> LiveResult<StatePointer> {
        let text = text.into();
        self.mutate(tenant_id, set_id, "send_message", move |_, current| {
            Ok(current.with_message(Some(LiveMessage::new(text, color))))
        })
        .await
    }

    pub async fn clear_message(&self, tenant_id: TenantId, set_id: SetId) -> LiveResult<StatePointer> {
        self.mutate(tenant_id, set_id, "clear_message", |_, current| {
            Ok(current.with_message(None))
        })
        .await
    }

    /// Latest committed pointer, without taking the set lock.
    pub fn current(&self, tenant_id: TenantId, set_id: SetId) -> LiveResult<Option<StatePointer>> {
        committed_owned_set(&self.store, tenant_id, set_id)?;
        Ok(self.store.load_pointer(set_id)?)
    }

    async fn mutate<F>(
        &self,
        tenant_id: TenantId,
        set_id: SetId,
        op: &'static str,
        compute: F,
    ) -> LiveResult<StatePointer>
    where
        F: FnOnce(&StoreTxn<'_>, &StatePointer) -> LiveResult<StatePointer>,
    {
        let _guard = self.locks.acquire(set_id).await;

        let mut txn = self.store.begin();
        owned_set(&txn, tenant_id, set_id)?;
        let current = txn
            .pointer(set_id)?
            .unwrap_or_else(|| StatePointer::empty(set_id));

        let mut next = compute(&txn, &current)?;
        next.stamp_after(current.updated_at);
        txn.put_pointer(&next)?;
        txn.commit()?;

        log::debug!(
            "{} on set {}: membership {:?}, image {}",
            op,
            set_id,
            next.current_membership_id,
            next.current_image_index
        );
        self.hub.publish(LiveEvent::Pointer(next.clone())).await;
        Ok(next)
    }
}

fn first_membership(txn: &StoreTxn<'_>, set_id: SetId) -> LiveResult<Membership> {
    txn.memberships(set_id)?
        .into_iter()
        .next()
        .ok_or(LiveError::NoMemberships)
}

/// The membership the pointer refers to, if it still belongs to the set.
fn current_membership(txn: &StoreTxn<'_>, pointer: &StatePointer) -> LiveResult<Option<Membership>> {
    let Some(id) = pointer.current_membership_id else {
        return Ok(None);
    };
    Ok(txn.membership(id)?.filter(|m| m.set_id == pointer.set_id))
}

fn current_image_count(
    txn: &StoreTxn<'_>,
    pointer: &StatePointer,
    catalog: &dyn Catalog,
) -> LiveResult<u32> {
    let membership = current_membership(txn, pointer)?.ok_or(LiveError::NoImages)?;
    match catalog.image_count(membership.item_id) {
        0 => Err(LiveError::NoImages),
        count => Ok(count),
    }
}
