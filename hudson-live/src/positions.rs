//! Position manager: structural edits that keep a set's positions `1..N`.
//!
//! Every edit takes the same set lock the navigator uses, so a reorder and a
//! jump on one set never interleave. Bulk moves follow the plans from
//! `hudson_core::positions` and land in a single commit; the store rejects
//! any intermediate step that would put two rows on one position.

use std::sync::Arc;

use hudson_core::{
    next_position, renumber_plan, reorder_plan, shift_up_plan, ItemId, LiveError, LiveResult,
    Membership, MembershipAttrs, MembershipId, Position, SetId, StatePointer, TenantId,
};

use crate::broadcast::{ListChange, LiveEvent, TopicHub};
use crate::locks::KeyedLocks;
use crate::sets::owned_set;
use crate::storage::{LiveStore, StoreTxn};

pub struct PositionManager {
    store: Arc<LiveStore>,
    locks: Arc<KeyedLocks<SetId>>,
    hub: Arc<TopicHub>,
}

impl PositionManager {
    pub fn new(store: Arc<LiveStore>, locks: Arc<KeyedLocks<SetId>>, hub: Arc<TopicHub>) -> Self {
        Self { store, locks, hub }
    }

    /// Add an item. Without a position it goes after the current last one;
    /// with one (`1..=N+1`) the tail shifts up to make room.
    pub async fn add(
        &self,
        tenant_id: TenantId,
        set_id: SetId,
        item_id: ItemId,
        attrs: MembershipAttrs,
        position: Option<Position>,
    ) -> LiveResult<Membership> {
        let _guard = self.locks.acquire(set_id).await;
        let mut txn = self.store.begin();
        owned_set(&txn, tenant_id, set_id)?;

        let position = match position {
            Some(at) => at,
            None => {
                let current: Vec<Position> =
                    txn.memberships(set_id)?.iter().map(|m| m.position).collect();
                next_position(&current)
            }
        };
        let membership = Membership::new(set_id, item_id, position, attrs);
        let shifted = place(&mut txn, &membership)?;
        self.finish(txn, tenant_id, set_id, ListChange::MembershipAdded(membership.id), shifted)
            .await?;
        Ok(membership)
    }

    pub async fn insert_at(
        &self,
        tenant_id: TenantId,
        set_id: SetId,
        position: Position,
        item_id: ItemId,
        attrs: MembershipAttrs,
    ) -> LiveResult<Membership> {
        self.add(tenant_id, set_id, item_id, attrs, Some(position)).await
    }

    /// Put a previously removed membership back at `position`, keeping its
    /// id, item and attributes.
    pub async fn restore_at(
        &self,
        tenant_id: TenantId,
        set_id: SetId,
        position: Position,
        membership: Membership,
    ) -> LiveResult<Membership> {
        if membership.set_id != set_id {
            return Err(LiveError::OwnershipMismatch(format!(
                "membership {} belongs to set {}",
                membership.id, membership.set_id
            )));
        }

        let _guard = self.locks.acquire(set_id).await;
        let mut txn = self.store.begin();
        owned_set(&txn, tenant_id, set_id)?;

        let restored = Membership {
            position,
            ..membership
        };
        let shifted = place(&mut txn, &restored)?;
        self.finish(txn, tenant_id, set_id, ListChange::MembershipAdded(restored.id), shifted)
            .await?;
        Ok(restored)
    }

    /// Delete one membership and renumber the whole set. If it was current,
    /// the pointer moves to whatever now holds its position (or the new last
    /// item) in the same commit.
    pub async fn remove(&self, tenant_id: TenantId, membership_id: MembershipId) -> LiveResult<Membership> {
        let set_id = self
            .store
            .load_membership(membership_id)?
            .map(|m| m.set_id)
            .ok_or_else(|| LiveError::not_found("membership", membership_id))?;

        let _guard = self.locks.acquire(set_id).await;
        let mut txn = self.store.begin();
        owned_set(&txn, tenant_id, set_id)?;
        let removed = txn
            .membership(membership_id)?
            .ok_or_else(|| LiveError::not_found("membership", membership_id))?;

        txn.delete_membership(&removed);
        let remaining: Vec<(MembershipId, Position)> = txn
            .memberships(set_id)?
            .iter()
            .map(|m| (m.id, m.position))
            .collect();
        let moves = renumber_plan(&remaining);
        let moved = txn.apply_moves(&moves)?;

        let repaired = repair_pointer(&mut txn, &removed)?;
        self.finish(
            txn,
            tenant_id,
            set_id,
            ListChange::MembershipRemoved(membership_id),
            moved + 1,
        )
        .await?;

        if let Some(pointer) = repaired {
            self.hub.publish(LiveEvent::Pointer(pointer)).await;
        }
        Ok(removed)
    }

    /// Reassign positions so `ordered[i]` lands on `i + 1`.
    pub async fn reorder(
        &self,
        tenant_id: TenantId,
        set_id: SetId,
        ordered: &[MembershipId],
    ) -> LiveResult<Vec<Membership>> {
        let _guard = self.locks.acquire(set_id).await;
        let mut txn = self.store.begin();
        owned_set(&txn, tenant_id, set_id)?;

        let current: Vec<(MembershipId, Position)> = txn
            .memberships(set_id)?
            .iter()
            .map(|m| (m.id, m.position))
            .collect();
        let plan = reorder_plan(&current, ordered)?;
        txn.apply_moves(plan.moves())?;
        let reordered = txn.memberships(set_id)?;

        self.finish(txn, tenant_id, set_id, ListChange::Reordered, plan.len())
            .await?;
        Ok(reordered)
    }

    /// Replace a membership's overrides. Position is untouched.
    pub async fn update(
        &self,
        tenant_id: TenantId,
        membership_id: MembershipId,
        attrs: MembershipAttrs,
    ) -> LiveResult<Membership> {
        let set_id = self
            .store
            .load_membership(membership_id)?
            .map(|m| m.set_id)
            .ok_or_else(|| LiveError::not_found("membership", membership_id))?;

        let _guard = self.locks.acquire(set_id).await;
        let mut txn = self.store.begin();
        owned_set(&txn, tenant_id, set_id)?;
        if txn.membership(membership_id)?.is_none() {
            return Err(LiveError::not_found("membership", membership_id));
        }
        let updated = txn.update_membership_attrs(membership_id, attrs)?;
        self.finish(txn, tenant_id, set_id, ListChange::MembershipUpdated(membership_id), 1)
            .await?;
        Ok(updated)
    }

    /// Committed memberships of a set by position. Not locked.
    pub fn list(&self, tenant_id: TenantId, set_id: SetId) -> LiveResult<Vec<Membership>> {
        crate::sets::committed_owned_set(&self.store, tenant_id, set_id)?;
        Ok(self.store.list_memberships(set_id)?)
    }

    /// Touch the set, commit, and announce the change on the tenant's list topic.
    async fn finish(
        &self,
        mut txn: StoreTxn<'_>,
        tenant_id: TenantId,
        set_id: SetId,
        change: ListChange,
        rows: usize,
    ) -> LiveResult<()> {
        txn.touch_set(set_id)?;
        txn.commit()?;
        log::debug!("{:?} on set {}: {} rows touched", change, set_id, rows);
        self.hub.publish(LiveEvent::list(tenant_id, set_id, change)).await;
        Ok(())
    }
}

/// Open a slot at `membership.position` and insert there. Returns how many
/// rows were shifted.
fn place(txn: &mut StoreTxn<'_>, membership: &Membership) -> LiveResult<usize> {
    let current: Vec<(MembershipId, Position)> = txn
        .memberships(membership.set_id)?
        .iter()
        .map(|m| (m.id, m.position))
        .collect();
    let last = current.len() as Position + 1;
    if membership.position < 1 || membership.position > last {
        return Err(LiveError::InvalidPosition(membership.position));
    }

    let plan = shift_up_plan(&current, membership.position);
    txn.apply_moves(plan.moves())?;
    txn.insert_membership(membership)?;
    Ok(plan.len())
}

/// Re-point a pointer that referenced `removed`. Positions must already be
/// renumbered.
fn repair_pointer(txn: &mut StoreTxn<'_>, removed: &Membership) -> LiveResult<Option<StatePointer>> {
    let Some(pointer) = txn.pointer(removed.set_id)? else {
        return Ok(None);
    };
    if pointer.current_membership_id != Some(removed.id) {
        return Ok(None);
    }

    let memberships = txn.memberships(removed.set_id)?;
    let target = memberships
        .iter()
        .find(|m| m.position == removed.position)
        .or_else(|| memberships.last())
        .map(|m| m.id);

    let mut repaired = pointer.pointing_at(target);
    repaired.stamp_after(pointer.updated_at);
    txn.put_pointer(&repaired)?;
    Ok(Some(repaired))
}
