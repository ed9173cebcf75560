//! Staged write transaction.
//!
//! Writes accumulate in an in-memory overlay and land as one RocksDB
//! `WriteBatch` on [`StoreTxn::commit`]. Reads inside the transaction see the
//! overlay first. Dropping the transaction without committing discards every
//! staged write.
//!
//! The position index (`set_id:position`) and the slug index are checked on
//! every staged write, so a move onto an occupied slot fails immediately with
//! `ConstraintViolation` instead of silently overwriting another row.

use std::collections::BTreeMap;
use std::ops::Bound;

use hudson_core::{
    LiveSet, Membership, MembershipAttrs, MembershipId, Position, PositionMove, SetId,
    StatePointer, TenantId,
};

use super::rocks::{
    decode_membership_id, decode_record, decode_set_id, encode_record, id_key, position_key,
    slug_key, tenant_set_key, Column, LiveStore, StoreError,
};

type StagedKey = (Column, Vec<u8>);

pub struct StoreTxn<'a> {
    store: &'a LiveStore,
    staged: BTreeMap<StagedKey, Option<Vec<u8>>>,
}

impl<'a> StoreTxn<'a> {
    pub(crate) fn new(store: &'a LiveStore) -> Self {
        Self {
            store,
            staged: BTreeMap::new(),
        }
    }

    // ─── Raw overlay ──────────────────────────────────────────────────

    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        match self.staged.get(&(column, key.to_vec())) {
            Some(value) => Ok(value.clone()),
            None => self.store.get_raw(column, key),
        }
    }

    fn put(&mut self, column: Column, key: Vec<u8>, value: Vec<u8>) {
        self.staged.insert((column, key), Some(value));
    }

    fn delete(&mut self, column: Column, key: Vec<u8>) {
        self.staged.insert((column, key), None);
    }

    /// Entries under `prefix` as this transaction sees them, in key order.
    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.store.scan_raw(column, prefix)?.into_iter().collect();

        let start = (column, prefix.to_vec());
        for ((col, key), value) in self.staged.range((Bound::Included(start), Bound::Unbounded)) {
            if *col != column || !key.starts_with(prefix) {
                break;
            }
            match value {
                Some(value) => merged.insert(key.clone(), value.clone()),
                None => merged.remove(key),
            };
        }
        Ok(merged.into_iter().collect())
    }

    // ─── Sets ─────────────────────────────────────────────────────────

    pub fn set(&self, set_id: SetId) -> Result<Option<LiveSet>, StoreError> {
        self.get(Column::Sets, set_id.as_bytes())?
            .map(|bytes| decode_record(&bytes))
            .transpose()
    }

    /// Set id currently holding `slug` for a tenant.
    pub fn slug_owner(&self, tenant_id: TenantId, slug: &str) -> Result<Option<SetId>, StoreError> {
        self.get(Column::Slugs, &slug_key(tenant_id, slug))?
            .map(|bytes| decode_set_id(&bytes))
            .transpose()
    }

    fn claim_slug(&mut self, set: &LiveSet) -> Result<(), StoreError> {
        match self.slug_owner(set.tenant_id, &set.slug)? {
            Some(owner) if owner != set.id => Err(StoreError::ConstraintViolation(format!(
                "slug '{}' already in use",
                set.slug
            ))),
            _ => {
                self.put(
                    Column::Slugs,
                    slug_key(set.tenant_id, &set.slug),
                    id_key(set.id.as_bytes()),
                );
                Ok(())
            }
        }
    }

    pub fn insert_set(&mut self, set: &LiveSet) -> Result<(), StoreError> {
        if self.set(set.id)?.is_some() {
            return Err(StoreError::ConstraintViolation(format!("set {} already exists", set.id)));
        }
        self.claim_slug(set)?;
        self.put(Column::TenantSets, tenant_set_key(set.tenant_id, set.id), Vec::new());
        self.put(Column::Sets, id_key(set.id.as_bytes()), encode_record(set)?);
        Ok(())
    }

    /// Overwrite a set record, moving its slug claim if the slug changed.
    pub fn update_set(&mut self, set: &LiveSet) -> Result<(), StoreError> {
        let existing = self
            .set(set.id)?
            .ok_or_else(|| StoreError::ConstraintViolation(format!("set {} does not exist", set.id)))?;
        if existing.slug != set.slug {
            self.claim_slug(set)?;
            self.delete(Column::Slugs, slug_key(existing.tenant_id, &existing.slug));
        }
        self.put(Column::Sets, id_key(set.id.as_bytes()), encode_record(set)?);
        Ok(())
    }

    /// Bump a set's last-modified timestamp.
    pub fn touch_set(&mut self, set_id: SetId) -> Result<Option<LiveSet>, StoreError> {
        let Some(mut set) = self.set(set_id)? else {
            return Ok(None);
        };
        set.touch();
        self.put(Column::Sets, id_key(set.id.as_bytes()), encode_record(&set)?);
        Ok(Some(set))
    }

    /// Delete a set with its memberships, position index, slug and pointer.
    /// Returns the number of memberships removed.
    pub fn delete_set_cascade(&mut self, set: &LiveSet) -> Result<usize, StoreError> {
        let memberships = self.memberships(set.id)?;
        for membership in &memberships {
            self.delete(Column::Memberships, id_key(membership.id.as_bytes()));
            self.delete(Column::Positions, position_key(set.id, membership.position));
        }
        self.delete(Column::Pointers, id_key(set.id.as_bytes()));
        self.delete(Column::Slugs, slug_key(set.tenant_id, &set.slug));
        self.delete(Column::TenantSets, tenant_set_key(set.tenant_id, set.id));
        self.delete(Column::Sets, id_key(set.id.as_bytes()));
        Ok(memberships.len())
    }

    // ─── Memberships ──────────────────────────────────────────────────

    pub fn membership(&self, id: MembershipId) -> Result<Option<Membership>, StoreError> {
        self.get(Column::Memberships, id.as_bytes())?
            .map(|bytes| decode_record(&bytes))
            .transpose()
    }

    /// Memberships of a set ordered by position.
    pub fn memberships(&self, set_id: SetId) -> Result<Vec<Membership>, StoreError> {
        let mut memberships = Vec::new();
        for (_, value) in self.scan_prefix(Column::Positions, set_id.as_bytes())? {
            let id = decode_membership_id(&value)?;
            let membership = self.membership(id)?.ok_or_else(|| {
                StoreError::DeserializationError(format!("position index points at missing membership {id}"))
            })?;
            memberships.push(membership);
        }
        Ok(memberships)
    }

    pub fn membership_at(&self, set_id: SetId, position: Position) -> Result<Option<Membership>, StoreError> {
        match self.get(Column::Positions, &position_key(set_id, position))? {
            Some(value) => self.membership(decode_membership_id(&value)?),
            None => Ok(None),
        }
    }

    fn claim_position(&mut self, set_id: SetId, position: Position, id: MembershipId) -> Result<(), StoreError> {
        let key = position_key(set_id, position);
        if let Some(holder) = self.get(Column::Positions, &key)? {
            if decode_membership_id(&holder)? != id {
                return Err(StoreError::ConstraintViolation(format!(
                    "position {position} already taken in set {set_id}"
                )));
            }
        }
        self.put(Column::Positions, key, id_key(id.as_bytes()));
        Ok(())
    }

    pub fn insert_membership(&mut self, membership: &Membership) -> Result<(), StoreError> {
        if self.membership(membership.id)?.is_some() {
            return Err(StoreError::ConstraintViolation(format!(
                "membership {} already exists",
                membership.id
            )));
        }
        self.claim_position(membership.set_id, membership.position, membership.id)?;
        self.put(
            Column::Memberships,
            id_key(membership.id.as_bytes()),
            encode_record(membership)?,
        );
        Ok(())
    }

    /// Move one membership to `to`, releasing its old slot first.
    pub fn move_membership(&mut self, id: MembershipId, to: Position) -> Result<Membership, StoreError> {
        let mut membership = self
            .membership(id)?
            .ok_or_else(|| StoreError::ConstraintViolation(format!("membership {id} does not exist")))?;
        if membership.position == to {
            return Ok(membership);
        }
        self.delete(Column::Positions, position_key(membership.set_id, membership.position));
        self.claim_position(membership.set_id, to, id)?;
        membership.position = to;
        self.put(Column::Memberships, id_key(id.as_bytes()), encode_record(&membership)?);
        Ok(membership)
    }

    /// Run a sequence of moves in order. Each move is checked for collisions.
    pub fn apply_moves<'m, I>(&mut self, moves: I) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = &'m PositionMove>,
    {
        let mut count = 0;
        for mv in moves {
            self.move_membership(mv.membership_id, mv.to)?;
            count += 1;
        }
        Ok(count)
    }

    pub fn update_membership_attrs(
        &mut self,
        id: MembershipId,
        attrs: MembershipAttrs,
    ) -> Result<Membership, StoreError> {
        let mut membership = self
            .membership(id)?
            .ok_or_else(|| StoreError::ConstraintViolation(format!("membership {id} does not exist")))?;
        membership.attrs = attrs;
        self.put(Column::Memberships, id_key(id.as_bytes()), encode_record(&membership)?);
        Ok(membership)
    }

    pub fn delete_membership(&mut self, membership: &Membership) {
        self.delete(Column::Positions, position_key(membership.set_id, membership.position));
        self.delete(Column::Memberships, id_key(membership.id.as_bytes()));
    }

    // ─── Pointers ─────────────────────────────────────────────────────

    pub fn pointer(&self, set_id: SetId) -> Result<Option<StatePointer>, StoreError> {
        self.get(Column::Pointers, set_id.as_bytes())?
            .map(|bytes| decode_record(&bytes))
            .transpose()
    }

    /// Upsert the set's single pointer.
    pub fn put_pointer(&mut self, pointer: &StatePointer) -> Result<(), StoreError> {
        self.put(Column::Pointers, id_key(pointer.set_id.as_bytes()), encode_record(pointer)?);
        Ok(())
    }

    // ─── Commit ───────────────────────────────────────────────────────

    /// Land every staged write atomically. Returns the number of writes.
    pub fn commit(self) -> Result<usize, StoreError> {
        let writes = self
            .staged
            .iter()
            .map(|((column, key), value)| (*column, key.as_slice(), value.as_deref()));
        self.store.apply(writes)
    }
}
